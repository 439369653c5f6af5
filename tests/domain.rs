use assert_matches::assert_matches;

use graph_retrieval::domain::{DatasetDescriptor, RemoteFile, Version};
use graph_retrieval::error::RetrievalError;
use graph_retrieval::format::{Column, EdgeListFormat, GraphFormat};

fn format(path: &str) -> GraphFormat {
    GraphFormat::edges_only(EdgeListFormat::new(path, Column::Number(0), Column::Number(1)))
}

fn build(files: Vec<RemoteFile>, edges: &str) -> Result<DatasetDescriptor, RetrievalError> {
    DatasetDescriptor::new(
        "string".parse().unwrap(),
        "AcidocellaFacilis".parse().unwrap(),
        Version::latest(),
        false,
        files,
        format(edges),
    )
}

#[test]
fn descriptor_requires_files() {
    assert_matches!(build(Vec::new(), "e.tsv"), Err(RetrievalError::InvalidFilePath(_)));
}

#[test]
fn descriptor_rejects_escaping_and_duplicate_paths() {
    let escaping = vec![RemoteFile::new("https://mock.test/e", "../e.tsv")];
    assert_matches!(build(escaping, "e.tsv"), Err(RetrievalError::InvalidFilePath(_)));

    let duplicate = vec![
        RemoteFile::new("https://mock.test/a", "e.tsv"),
        RemoteFile::new("https://mock.test/b", "e.tsv"),
    ];
    assert_matches!(build(duplicate, "e.tsv"), Err(RetrievalError::InvalidFilePath(_)));

    let files = vec![RemoteFile::new("https://mock.test/e", "e.tsv")];
    assert_matches!(build(files, "/abs/e.tsv"), Err(RetrievalError::InvalidFilePath(_)));
}

#[test]
fn remote_file_normalizes_hash() {
    let file = RemoteFile::new("https://mock.test/e", "e.tsv")
        .with_size(3)
        .with_sha256("ABCDEF");
    assert_eq!(file.sha256.as_deref(), Some("abcdef"));
    assert_eq!(file.size, Some(3));
    assert!(!file.extract);
    assert!(file.extracted().extract);
}

#[test]
fn invalid_names_are_rejected() {
    assert_matches!(
        "bad repo".parse::<graph_retrieval::domain::RepositoryName>(),
        Err(RetrievalError::InvalidRepository(_))
    );
    assert_matches!(
        "v 1".parse::<Version>(),
        Err(RetrievalError::InvalidVersion(_))
    );
}
