use assert_matches::assert_matches;

use graph_retrieval::catalog::Catalog;
use graph_retrieval::domain::{DatasetName, RepositoryName, Version};
use graph_retrieval::error::RetrievalError;

fn string() -> RepositoryName {
    "string".parse().unwrap()
}

fn name(value: &str) -> DatasetName {
    value.parse().unwrap()
}

#[test]
fn builtin_catalog_lists_string_datasets() {
    let catalog = Catalog::builtin().unwrap();
    assert_eq!(catalog.repositories().collect::<Vec<_>>(), vec!["string"]);

    let datasets = catalog.datasets(&string()).unwrap();
    let acidocella = datasets
        .iter()
        .find(|listing| listing.name == "AcidocellaFacilis")
        .unwrap();
    assert_eq!(acidocella.latest, "12.0");
    assert!(acidocella.versions.contains(&"11.5".to_string()));
    assert!(datasets.iter().any(|listing| listing.name == "HomoSapiens"));
}

#[test]
fn latest_resolves_to_concrete_version() {
    let catalog = Catalog::builtin().unwrap();
    let descriptor = catalog
        .descriptor(&string(), &name("AcidocellaFacilis"), &Version::latest(), None)
        .unwrap();

    assert_eq!(descriptor.version().as_str(), "12.0");
    assert!(!descriptor.directed());
    assert_eq!(descriptor.files().len(), 1);
    assert_eq!(
        descriptor.files()[0].url,
        "https://stringdb-downloads.org/download/protein.links.v12.0/525.protein.links.v12.0.txt.gz"
    );
    assert_eq!(descriptor.files()[0].path, "525.protein.links.v12.0.txt.gz");
    assert_eq!(descriptor.format().edges.path, descriptor.files()[0].path);
    assert!(descriptor.citation().is_some());
    assert_eq!(descriptor.label(), "string/AcidocellaFacilis@12.0");
}

#[test]
fn detailed_entry_and_explicit_version() {
    let catalog = Catalog::builtin().unwrap();
    let descriptor = catalog
        .descriptor(
            &string(),
            &name("HomoSapiens"),
            &"11.5".parse().unwrap(),
            Some(true),
        )
        .unwrap();
    assert!(descriptor.directed());
    assert_eq!(descriptor.files()[0].path, "9606.protein.links.v11.5.txt.gz");
}

#[test]
fn unknown_lookups_are_typed_errors() {
    let catalog = Catalog::builtin().unwrap();
    assert_matches!(
        catalog.descriptor(&string(), &name("Unicorn"), &Version::latest(), None),
        Err(RetrievalError::UnknownDataset { repository, name }) if repository == "string" && name == "Unicorn"
    );
    assert_matches!(
        catalog.descriptor(
            &string(),
            &name("AcidocellaFacilis"),
            &"9.0".parse().unwrap(),
            None
        ),
        Err(RetrievalError::UnknownVersion { available, .. }) if available == "11.0, 11.5, 12.0"
    );
    assert_matches!(
        catalog.descriptor(
            &"kghub".parse().unwrap(),
            &name("AcidocellaFacilis"),
            &Version::latest(),
            None
        ),
        Err(RetrievalError::UnknownRepository(_))
    );
}

#[test]
fn user_catalog_extends_builtin() {
    let mut catalog = Catalog::builtin().unwrap();
    let extra = Catalog::parse(
        r#"{
          "repositories": {
            "kghub": {
              "versions": ["2024-01"],
              "latest": "2024-01",
              "directed": true,
              "files": [
                {"url": "https://kg.test/{name}/{version}.zip", "path": "{name}.zip", "extract": true, "size": 10}
              ],
              "format": {
                "edges": {"path": "{name}/edges.tsv", "header": true, "sources": "subject", "destinations": "object", "edge_types": "predicate"},
                "nodes": {"path": "{name}/nodes.tsv", "header": true, "nodes": "id", "node_types": "category", "node_types_separator": "|"}
              },
              "datasets": {"MonarchKG": {"params": {}}}
            }
          }
        }"#,
    )
    .unwrap();
    catalog.extend(extra);

    assert_eq!(catalog.repositories().count(), 2);
    let descriptor = catalog
        .descriptor(&"kghub".parse().unwrap(), &name("MonarchKG"), &Version::latest(), None)
        .unwrap();
    assert!(descriptor.directed());
    assert!(descriptor.files()[0].extract);
    assert_eq!(descriptor.files()[0].size, Some(10));
    assert_eq!(descriptor.files()[0].url, "https://kg.test/MonarchKG/2024-01.zip");
    assert_eq!(descriptor.format().edges.path, "MonarchKG/edges.tsv");
    assert_eq!(
        descriptor.format().nodes.as_ref().unwrap().path,
        "MonarchKG/nodes.tsv"
    );
}

#[test]
fn invalid_catalogs_are_rejected() {
    assert_matches!(Catalog::parse("{"), Err(RetrievalError::CatalogParse(_)));

    let unlisted_latest = r#"{"repositories": {"demo": {
        "versions": ["1"], "latest": "2",
        "files": [{"url": "https://demo.test/e", "path": "e.tsv"}],
        "format": {"edges": {"path": "e.tsv", "sources": 0, "destinations": 1}},
        "datasets": {}
    }}}"#;
    assert_matches!(
        Catalog::parse(unlisted_latest),
        Err(RetrievalError::CatalogParse(message)) if message.contains("latest")
    );

    let shorthand_without_key = r#"{"repositories": {"demo": {
        "versions": ["1"], "latest": "1",
        "files": [{"url": "https://demo.test/e", "path": "e.tsv"}],
        "format": {"edges": {"path": "e.tsv", "sources": 0, "destinations": 1}},
        "datasets": {"Demo": "42"}
    }}}"#;
    assert_matches!(
        Catalog::parse(shorthand_without_key),
        Err(RetrievalError::CatalogParse(_))
    );
}

#[test]
fn unknown_placeholder_fails_descriptor() {
    let catalog = Catalog::parse(
        r#"{"repositories": {"demo": {
            "versions": ["1"], "latest": "1",
            "files": [{"url": "https://demo.test/{missing}", "path": "e.tsv"}],
            "format": {"edges": {"path": "e.tsv", "sources": 0, "destinations": 1}},
            "datasets": {"Demo": {}}
        }}}"#,
    )
    .unwrap();
    assert_matches!(
        catalog.descriptor(&"demo".parse().unwrap(), &name("Demo"), &Version::latest(), None),
        Err(RetrievalError::CatalogParse(message)) if message.contains("{missing}")
    );
}
