use std::time::Duration;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use graph_retrieval::config::{ConfigLoader, RetrievalConfig};
use graph_retrieval::error::RetrievalError;

#[test]
fn parse_full_config() {
    let config = ConfigLoader::parse(
        r#"{
            "cache_path": "/data/graphs",
            "cache_path_env_var": "MY_GRAPHS",
            "preprocess": true,
            "load_nodes": false,
            "load_edge_weights": false,
            "cache": false,
            "verbose": 0,
            "additional_graph_kwargs": {"engine": "ensmallen"},
            "download_workers": 8,
            "retry": {"max_attempts": 5},
            "deadline_secs": 900
        }"#,
    )
    .unwrap();
    assert_eq!(config.cache_path, Some(Utf8PathBuf::from("/data/graphs")));
    assert!(!config.load_nodes);
    assert!(config.load_edge_types);
    assert!(!config.load_edge_weights);
    assert!(!config.cache);
    let options = config.preprocess_options(false);
    assert!(!options.load_nodes && !options.load_edge_weights && options.load_node_types);
    assert_eq!(config.workers(), 8);
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.base_delay_ms, 200);
    assert_eq!(config.deadline(), Some(Duration::from_secs(900)));
    assert_eq!(
        config.additional_graph_kwargs.get("engine"),
        Some(&serde_json::json!("ensmallen"))
    );
}

#[test]
fn invalid_values_are_rejected() {
    assert_matches!(
        ConfigLoader::parse(r#"{"verbose": 3}"#),
        Err(RetrievalError::ConfigParse(_))
    );
    assert_matches!(
        ConfigLoader::parse(r#"{"retry": {"max_attempts": 0}}"#),
        Err(RetrievalError::ConfigParse(_))
    );
    assert_matches!(
        ConfigLoader::parse(r#"{"cache_path_env_var": " "}"#),
        Err(RetrievalError::ConfigParse(_))
    );
    assert_matches!(
        ConfigLoader::parse(r#"{"download_workers": "many"}"#),
        Err(RetrievalError::ConfigParse(_))
    );
}

#[test]
fn explicit_missing_file_is_an_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    assert_matches!(
        ConfigLoader::resolve(path.to_str()),
        Err(RetrievalError::ConfigRead(_))
    );
}

#[test]
fn cache_root_lookup_happens_through_the_given_function() {
    let config = RetrievalConfig::default();
    let root = config.cache_root(&|name| (name == "GRAPH_CACHE_DIR").then(|| "/other".to_string()));
    assert_eq!(root, Utf8PathBuf::from("/other"));

    let explicit = config.with_cache_path("/tmp/mygraphs");
    let root = explicit.cache_root(&|_| Some("/other".to_string()));
    assert_eq!(root, Utf8PathBuf::from("/tmp/mygraphs"));

    let fallback = RetrievalConfig::default().cache_root(&|_| None);
    assert_eq!(fallback, Utf8PathBuf::from("graphs"));
}

#[test]
fn zero_workers_still_downloads() {
    let mut config = RetrievalConfig::default();
    config.download_workers = 0;
    assert_eq!(config.workers(), 1);
}
