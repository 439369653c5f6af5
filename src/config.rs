use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::Verbosity;
use crate::error::RetrievalError;
use crate::preprocess::PreprocessOptions;
use crate::store::resolve_cache_root;

pub const DEFAULT_CONFIG_FILE: &str = "graph-retrieval.json";
pub const DEFAULT_CACHE_ENV_VAR: &str = "GRAPH_CACHE_DIR";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub cache_path: Option<Utf8PathBuf>,
    pub cache_path_env_var: String,
    pub preprocess: bool,
    pub load_nodes: bool,
    pub load_node_types: bool,
    pub load_edge_types: bool,
    pub load_edge_weights: bool,
    pub cache: bool,
    pub verbose: u8,
    pub additional_graph_kwargs: BTreeMap<String, Value>,
    pub download_workers: usize,
    pub retry: RetryPolicy,
    pub deadline_secs: Option<u64>,
    pub lock_timeout_secs: u64,
    pub stale_lock_secs: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            cache_path: None,
            cache_path_env_var: DEFAULT_CACHE_ENV_VAR.to_string(),
            preprocess: true,
            load_nodes: true,
            load_node_types: true,
            load_edge_types: true,
            load_edge_weights: true,
            cache: true,
            verbose: 2,
            additional_graph_kwargs: BTreeMap::new(),
            download_workers: 4,
            retry: RetryPolicy::default(),
            deadline_secs: None,
            lock_timeout_secs: 600,
            stale_lock_secs: 3_600,
        }
    }
}

impl RetrievalConfig {
    pub fn with_cache_path(mut self, path: impl Into<Utf8PathBuf>) -> Self {
        self.cache_path = Some(path.into());
        self
    }

    pub fn with_preprocess(mut self, preprocess: bool) -> Self {
        self.preprocess = preprocess;
        self
    }

    pub fn with_load_nodes(mut self, load_nodes: bool) -> Self {
        self.load_nodes = load_nodes;
        self
    }

    pub fn with_node_types(mut self, load: bool) -> Self {
        self.load_node_types = load;
        self
    }

    pub fn with_edge_types(mut self, load: bool) -> Self {
        self.load_edge_types = load;
        self
    }

    pub fn with_edge_weights(mut self, load: bool) -> Self {
        self.load_edge_weights = load;
        self
    }

    pub fn with_cache(mut self, cache: bool) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_verbose(mut self, verbose: u8) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_secs = Some(deadline.as_secs().max(1));
        self
    }

    pub fn with_graph_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.additional_graph_kwargs.insert(key.into(), value);
        self
    }

    pub fn preprocess_options(&self, directed: bool) -> PreprocessOptions {
        PreprocessOptions {
            directed,
            load_nodes: self.load_nodes,
            load_node_types: self.load_node_types,
            load_edge_types: self.load_edge_types,
            load_edge_weights: self.load_edge_weights,
        }
    }

    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from(self.verbose)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub fn stale_lock_after(&self) -> Duration {
        Duration::from_secs(self.stale_lock_secs)
    }

    pub fn workers(&self) -> usize {
        self.download_workers.max(1)
    }

    pub fn cache_root(&self, lookup: &dyn Fn(&str) -> Option<String>) -> Utf8PathBuf {
        let env_value = lookup(&self.cache_path_env_var);
        resolve_cache_root(self.cache_path.as_deref(), env_value.as_deref())
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<RetrievalConfig, RetrievalError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Ok(RetrievalConfig::default());
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| RetrievalError::ConfigRead(config_path.clone()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<RetrievalConfig, RetrievalError> {
        let config: RetrievalConfig = serde_json::from_str(content)
            .map_err(|err| RetrievalError::ConfigParse(err.to_string()))?;
        Self::validate(config)
    }

    fn validate(config: RetrievalConfig) -> Result<RetrievalConfig, RetrievalError> {
        if config.verbose > 2 {
            return Err(RetrievalError::ConfigParse(format!(
                "verbose must be 0, 1 or 2 (got {})",
                config.verbose
            )));
        }
        if config.retry.max_attempts == 0 {
            return Err(RetrievalError::ConfigParse(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if config.cache_path_env_var.trim().is_empty() {
            return Err(RetrievalError::ConfigParse(
                "cache_path_env_var must not be empty".to_string(),
            ));
        }
        if let Some(path) = config.cache_path.as_deref() {
            if path == Utf8Path::new("") {
                return Err(RetrievalError::ConfigParse(
                    "cache_path must not be empty".to_string(),
                ));
            }
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_config_partial() {
        let config = ConfigLoader::parse(r#"{"preprocess": false, "verbose": 1}"#).unwrap();
        assert!(!config.preprocess);
        assert!(config.load_nodes);
        assert!(config.cache);
        assert_eq!(config.preprocess_options(true), PreprocessOptions::new(true));
        assert_eq!(config.verbosity(), Verbosity::Coarse);
        assert_eq!(config.cache_path_env_var, DEFAULT_CACHE_ENV_VAR);
        assert_eq!(config.retry, RetryPolicy::default());
    }

    #[test]
    fn backoff_grows_and_caps() {
        let retry = RetryPolicy {
            max_attempts: 5,
            base_delay_ms: 100,
            max_delay_ms: 350,
        };
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(350));
        assert_eq!(retry.delay_for_attempt(40), Duration::from_millis(350));
    }
}
