use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use camino::{Utf8Component, Utf8Path};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;
use crate::format::GraphFormat;

pub const LATEST_VERSION: &str = "latest";

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid name regex"));
static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._+-]*$").expect("valid version regex"));

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RepositoryName(String);

impl RepositoryName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepositoryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RepositoryName {
    type Err = RetrievalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        if normalized.len() > 64 || !NAME_RE.is_match(&normalized) {
            return Err(RetrievalError::InvalidRepository(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DatasetName(String);

impl DatasetName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for DatasetName {
    type Err = RetrievalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.len() > 255 || !NAME_RE.is_match(trimmed) {
            return Err(RetrievalError::InvalidDatasetName(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(String);

impl Version {
    pub fn latest() -> Self {
        Self(LATEST_VERSION.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_latest(&self) -> bool {
        self.0 == LATEST_VERSION
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::latest()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Version {
    type Err = RetrievalError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.len() > 64 || !VERSION_RE.is_match(trimmed) {
            return Err(RetrievalError::InvalidVersion(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    pub url: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub extract: bool,
}

impl RemoteFile {
    pub fn new(url: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            path: path.into(),
            size: None,
            sha256: None,
            extract: false,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into().to_lowercase());
        self
    }

    pub fn extracted(mut self) -> Self {
        self.extract = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetDescriptor {
    repository: RepositoryName,
    name: DatasetName,
    version: Version,
    directed: bool,
    files: Vec<RemoteFile>,
    format: GraphFormat,
    nodes: Option<u64>,
    edges: Option<u64>,
    citation: Option<String>,
}

impl DatasetDescriptor {
    pub fn new(
        repository: RepositoryName,
        name: DatasetName,
        version: Version,
        directed: bool,
        files: Vec<RemoteFile>,
        format: GraphFormat,
    ) -> Result<Self, RetrievalError> {
        if files.is_empty() {
            return Err(RetrievalError::InvalidFilePath(format!(
                "dataset {name} declares no files"
            )));
        }
        let mut seen = std::collections::BTreeSet::new();
        for file in &files {
            validate_relative_path(&file.path)?;
            if !seen.insert(file.path.as_str()) {
                return Err(RetrievalError::InvalidFilePath(format!(
                    "duplicate path {}",
                    file.path
                )));
            }
        }
        validate_relative_path(&format.edges.path)?;
        if let Some(nodes) = &format.nodes {
            validate_relative_path(&nodes.path)?;
        }
        Ok(Self {
            repository,
            name,
            version,
            directed,
            files,
            format,
            nodes: None,
            edges: None,
            citation: None,
        })
    }

    pub fn with_metadata(
        mut self,
        nodes: Option<u64>,
        edges: Option<u64>,
        citation: Option<String>,
    ) -> Self {
        self.nodes = nodes;
        self.edges = edges;
        self.citation = citation;
        self
    }

    pub fn repository(&self) -> &RepositoryName {
        &self.repository
    }

    pub fn name(&self) -> &DatasetName {
        &self.name
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn directed(&self) -> bool {
        self.directed
    }

    pub fn files(&self) -> &[RemoteFile] {
        &self.files
    }

    pub fn format(&self) -> &GraphFormat {
        &self.format
    }

    pub fn nodes(&self) -> Option<u64> {
        self.nodes
    }

    pub fn edges(&self) -> Option<u64> {
        self.edges
    }

    pub fn citation(&self) -> Option<&str> {
        self.citation.as_deref()
    }

    pub fn label(&self) -> String {
        format!("{}/{}@{}", self.repository, self.name, self.version)
    }
}

pub fn validate_relative_path(path: &str) -> Result<(), RetrievalError> {
    let candidate = Utf8Path::new(path);
    let is_valid = !path.is_empty()
        && candidate
            .components()
            .all(|component| matches!(component, Utf8Component::Normal(_)));
    if !is_valid {
        return Err(RetrievalError::InvalidFilePath(path.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Verbosity {
    Silent,
    Coarse,
    Detailed,
}

impl From<u8> for Verbosity {
    fn from(level: u8) -> Self {
        match level {
            0 => Verbosity::Silent,
            1 => Verbosity::Coarse,
            _ => Verbosity::Detailed,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_repository_lowercases() {
        let repo: RepositoryName = "STRING".parse().unwrap();
        assert_eq!(repo.as_str(), "string");
    }

    #[test]
    fn parse_dataset_name_rejects_traversal() {
        let err = "../etc".parse::<DatasetName>().unwrap_err();
        assert_matches!(err, RetrievalError::InvalidDatasetName(_));
        let err = "a/b".parse::<DatasetName>().unwrap_err();
        assert_matches!(err, RetrievalError::InvalidDatasetName(_));
    }

    #[test]
    fn version_defaults_to_latest() {
        assert!(Version::default().is_latest());
        let version: Version = "11.0".parse().unwrap();
        assert!(!version.is_latest());
    }

    #[test]
    fn relative_paths() {
        assert!(validate_relative_path("edges.tsv.gz").is_ok());
        assert!(validate_relative_path("nested/edges.tsv").is_ok());
        assert_matches!(
            validate_relative_path("/etc/passwd"),
            Err(RetrievalError::InvalidFilePath(_))
        );
        assert_matches!(
            validate_relative_path("a/../../b"),
            Err(RetrievalError::InvalidFilePath(_))
        );
        assert_matches!(
            validate_relative_path(""),
            Err(RetrievalError::InvalidFilePath(_))
        );
    }

    #[test]
    fn verbosity_levels() {
        assert_eq!(Verbosity::from(0), Verbosity::Silent);
        assert_eq!(Verbosity::from(1), Verbosity::Coarse);
        assert_eq!(Verbosity::from(2), Verbosity::Detailed);
        assert_eq!(Verbosity::from(9), Verbosity::Detailed);
    }
}
