use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::assemble::AssemblyError;

#[derive(Debug, Error, Diagnostic)]
pub enum RetrievalError {
    #[error("invalid repository name: {0}")]
    InvalidRepository(String),

    #[error("invalid dataset name: {0}")]
    InvalidDatasetName(String),

    #[error("invalid version: {0}")]
    InvalidVersion(String),

    #[error("invalid file path in dataset descriptor: {0}")]
    InvalidFilePath(String),

    #[error("repository not found in catalog: {0}")]
    UnknownRepository(String),

    #[error("dataset {name} not found in repository {repository}")]
    UnknownDataset { repository: String, name: String },

    #[error("version {version} is not available for dataset {name} (available: {available})")]
    UnknownVersion {
        name: String,
        version: String,
        available: String,
    },

    #[error("failed to read catalog at {0}")]
    CatalogRead(PathBuf),

    #[error("failed to parse catalog: {0}")]
    CatalogParse(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("cache path {path} is unusable: {message}")]
    Path { path: String, message: String },

    #[error("download of {url} failed after {attempts} attempt(s): {message}")]
    Download {
        url: String,
        status: Option<u16>,
        attempts: usize,
        message: String,
    },

    #[error("integrity check failed for {path}: {message}")]
    Integrity { path: String, message: String },

    #[error("malformed input in {path} at line {line} (byte offset {offset}): {message}")]
    Preprocess {
        path: String,
        line: u64,
        offset: u64,
        message: String,
    },

    #[error(transparent)]
    Assembly(#[from] AssemblyError),

    #[error("deadline exceeded during {phase}")]
    DeadlineExceeded { phase: String },

    #[error("timed out waiting for cache lock {0}")]
    LockTimeout(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl RetrievalError {
    pub(crate) fn path(path: impl ToString, message: impl ToString) -> Self {
        Self::Path {
            path: path.to_string(),
            message: message.to_string(),
        }
    }

    pub fn is_network(&self) -> bool {
        matches!(self, RetrievalError::Download { .. })
    }
}
