use std::io::{self, Write};

use serde::Serialize;

use crate::app::{EntryStatus, RetrievalReport};
use crate::catalog::CatalogListing;
use crate::integrity::CompletionManifest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

#[derive(Debug, Clone, Serialize)]
pub struct FetchResult<G: Serialize> {
    pub report: RetrievalReport,
    pub graph: G,
}

#[derive(Debug, Clone, Serialize)]
pub struct ListResult {
    pub datasets: Vec<CatalogListing>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CachedResult {
    pub cache_root: String,
    pub datasets: Vec<CachedEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CachedEntry {
    pub repository: String,
    pub dataset: String,
    pub version: String,
    pub completed_at: String,
    pub files: usize,
    pub bytes: u64,
}

impl From<&CompletionManifest> for CachedEntry {
    fn from(manifest: &CompletionManifest) -> Self {
        Self {
            repository: manifest.repository.clone(),
            dataset: manifest.dataset.clone(),
            version: manifest.version.clone(),
            completed_at: manifest.completed_at.clone(),
            files: manifest.files.len(),
            bytes: manifest.total_bytes(),
        }
    }
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_fetch<G: Serialize>(result: &FetchResult<G>) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_list(result: &ListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_cached(result: &CachedResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_info(result: &EntryStatus) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl crate::progress::ProgressSink for JsonOutput {
    fn event(&self, _event: crate::progress::ProgressEvent) {}
}
