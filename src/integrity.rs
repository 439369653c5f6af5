use std::fs::{self, File};
use std::io::{ErrorKind, Read};

use camino::Utf8Path;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::domain::{DatasetDescriptor, RemoteFile};
use crate::download::FetchedFile;
use crate::error::RetrievalError;
use crate::store::{COMPLETE_MARKER, CacheEntry, write_json_atomic};

pub const TOOL: &str = concat!("graph-retrieval/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub size: u64,
    pub sha256: String,
    pub recorded_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionManifest {
    pub repository: String,
    pub dataset: String,
    pub version: String,
    pub completed_at: String,
    pub tool: String,
    pub files: Vec<FileRecord>,
}

impl CompletionManifest {
    pub fn file(&self, path: &str) -> Option<&FileRecord> {
        self.files.iter().find(|record| record.path == path)
    }

    pub fn total_bytes(&self) -> u64 {
        self.files.iter().map(|record| record.size).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileStatus {
    Valid(FileRecord),
    Missing,
    Invalid { reason: String },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryPlan {
    pub valid: Vec<FileRecord>,
    pub to_fetch: Vec<RemoteFile>,
}

impl RecoveryPlan {
    pub fn is_satisfied(&self) -> bool {
        self.to_fetch.is_empty()
    }
}

pub fn hash_file(path: &Utf8Path) -> Result<(u64, String), RetrievalError> {
    let mut file = File::open(path.as_std_path())
        .map_err(|err| RetrievalError::Filesystem(format!("open {path}: {err}")))?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    let mut size = 0u64;
    loop {
        let read = file
            .read(&mut buffer)
            .map_err(|err| RetrievalError::Filesystem(format!("read {path}: {err}")))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        size += read as u64;
    }
    Ok((size, format!("{:x}", hasher.finalize())))
}

pub fn record_file(
    entry: &CacheEntry,
    file: &RemoteFile,
    fetched: &FetchedFile,
) -> Result<FileRecord, RetrievalError> {
    let record = FileRecord {
        path: file.path.clone(),
        url: Some(file.url.clone()),
        size: fetched.size,
        sha256: fetched.sha256.clone(),
        recorded_at: chrono::Utc::now().to_rfc3339(),
    };
    write_json_atomic(&entry.record_path(&file.path), &record)?;
    Ok(record)
}

pub fn read_record(entry: &CacheEntry, relative: &str) -> Option<FileRecord> {
    let content = fs::read_to_string(entry.record_path(relative).as_std_path()).ok()?;
    serde_json::from_str(&content).ok()
}

pub fn check_file(entry: &CacheEntry, file: &RemoteFile) -> Result<FileStatus, RetrievalError> {
    let path = entry.file_path(&file.path);
    let metadata = match fs::metadata(path.as_std_path()) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(FileStatus::Missing),
        Err(err) => return Err(RetrievalError::path(&path, err)),
    };
    if !metadata.is_file() {
        return Err(RetrievalError::path(&path, "exists and is not a file"));
    }
    let Some(record) = read_record(entry, &file.path) else {
        return Ok(invalid("no download record"));
    };
    if metadata.len() != record.size {
        return Ok(invalid(format!(
            "size {} differs from recorded {}",
            metadata.len(),
            record.size
        )));
    }
    if let Some(expected) = file.size {
        if expected != record.size {
            return Ok(invalid(format!(
                "recorded size {} differs from expected {expected}",
                record.size
            )));
        }
    }
    if let Some(expected) = file.sha256.as_deref() {
        if !expected.eq_ignore_ascii_case(&record.sha256) {
            return Ok(invalid("recorded sha256 differs from expected"));
        }
    }
    let (_, sha256) = hash_file(&path)?;
    if sha256 != record.sha256 {
        return Ok(invalid("content hash differs from recorded"));
    }
    Ok(FileStatus::Valid(record))
}

fn invalid(reason: impl Into<String>) -> FileStatus {
    FileStatus::Invalid {
        reason: reason.into(),
    }
}

pub fn plan_recovery(
    entry: &CacheEntry,
    files: &[RemoteFile],
) -> Result<RecoveryPlan, RetrievalError> {
    let mut plan = RecoveryPlan::default();
    for file in files {
        match check_file(entry, file)? {
            FileStatus::Valid(record) => {
                debug!(path = %file.path, "cached file verified");
                plan.valid.push(record);
            }
            FileStatus::Missing => plan.to_fetch.push(file.clone()),
            FileStatus::Invalid { reason } => {
                warn!(path = %file.path, %reason, "cached file rejected");
                plan.to_fetch.push(file.clone());
            }
        }
    }
    Ok(plan)
}

pub fn read_manifest(dir: &Utf8Path) -> Option<CompletionManifest> {
    let content = fs::read_to_string(dir.join(COMPLETE_MARKER).as_std_path()).ok()?;
    serde_json::from_str(&content).ok()
}

/// Fast check: the marker in `dir` parses, lists every required path, and
/// each file it lists is on disk with its recorded size. Nothing is hashed.
pub fn is_complete_at(dir: &Utf8Path, required: &[&str]) -> bool {
    let Some(manifest) = read_manifest(dir) else {
        return false;
    };
    required.iter().all(|path| manifest.file(path).is_some())
        && manifest.files.iter().all(|record| {
            fs::metadata(dir.join(&record.path).as_std_path())
                .map(|meta| meta.is_file() && meta.len() == record.size)
                .unwrap_or(false)
        })
}

pub fn required_paths(descriptor: &DatasetDescriptor) -> Vec<&str> {
    let format = descriptor.format();
    let mut paths: Vec<&str> = descriptor
        .files()
        .iter()
        .map(|file| file.path.as_str())
        .collect();
    paths.push(format.edges.path.as_str());
    if let Some(nodes) = &format.nodes {
        paths.push(nodes.path.as_str());
    }
    paths.sort_unstable();
    paths.dedup();
    paths
}

pub fn is_complete(entry: &CacheEntry, descriptor: &DatasetDescriptor) -> bool {
    is_complete_at(entry.dir(), &required_paths(descriptor))
}

pub fn record_local(dir: &Utf8Path, relative: &str) -> Result<FileRecord, RetrievalError> {
    let (size, sha256) = hash_file(&dir.join(relative))?;
    Ok(FileRecord {
        path: relative.to_string(),
        url: None,
        size,
        sha256,
        recorded_at: chrono::Utc::now().to_rfc3339(),
    })
}

pub fn mark_complete_at(
    dir: &Utf8Path,
    descriptor: &DatasetDescriptor,
    files: Vec<FileRecord>,
) -> Result<CompletionManifest, RetrievalError> {
    for record in &files {
        let path = dir.join(&record.path);
        let size = fs::metadata(path.as_std_path())
            .map_err(|err| RetrievalError::Integrity {
                path: path.to_string(),
                message: err.to_string(),
            })?
            .len();
        if size != record.size {
            return Err(RetrievalError::Integrity {
                path: path.to_string(),
                message: format!("size {size} differs from recorded {}", record.size),
            });
        }
    }
    let manifest = CompletionManifest {
        repository: descriptor.repository().to_string(),
        dataset: descriptor.name().to_string(),
        version: descriptor.version().to_string(),
        completed_at: chrono::Utc::now().to_rfc3339(),
        tool: TOOL.to_string(),
        files,
    };
    write_json_atomic(&dir.join(COMPLETE_MARKER), &manifest)?;
    Ok(manifest)
}

pub fn mark_complete(
    entry: &CacheEntry,
    descriptor: &DatasetDescriptor,
    files: Vec<FileRecord>,
) -> Result<CompletionManifest, RetrievalError> {
    for path in required_paths(descriptor) {
        if !files.iter().any(|record| record.path == path) {
            return Err(RetrievalError::Integrity {
                path: entry.file_path(path).to_string(),
                message: "neither downloaded nor extracted from an archive".to_string(),
            });
        }
    }
    mark_complete_at(entry.dir(), descriptor, files)
}

pub fn invalidate(entry: &CacheEntry) -> Result<(), RetrievalError> {
    let marker = entry.marker_path();
    match fs::remove_file(marker.as_std_path()) {
        Ok(()) => {
            warn!(marker = %marker, "invalidated stale completion marker");
            Ok(())
        }
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(RetrievalError::path(&marker, err)),
    }
}
