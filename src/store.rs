use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use serde::Serialize;
use tempfile::Builder;

use crate::domain::{DatasetDescriptor, DatasetName, RepositoryName};
use crate::error::RetrievalError;
use crate::integrity::CompletionManifest;

pub const DEFAULT_CACHE_ROOT: &str = "graphs";
pub const COMPLETE_MARKER: &str = ".complete.json";
pub const RECORDS_DIR: &str = ".records";
pub const LOCK_FILE: &str = ".lock";
pub const PROCESSED_DIR: &str = "processed";

pub fn resolve_cache_root(explicit: Option<&Utf8Path>, env_value: Option<&str>) -> Utf8PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    match env_value.map(str::trim) {
        Some(value) if !value.is_empty() => Utf8PathBuf::from(value),
        _ => Utf8PathBuf::from(DEFAULT_CACHE_ROOT),
    }
}

pub fn resolve(
    explicit: Option<&Utf8Path>,
    env_var_name: &str,
    repository: &RepositoryName,
    dataset: &DatasetName,
) -> Result<Utf8PathBuf, RetrievalError> {
    let store = Store::resolve(explicit, env_var_name);
    store.resolve_dataset_dir(repository, dataset)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Store {
    cache_root: Utf8PathBuf,
}

impl Store {
    pub fn resolve(explicit: Option<&Utf8Path>, env_var_name: &str) -> Self {
        let env_value = std::env::var(env_var_name).ok();
        Self::new_with_root(resolve_cache_root(explicit, env_value.as_deref()))
    }

    pub fn new_with_root(cache_root: Utf8PathBuf) -> Self {
        Self { cache_root }
    }

    pub fn user_cache_root() -> Result<Utf8PathBuf, RetrievalError> {
        BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("graph-retrieval"))
                    .ok()
            })
            .ok_or_else(|| RetrievalError::path("~/.cache", "unable to resolve user cache"))
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn repository_dir(&self, repository: &RepositoryName) -> Utf8PathBuf {
        self.cache_root.join(repository.as_str())
    }

    pub fn dataset_dir(&self, repository: &RepositoryName, dataset: &DatasetName) -> Utf8PathBuf {
        self.repository_dir(repository).join(dataset.as_str())
    }

    pub fn resolve_dataset_dir(
        &self,
        repository: &RepositoryName,
        dataset: &DatasetName,
    ) -> Result<Utf8PathBuf, RetrievalError> {
        let dir = self.dataset_dir(repository, dataset);
        ensure_dir(&dir)?;
        Ok(dir)
    }

    pub fn entry(&self, descriptor: &DatasetDescriptor) -> CacheEntry {
        CacheEntry::new(
            self.dataset_dir(descriptor.repository(), descriptor.name())
                .join(descriptor.version().as_str()),
        )
    }

    pub fn ensure_entry(&self, descriptor: &DatasetDescriptor) -> Result<CacheEntry, RetrievalError> {
        self.resolve_dataset_dir(descriptor.repository(), descriptor.name())?;
        let entry = self.entry(descriptor);
        ensure_dir(entry.dir())?;
        Ok(entry)
    }

    pub fn cached_datasets(&self) -> Result<Vec<CompletionManifest>, RetrievalError> {
        if !self.cache_root.as_std_path().is_dir() {
            return Ok(Vec::new());
        }
        let mut manifests = Vec::new();
        for path in walk_dir(self.cache_root.as_std_path())? {
            let is_marker = path.file_name().map(|name| name == COMPLETE_MARKER).unwrap_or(false);
            let in_processed = path
                .components()
                .any(|component| component.as_os_str() == PROCESSED_DIR);
            if !is_marker || in_processed {
                continue;
            }
            let content = match fs::read_to_string(&path) {
                Ok(content) => content,
                Err(_) => continue,
            };
            if let Ok(manifest) = serde_json::from_str::<CompletionManifest>(&content) {
                manifests.push(manifest);
            }
        }
        manifests.sort_by(|a, b| {
            (&a.repository, &a.dataset, &a.version).cmp(&(&b.repository, &b.dataset, &b.version))
        });
        Ok(manifests)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    dir: Utf8PathBuf,
}

impl CacheEntry {
    pub fn new(dir: Utf8PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn file_path(&self, relative: &str) -> Utf8PathBuf {
        self.dir.join(relative)
    }

    pub fn marker_path(&self) -> Utf8PathBuf {
        self.dir.join(COMPLETE_MARKER)
    }

    pub fn records_dir(&self) -> Utf8PathBuf {
        self.dir.join(RECORDS_DIR)
    }

    pub fn record_path(&self, relative: &str) -> Utf8PathBuf {
        self.records_dir().join(format!("{relative}.json"))
    }

    pub fn lock_path(&self) -> Utf8PathBuf {
        self.dir.join(LOCK_FILE)
    }

    pub fn processed_dir(&self, directed: bool, variant: &str) -> Utf8PathBuf {
        self.dir
            .join(PROCESSED_DIR)
            .join(if directed { "directed" } else { "undirected" })
            .join(variant)
    }
}

pub fn ensure_dir(path: &Utf8Path) -> Result<(), RetrievalError> {
    if path.as_std_path().exists() && !path.as_std_path().is_dir() {
        return Err(RetrievalError::path(path, "exists and is not a directory"));
    }
    fs::create_dir_all(path.as_std_path()).map_err(|err| RetrievalError::path(path, err))
}

pub fn write_json_atomic<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), RetrievalError> {
    let content =
        serde_json::to_vec_pretty(value).map_err(|err| RetrievalError::Filesystem(err.to_string()))?;
    write_bytes_atomic(path, &content)
}

pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), RetrievalError> {
    let parent = path
        .parent()
        .ok_or_else(|| RetrievalError::Filesystem(format!("invalid destination path {path}")))?;
    ensure_dir(parent)?;
    let mut temp = Builder::new()
        .prefix(".write-")
        .suffix(".tmp")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| RetrievalError::path(parent, err))?;
    temp.write_all(content)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|err| RetrievalError::Filesystem(format!("write {path}: {err}")))?;
    temp.persist(path.as_std_path())
        .map_err(|err| RetrievalError::Filesystem(format!("persist {path}: {}", err.error)))?;
    Ok(())
}

pub fn walk_dir(root: &Path) -> Result<Vec<PathBuf>, RetrievalError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries =
            fs::read_dir(&path).map_err(|err| RetrievalError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| RetrievalError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path.clone());
            }
            items.push(path);
        }
    }
    items.sort();
    Ok(items)
}

pub fn atomic_rename_dir(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        fs::remove_dir_all(to)?;
    }
    fs::rename(from, to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precedence() {
        let explicit = Utf8Path::new("/tmp/mygraphs");
        assert_eq!(
            resolve_cache_root(Some(explicit), Some("/other")),
            Utf8PathBuf::from("/tmp/mygraphs")
        );
        assert_eq!(
            resolve_cache_root(None, Some("/other")),
            Utf8PathBuf::from("/other")
        );
        assert_eq!(
            resolve_cache_root(None, Some("   ")),
            Utf8PathBuf::from(DEFAULT_CACHE_ROOT)
        );
        assert_eq!(resolve_cache_root(None, None), Utf8PathBuf::from("graphs"));
    }

    #[test]
    fn entry_layout() {
        let store = Store::new_with_root(Utf8PathBuf::from("graphs"));
        let repo: RepositoryName = "string".parse().unwrap();
        let name: DatasetName = "AcidocellaFacilis".parse().unwrap();
        let dir = store.dataset_dir(&repo, &name);
        assert_eq!(dir, Utf8PathBuf::from("graphs/string/AcidocellaFacilis"));

        let entry = CacheEntry::new(dir.join("11.0"));
        assert!(entry.marker_path().ends_with("11.0/.complete.json"));
        assert!(entry.record_path("a.txt.gz").ends_with(".records/a.txt.gz.json"));
        assert!(
            entry
                .processed_dir(false, "abc")
                .ends_with("processed/undirected/abc")
        );
    }
}
