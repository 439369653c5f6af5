use std::collections::BTreeMap;
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::assemble::{AssemblyRequest, GraphAssembler, GraphSource};
use crate::catalog::Catalog;
use crate::config::RetrievalConfig;
use crate::domain::{DatasetDescriptor, DatasetName, RemoteFile, RepositoryName, Version};
use crate::download::{Deadline, DownloadJob, Downloader, Expected};
use crate::error::RetrievalError;
use crate::fs_util::{extract_zip, validate_zip};
use crate::http::HttpClient;
use crate::integrity::{self, CompletionManifest, FileRecord, FileStatus};
use crate::lock::CacheLock;
use crate::preprocess::{PreprocessOptions, Preprocessor, ProcessedFiles};
use crate::progress::{Phase, ProgressEvent, ProgressSink};
use crate::store::{CacheEntry, PROCESSED_DIR, Store};

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RetrievalReport {
    pub dataset: String,
    pub entry_dir: String,
    pub cache_hit: bool,
    pub downloaded: Vec<String>,
    pub reused: Vec<String>,
    pub processed_dir: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Retrieved<G> {
    pub graph: G,
    pub report: RetrievalReport,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileState {
    pub path: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryStatus {
    pub dataset: String,
    pub entry_dir: String,
    pub complete: bool,
    pub files: Vec<FileState>,
    pub processed_variants: Vec<String>,
}

pub struct Retriever<C: HttpClient, A: GraphAssembler> {
    client: C,
    assembler: A,
    env_lookup: EnvLookup,
}

impl<C: HttpClient, A: GraphAssembler> Retriever<C, A> {
    pub fn new(client: C, assembler: A) -> Self {
        Self {
            client,
            assembler,
            env_lookup: Box::new(|name| std::env::var(name).ok()),
        }
    }

    pub fn with_env_lookup(
        mut self,
        lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.env_lookup = Box::new(lookup);
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn assembler(&self) -> &A {
        &self.assembler
    }

    pub fn store_for(&self, config: &RetrievalConfig) -> Store {
        Store::new_with_root(config.cache_root(&*self.env_lookup))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn retrieve_from_catalog(
        &self,
        catalog: &Catalog,
        repository: &RepositoryName,
        name: &DatasetName,
        version: &Version,
        directed: Option<bool>,
        config: &RetrievalConfig,
        sink: &dyn ProgressSink,
    ) -> Result<Retrieved<A::Graph>, RetrievalError> {
        let descriptor = catalog.descriptor(repository, name, version, directed)?;
        self.retrieve(&descriptor, config, sink)
    }

    pub fn retrieve(
        &self,
        descriptor: &DatasetDescriptor,
        config: &RetrievalConfig,
        sink: &dyn ProgressSink,
    ) -> Result<Retrieved<A::Graph>, RetrievalError> {
        let deadline = Deadline::from_option(config.deadline());
        let label = descriptor.label();

        phase(sink, Phase::ResolvePath, &label);
        let store = self.store_for(config);
        let entry = store.ensure_entry(descriptor)?;
        let entry = CacheEntry::new(
            entry
                .dir()
                .canonicalize_utf8()
                .map_err(|err| RetrievalError::path(entry.dir(), err))?,
        );
        deadline.check("resolve path")?;

        let options = config.preprocess_options(descriptor.directed());
        let mut report = RetrievalReport {
            dataset: label.clone(),
            entry_dir: entry.dir().to_string(),
            cache_hit: false,
            downloaded: Vec::new(),
            reused: Vec::new(),
            processed_dir: None,
        };

        phase(sink, Phase::CheckCache, entry.dir().as_str());
        let cached = if config.cache {
            self.cached(&entry, descriptor, config, &options)
        } else {
            None
        };
        let processed = match cached {
            Some(processed) => {
                debug!(dataset = %label, "cache hit");
                report.cache_hit = true;
                report.reused = file_paths(descriptor.files());
                processed
            }
            None => self.populate(
                &entry,
                descriptor,
                config,
                &options,
                &deadline,
                sink,
                &mut report,
            )?,
        };
        report.processed_dir = processed.as_ref().map(|files| files.dir.to_string());

        deadline.check("assemble")?;
        phase(sink, Phase::Assemble, &label);
        let source = match processed {
            Some(files) => GraphSource::Preprocessed(files),
            None => GraphSource::Raw {
                root: entry.dir().to_path_buf(),
                files: descriptor
                    .files()
                    .iter()
                    .map(|file| entry.file_path(&file.path))
                    .collect(),
                format: descriptor.format().clone(),
            },
        };
        let graph = self.assembler.assemble(AssemblyRequest {
            repository: descriptor.repository(),
            name: descriptor.name(),
            version: descriptor.version(),
            options,
            source: &source,
            extra: &config.additional_graph_kwargs,
        })?;
        phase(sink, Phase::Done, &label);
        info!(dataset = %label, cache_hit = report.cache_hit, "retrieval finished");
        Ok(Retrieved { graph, report })
    }

    fn cached(
        &self,
        entry: &CacheEntry,
        descriptor: &DatasetDescriptor,
        config: &RetrievalConfig,
        options: &PreprocessOptions,
    ) -> Option<Option<ProcessedFiles>> {
        if !integrity::is_complete(entry, descriptor) {
            return None;
        }
        if !config.preprocess {
            return Some(None);
        }
        let dir = Preprocessor::variant_dir(entry, descriptor, options);
        Preprocessor::completed(&dir).map(Some)
    }

    #[allow(clippy::too_many_arguments)]
    fn populate(
        &self,
        entry: &CacheEntry,
        descriptor: &DatasetDescriptor,
        config: &RetrievalConfig,
        options: &PreprocessOptions,
        deadline: &Deadline,
        sink: &dyn ProgressSink,
        report: &mut RetrievalReport,
    ) -> Result<Option<ProcessedFiles>, RetrievalError> {
        phase(sink, Phase::Lock, entry.lock_path().as_str());
        let _lock = CacheLock::acquire(
            &entry.lock_path(),
            config.lock_timeout(),
            config.stale_lock_after(),
            deadline,
        )?;

        if config.cache {
            if let Some(processed) = self.cached(entry, descriptor, config, options) {
                debug!(dataset = %report.dataset, "completed by another writer");
                report.cache_hit = true;
                report.reused = file_paths(descriptor.files());
                return Ok(processed);
            }
        }

        let raw_complete = config.cache && integrity::is_complete(entry, descriptor);
        let records = if raw_complete {
            report.reused = file_paths(descriptor.files());
            None
        } else {
            integrity::invalidate(entry)?;
            let mut records =
                self.download_and_verify(entry, descriptor, config, deadline, sink, report)?;
            if !report.downloaded.is_empty() {
                remove_tree(&entry.dir().join(PROCESSED_DIR))?;
            }
            for file in descriptor.files().iter().filter(|file| file.extract) {
                deadline.check("extract")?;
                phase(sink, Phase::Extract, &file.path);
                let extracted = extract_zip(&entry.file_path(&file.path), entry.dir())?;
                debug!(archive = %file.path, files = extracted.len(), "extracted archive");
                for relative in extracted {
                    if !records.iter().any(|record| record.path == relative.as_str()) {
                        records.push(integrity::record_local(entry.dir(), relative.as_str())?);
                    }
                }
            }
            Some(records)
        };

        let processed = if config.preprocess {
            if !config.cache {
                remove_tree(&Preprocessor::variant_dir(entry, descriptor, options))?;
            }
            deadline.check("preprocess")?;
            phase(sink, Phase::Preprocess, &report.dataset);
            Some(Preprocessor::preprocess(entry, descriptor, *options, deadline)?)
        } else {
            None
        };

        if let Some(records) = records {
            deadline.check("mark complete")?;
            phase(sink, Phase::MarkComplete, entry.marker_path().as_str());
            integrity::mark_complete(entry, descriptor, records)?;
        }
        Ok(processed)
    }

    /// Fetches what the recovery plan asks for, then verifies every fetched
    /// file after all downloads have joined. A file failing verification is
    /// fetched once more; a second failure is a download error.
    fn download_and_verify(
        &self,
        entry: &CacheEntry,
        descriptor: &DatasetDescriptor,
        config: &RetrievalConfig,
        deadline: &Deadline,
        sink: &dyn ProgressSink,
        report: &mut RetrievalReport,
    ) -> Result<Vec<FileRecord>, RetrievalError> {
        phase(sink, Phase::Verify, "checking cached files");
        let plan = integrity::plan_recovery(entry, descriptor.files())?;
        report.reused = plan.valid.iter().map(|record| record.path.clone()).collect();
        let mut records: BTreeMap<String, FileRecord> = plan
            .valid
            .into_iter()
            .map(|record| (record.path.clone(), record))
            .collect();

        let downloader = Downloader::new(&self.client, config.retry.clone());
        if !plan.to_fetch.is_empty() {
            deadline.check("download")?;
            phase(
                sink,
                Phase::Download,
                &format!("{} file(s) with {} worker(s)", plan.to_fetch.len(), config.workers()),
            );
            let jobs: Vec<DownloadJob> = plan
                .to_fetch
                .iter()
                .map(|file| DownloadJob::for_file(file, entry.file_path(&file.path)))
                .collect();
            let results = downloader.fetch_all(&jobs, config.workers(), deadline, sink);

            let mut first_error = None;
            for (file, result) in plan.to_fetch.iter().zip(results) {
                match result {
                    Ok(fetched) => {
                        integrity::record_file(entry, file, &fetched)?;
                        report.downloaded.push(file.path.clone());
                    }
                    Err(err) => {
                        warn!(path = %file.path, error = %err, "download failed");
                        first_error.get_or_insert(err);
                    }
                }
            }
            if let Some(err) = first_error {
                return Err(err);
            }
        }

        deadline.check("verify")?;
        phase(sink, Phase::Verify, "verifying downloaded files");
        for file in &plan.to_fetch {
            let record = match verify_fetched(entry, file)? {
                FileStatus::Valid(record) => record,
                FileStatus::Missing => {
                    let reason = "missing after download";
                    self.refetch(&downloader, entry, file, reason, deadline, sink)?
                }
                FileStatus::Invalid { reason } => {
                    self.refetch(&downloader, entry, file, &reason, deadline, sink)?
                }
            };
            records.insert(record.path.clone(), record);
        }

        descriptor
            .files()
            .iter()
            .map(|file| {
                records.remove(&file.path).ok_or_else(|| RetrievalError::Integrity {
                    path: file.path.clone(),
                    message: "file was neither reused nor downloaded".to_string(),
                })
            })
            .collect()
    }

    fn refetch(
        &self,
        downloader: &Downloader<&C>,
        entry: &CacheEntry,
        file: &RemoteFile,
        reason: &str,
        deadline: &Deadline,
        sink: &dyn ProgressSink,
    ) -> Result<FileRecord, RetrievalError> {
        warn!(path = %file.path, reason, "verification failed, downloading again");
        let destination = entry.file_path(&file.path);
        let fetched = downloader.fetch(
            &file.url,
            &destination,
            &file.path,
            &Expected::from(file),
            deadline,
            sink,
        )?;
        integrity::record_file(entry, file, &fetched)?;
        match verify_fetched(entry, file)? {
            FileStatus::Valid(record) => Ok(record),
            FileStatus::Missing => Err(escalate(file, "missing after re-download")),
            FileStatus::Invalid { reason } => Err(escalate(file, &reason)),
        }
    }

    pub fn status(
        &self,
        descriptor: &DatasetDescriptor,
        config: &RetrievalConfig,
    ) -> Result<EntryStatus, RetrievalError> {
        let store = self.store_for(config);
        let entry = store.entry(descriptor);
        let mut files = Vec::with_capacity(descriptor.files().len());
        for file in descriptor.files() {
            let state = match integrity::check_file(&entry, file)? {
                FileStatus::Valid(record) => FileState {
                    path: file.path.clone(),
                    state: "valid".to_string(),
                    size: Some(record.size),
                    reason: None,
                },
                FileStatus::Missing => FileState {
                    path: file.path.clone(),
                    state: "missing".to_string(),
                    size: None,
                    reason: None,
                },
                FileStatus::Invalid { reason } => FileState {
                    path: file.path.clone(),
                    state: "invalid".to_string(),
                    size: None,
                    reason: Some(reason),
                },
            };
            files.push(state);
        }
        Ok(EntryStatus {
            dataset: descriptor.label(),
            entry_dir: entry.dir().to_string(),
            complete: integrity::is_complete(&entry, descriptor),
            files,
            processed_variants: processed_variants(&entry),
        })
    }

    pub fn cached_datasets(
        &self,
        config: &RetrievalConfig,
    ) -> Result<Vec<CompletionManifest>, RetrievalError> {
        self.store_for(config).cached_datasets()
    }
}

fn phase(sink: &dyn ProgressSink, phase: Phase, message: &str) {
    debug!(%phase, message, "phase");
    sink.event(ProgressEvent::phase(phase, message));
}

fn file_paths(files: &[RemoteFile]) -> Vec<String> {
    files.iter().map(|file| file.path.clone()).collect()
}

fn verify_fetched(entry: &CacheEntry, file: &RemoteFile) -> Result<FileStatus, RetrievalError> {
    let status = integrity::check_file(entry, file)?;
    if !file.extract || !matches!(status, FileStatus::Valid(_)) {
        return Ok(status);
    }
    match validate_zip(&entry.file_path(&file.path)) {
        Ok(()) => Ok(status),
        Err(err) => Ok(FileStatus::Invalid {
            reason: err.to_string(),
        }),
    }
}

fn escalate(file: &RemoteFile, reason: &str) -> RetrievalError {
    RetrievalError::Download {
        url: file.url.clone(),
        status: None,
        attempts: 2,
        message: format!("integrity check failed after re-download: {reason}"),
    }
}

fn remove_tree(dir: &Utf8Path) -> Result<(), RetrievalError> {
    match fs::remove_dir_all(dir.as_std_path()) {
        Ok(()) => {
            debug!(dir = %dir, "discarded processed output");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(RetrievalError::path(dir, err)),
    }
}

fn processed_variants(entry: &CacheEntry) -> Vec<String> {
    let root: Utf8PathBuf = entry.dir().join(PROCESSED_DIR);
    let mut variants = Vec::new();
    for direction in ["directed", "undirected"] {
        let Ok(listing) = fs::read_dir(root.join(direction).as_std_path()) else {
            continue;
        };
        for item in listing.flatten() {
            let Some(name) = item.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let dir = root.join(direction).join(&name);
            if Preprocessor::completed(&dir).is_some() {
                variants.push(format!("{direction}/{name}"));
            }
        }
    }
    variants.sort();
    variants
}
