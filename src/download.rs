use std::io::{Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use sha2::{Digest, Sha256};
use tempfile::Builder;
use tracing::{debug, info, warn};

use crate::config::RetryPolicy;
use crate::domain::RemoteFile;
use crate::error::RetrievalError;
use crate::http::{HttpClient, is_retryable_status};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::store::ensure_dir;

const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Option<Instant>,
}

impl Deadline {
    pub fn none() -> Self {
        Self { expires_at: None }
    }

    pub fn after(duration: Duration) -> Self {
        Self {
            expires_at: Some(Instant::now() + duration),
        }
    }

    pub fn from_option(duration: Option<Duration>) -> Self {
        duration.map(Self::after).unwrap_or_else(Self::none)
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().map(|left| left.is_zero()).unwrap_or(false)
    }

    pub fn check(&self, phase: &str) -> Result<(), RetrievalError> {
        if self.is_expired() {
            return Err(RetrievalError::DeadlineExceeded {
                phase: phase.to_string(),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Expected {
    pub size: Option<u64>,
    pub sha256: Option<String>,
}

impl From<&RemoteFile> for Expected {
    fn from(file: &RemoteFile) -> Self {
        Self {
            size: file.size,
            sha256: file.sha256.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedFile {
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub url: String,
    pub destination: Utf8PathBuf,
    pub label: String,
    pub expected: Expected,
}

impl DownloadJob {
    pub fn for_file(file: &RemoteFile, destination: Utf8PathBuf) -> Self {
        Self {
            url: file.url.clone(),
            destination,
            label: file.path.clone(),
            expected: Expected::from(file),
        }
    }
}

enum AttemptError {
    Network {
        status: Option<u16>,
        retryable: bool,
        message: String,
    },
    Local(RetrievalError),
}

impl AttemptError {
    fn retryable(message: impl Into<String>) -> Self {
        AttemptError::Network {
            status: None,
            retryable: true,
            message: message.into(),
        }
    }
}

pub struct Downloader<C: HttpClient> {
    client: C,
    retry: RetryPolicy,
}

impl<C: HttpClient> Downloader<C> {
    pub fn new(client: C, retry: RetryPolicy) -> Self {
        Self { client, retry }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// The destination is replaced atomically or left untouched.
    pub fn fetch(
        &self,
        url: &str,
        destination: &Utf8Path,
        label: &str,
        expected: &Expected,
        deadline: &Deadline,
        sink: &dyn ProgressSink,
    ) -> Result<FetchedFile, RetrievalError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            deadline.check("download")?;
            debug!(url, attempt, "requesting");
            match self.attempt(url, destination, label, expected, deadline, sink) {
                Ok(fetched) => {
                    info!(url, path = %destination, bytes = fetched.size, "downloaded");
                    return Ok(fetched);
                }
                Err(AttemptError::Local(err)) => return Err(err),
                Err(AttemptError::Network {
                    status,
                    retryable,
                    message,
                }) => {
                    if !retryable || attempt >= max_attempts {
                        return Err(RetrievalError::Download {
                            url: url.to_string(),
                            status,
                            attempts: attempt,
                            message,
                        });
                    }
                    let delay = self.retry.delay_for_attempt(attempt);
                    if let Some(left) = deadline.remaining() {
                        if left <= delay {
                            return Err(RetrievalError::DeadlineExceeded {
                                phase: "download backoff".to_string(),
                            });
                        }
                    }
                    warn!(url, attempt, delay_ms = delay.as_millis() as u64, %message, "retrying download");
                    sink.event(ProgressEvent::Retry {
                        path: label.to_string(),
                        attempt,
                        delay,
                        message,
                    });
                    thread::sleep(delay);
                }
            }
        }
    }

    fn attempt(
        &self,
        url: &str,
        destination: &Utf8Path,
        label: &str,
        expected: &Expected,
        deadline: &Deadline,
        sink: &dyn ProgressSink,
    ) -> Result<FetchedFile, AttemptError> {
        let response = self.client.get(url).map_err(|err| AttemptError::Network {
            status: None,
            retryable: err.retryable,
            message: err.message,
        })?;
        if !response.is_success() {
            return Err(AttemptError::Network {
                status: Some(response.status),
                retryable: is_retryable_status(response.status),
                message: format!("HTTP status {}", response.status),
            });
        }
        if let (Some(advertised), Some(wanted)) = (response.content_length, expected.size) {
            if advertised != wanted {
                return Err(AttemptError::retryable(format!(
                    "server advertises {advertised} bytes, expected {wanted}"
                )));
            }
        }

        let parent = destination.parent().ok_or_else(|| {
            AttemptError::Local(RetrievalError::path(destination, "no parent directory"))
        })?;
        ensure_dir(parent).map_err(AttemptError::Local)?;
        let mut temp = Builder::new()
            .prefix(".download-")
            .suffix(".part")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| AttemptError::Local(RetrievalError::path(parent, err)))?;

        sink.event(ProgressEvent::FileStarted {
            path: label.to_string(),
            total: response.content_length.or(expected.size),
        });

        let mut body = response.body;
        let mut hasher = Sha256::new();
        let mut written = 0u64;
        let mut buffer = vec![0u8; CHUNK_SIZE];
        loop {
            if deadline.is_expired() {
                return Err(AttemptError::Local(RetrievalError::DeadlineExceeded {
                    phase: "download".to_string(),
                }));
            }
            let read = match body.read(&mut buffer) {
                Ok(0) => break,
                Ok(read) => read,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    return Err(AttemptError::retryable(format!(
                        "connection interrupted after {written} bytes: {err}"
                    )));
                }
            };
            hasher.update(&buffer[..read]);
            temp.write_all(&buffer[..read]).map_err(|err| {
                AttemptError::Local(RetrievalError::Filesystem(format!(
                    "write {destination}: {err}"
                )))
            })?;
            written += read as u64;
            sink.event(ProgressEvent::FileProgress {
                path: label.to_string(),
                bytes: written,
            });
        }

        if let Some(advertised) = response.content_length {
            if written != advertised {
                return Err(AttemptError::retryable(format!(
                    "truncated body: received {written} of {advertised} bytes"
                )));
            }
        }
        if let Some(wanted) = expected.size {
            if written != wanted {
                return Err(AttemptError::retryable(format!(
                    "size mismatch: received {written} bytes, expected {wanted}"
                )));
            }
        }
        let sha256 = format!("{:x}", hasher.finalize());
        if let Some(wanted) = expected.sha256.as_deref() {
            if !wanted.eq_ignore_ascii_case(&sha256) {
                return Err(AttemptError::retryable(format!(
                    "sha256 mismatch: received {sha256}, expected {wanted}"
                )));
            }
        }

        temp.as_file().sync_all().map_err(|err| {
            AttemptError::Local(RetrievalError::Filesystem(format!(
                "sync {destination}: {err}"
            )))
        })?;
        temp.persist(destination.as_std_path()).map_err(|err| {
            AttemptError::Local(RetrievalError::Filesystem(format!(
                "persist {destination}: {}",
                err.error
            )))
        })?;
        sink.event(ProgressEvent::FileFinished {
            path: label.to_string(),
            bytes: written,
        });
        Ok(FetchedFile {
            size: written,
            sha256,
        })
    }

    /// Results keep the order of `jobs`; one failed file does not cancel the
    /// others.
    pub fn fetch_all(
        &self,
        jobs: &[DownloadJob],
        workers: usize,
        deadline: &Deadline,
        sink: &dyn ProgressSink,
    ) -> Vec<Result<FetchedFile, RetrievalError>> {
        if jobs.is_empty() {
            return Vec::new();
        }
        let workers = workers.clamp(1, jobs.len());
        let next = AtomicUsize::new(0);
        let mut slots: Vec<Option<Result<FetchedFile, RetrievalError>>> =
            (0..jobs.len()).map(|_| None).collect();

        let next = &next;
        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            for _ in 0..workers {
                handles.push(scope.spawn(move || {
                    let mut done = Vec::new();
                    loop {
                        let index = next.fetch_add(1, Ordering::SeqCst);
                        let Some(job) = jobs.get(index) else {
                            break;
                        };
                        let result = self.fetch(
                            &job.url,
                            &job.destination,
                            &job.label,
                            &job.expected,
                            deadline,
                            sink,
                        );
                        done.push((index, result));
                    }
                    done
                }));
            }
            for handle in handles {
                match handle.join() {
                    Ok(done) => {
                        for (index, result) in done {
                            slots[index] = Some(result);
                        }
                    }
                    Err(payload) => std::panic::resume_unwind(payload),
                }
            }
        });

        slots
            .into_iter()
            .zip(jobs)
            .map(|(slot, job)| {
                slot.unwrap_or_else(|| {
                    Err(RetrievalError::Download {
                        url: job.url.clone(),
                        status: None,
                        attempts: 0,
                        message: "download was not attempted".to_string(),
                    })
                })
            })
            .collect()
    }
}
