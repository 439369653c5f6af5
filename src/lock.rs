use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use camino::{Utf8Path, Utf8PathBuf};
use tracing::{debug, warn};

use crate::download::Deadline;
use crate::error::RetrievalError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const MIN_HEARTBEAT: Duration = Duration::from_millis(10);

static NONCE: AtomicU64 = AtomicU64::new(0);

/// A heartbeat keeps the lock file's mtime fresh while held; only a lock left
/// unrefreshed for `stale_after` is reclaimed.
#[derive(Debug)]
pub struct CacheLock {
    path: Utf8PathBuf,
    token: String,
    heartbeat: Option<Heartbeat>,
}

#[derive(Debug)]
struct Heartbeat {
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

impl CacheLock {
    pub fn acquire(
        path: &Utf8Path,
        timeout: Duration,
        stale_after: Duration,
        deadline: &Deadline,
    ) -> Result<Self, RetrievalError> {
        let started = Instant::now();
        if let Some(parent) = path.parent() {
            crate::store::ensure_dir(parent)?;
        }
        let token = new_token();
        let mut announced = false;
        loop {
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(path.as_std_path())
            {
                Ok(mut file) => {
                    let content = format!(
                        "pid={}\ntoken={token}\nacquired_at={}\n",
                        std::process::id(),
                        chrono::Utc::now().to_rfc3339()
                    );
                    if let Err(err) = file.write_all(content.as_bytes()) {
                        let _ = fs::remove_file(path.as_std_path());
                        return Err(RetrievalError::path(path, err));
                    }
                    debug!(lock = %path, "acquired cache lock");
                    let heartbeat = Heartbeat::start(path, &token, stale_after);
                    return Ok(Self {
                        path: path.to_path_buf(),
                        token,
                        heartbeat: Some(heartbeat),
                    });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if is_stale(path, stale_after) && reclaim_stale(path, stale_after) {
                        warn!(lock = %path, "removed stale cache lock");
                        continue;
                    }
                    if !announced {
                        debug!(lock = %path, "waiting for another writer");
                        announced = true;
                    }
                    if started.elapsed() >= timeout {
                        return Err(RetrievalError::LockTimeout(path.to_string()));
                    }
                    deadline.check("waiting for cache lock")?;
                    thread::sleep(POLL_INTERVAL);
                }
                Err(err) => return Err(RetrievalError::path(path, err)),
            }
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        if let Some(heartbeat) = self.heartbeat.take() {
            drop(heartbeat.stop);
            let _ = heartbeat.handle.join();
        }
        if !holds(&self.path, &self.token) {
            warn!(lock = %self.path, "cache lock was taken over, leaving it in place");
            return;
        }
        if let Err(err) = fs::remove_file(self.path.as_std_path()) {
            warn!(lock = %self.path, error = %err, "failed to release cache lock");
        }
    }
}

impl Heartbeat {
    fn start(path: &Utf8Path, token: &str, stale_after: Duration) -> Self {
        let (stop, stopped) = mpsc::channel::<()>();
        let interval = (stale_after / 4).max(MIN_HEARTBEAT);
        let path = path.to_path_buf();
        let token = token.to_string();
        let handle = thread::spawn(move || {
            while let Err(RecvTimeoutError::Timeout) = stopped.recv_timeout(interval) {
                if !holds(&path, &token) {
                    break;
                }
                if let Err(err) = touch(&path) {
                    warn!(lock = %path, error = %err, "failed to refresh cache lock");
                }
            }
        });
        Self { stop, handle }
    }
}

fn new_token() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or(0);
    format!(
        "{}-{nanos:x}-{}",
        std::process::id(),
        NONCE.fetch_add(1, Ordering::Relaxed)
    )
}

fn holds(path: &Utf8Path, token: &str) -> bool {
    fs::read_to_string(path.as_std_path())
        .map(|content| {
            content
                .lines()
                .any(|line| line.strip_prefix("token=") == Some(token))
        })
        .unwrap_or(false)
}

fn touch(path: &Utf8Path) -> std::io::Result<()> {
    OpenOptions::new()
        .write(true)
        .open(path.as_std_path())?
        .set_modified(SystemTime::now())
}

/// Moves a stale lock aside under a unique name so that a single waiter wins
/// the reclaim. A lock refreshed in the meantime is linked back in place.
fn reclaim_stale(path: &Utf8Path, stale_after: Duration) -> bool {
    let aside = Utf8PathBuf::from(format!("{path}.stale-{}", new_token()));
    if fs::rename(path.as_std_path(), aside.as_std_path()).is_err() {
        return false;
    }
    let reclaimed = is_stale(&aside, stale_after);
    if !reclaimed {
        if let Err(err) = fs::hard_link(aside.as_std_path(), path.as_std_path()) {
            warn!(lock = %path, error = %err, "failed to restore live cache lock");
        }
    }
    let _ = fs::remove_file(aside.as_std_path());
    reclaimed
}

fn is_stale(path: &Utf8Path, stale_after: Duration) -> bool {
    fs::metadata(path.as_std_path())
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .map(|age| age >= stale_after)
        .unwrap_or(false)
}
