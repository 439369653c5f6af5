use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::domain::Verbosity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    ResolvePath,
    CheckCache,
    Lock,
    Download,
    Verify,
    Extract,
    Preprocess,
    MarkComplete,
    Assemble,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::ResolvePath => "ResolvePath",
            Phase::CheckCache => "CheckCache",
            Phase::Lock => "Lock",
            Phase::Download => "Download",
            Phase::Verify => "Verify",
            Phase::Extract => "Extract",
            Phase::Preprocess => "Preprocess",
            Phase::MarkComplete => "MarkComplete",
            Phase::Assemble => "Assemble",
            Phase::Done => "Done",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    Phase {
        phase: Phase,
        message: String,
    },
    FileStarted {
        path: String,
        total: Option<u64>,
    },
    FileProgress {
        path: String,
        bytes: u64,
    },
    FileFinished {
        path: String,
        bytes: u64,
    },
    Retry {
        path: String,
        attempt: usize,
        delay: Duration,
        message: String,
    },
}

impl ProgressEvent {
    pub fn phase(phase: Phase, message: impl Into<String>) -> Self {
        ProgressEvent::Phase {
            phase,
            message: message.into(),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            ProgressEvent::Phase { phase, message } => format!("phase={phase}; {message}"),
            ProgressEvent::FileStarted { path, total } => match total {
                Some(total) => format!("downloading {path} ({total} bytes)"),
                None => format!("downloading {path}"),
            },
            ProgressEvent::FileProgress { path, bytes } => format!("{path}: {bytes} bytes"),
            ProgressEvent::FileFinished { path, bytes } => {
                format!("downloaded {path} ({bytes} bytes)")
            }
            ProgressEvent::Retry {
                path,
                attempt,
                delay,
                message,
            } => format!(
                "retrying {path} after attempt {attempt} in {}ms: {message}",
                delay.as_millis()
            ),
        }
    }
}

pub trait ProgressSink: Send + Sync {
    fn event(&self, event: ProgressEvent);
}

pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn event(&self, _event: ProgressEvent) {}
}

pub fn progress_for(verbosity: Verbosity) -> Box<dyn ProgressSink> {
    match verbosity {
        Verbosity::Silent => Box::new(SilentProgress),
        _ => Box::new(TerminalProgress::new(verbosity)),
    }
}

pub struct TerminalProgress {
    verbosity: Verbosity,
    multi: MultiProgress,
    started: Instant,
    bars: Mutex<HashMap<String, ProgressBar>>,
    totals: Mutex<HashMap<String, (u64, u8)>>,
}

impl TerminalProgress {
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            multi: MultiProgress::new(),
            started: Instant::now(),
            bars: Mutex::new(HashMap::new()),
            totals: Mutex::new(HashMap::new()),
        }
    }

    fn line(&self, text: &str) {
        let text = format!("[{:>6.1}s] {text}", self.started.elapsed().as_secs_f64());
        if self.verbosity == Verbosity::Detailed && self.multi.println(&text).is_ok() {
            return;
        }
        eprintln!("{text}");
    }

    fn detailed(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::FileStarted { path, total } => {
                let bar = match total {
                    Some(total) => {
                        let bar = ProgressBar::new(total);
                        bar.set_style(byte_style());
                        bar
                    }
                    None => {
                        let bar = ProgressBar::new_spinner();
                        bar.set_style(spinner_style());
                        bar
                    }
                };
                let bar = self.multi.add(bar);
                bar.set_message(path.clone());
                if let Some(previous) = lock(&self.bars).insert(path, bar) {
                    previous.finish_and_clear();
                }
            }
            ProgressEvent::FileProgress { path, bytes } => {
                if let Some(bar) = lock(&self.bars).get(&path) {
                    bar.set_position(bytes);
                }
            }
            ProgressEvent::FileFinished { path, bytes } => {
                if let Some(bar) = lock(&self.bars).remove(&path) {
                    bar.set_position(bytes);
                    bar.finish();
                }
            }
            ProgressEvent::Retry { ref path, .. } => {
                if let Some(bar) = lock(&self.bars).remove(path) {
                    bar.finish_and_clear();
                }
                self.line(&event.describe());
            }
            ProgressEvent::Phase { .. } => self.line(&event.describe()),
        }
    }

    fn coarse(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::FileStarted { ref path, total } => {
                if let Some(total) = total.filter(|total| *total > 0) {
                    lock(&self.totals).insert(path.clone(), (total, 0));
                }
                self.line(&event.describe());
            }
            ProgressEvent::FileProgress { path, bytes } => {
                let milestone = {
                    let mut totals = lock(&self.totals);
                    match totals.get_mut(&path) {
                        Some((total, reported)) => {
                            let percent = (bytes.saturating_mul(100) / *total).min(100) as u8;
                            let step = percent / 25 * 25;
                            if step > *reported && step < 100 {
                                *reported = step;
                                Some(step)
                            } else {
                                None
                            }
                        }
                        None => None,
                    }
                };
                if let Some(step) = milestone {
                    self.line(&format!("{path}: {step}%"));
                }
            }
            ProgressEvent::FileFinished { ref path, .. } => {
                lock(&self.totals).remove(path);
                self.line(&event.describe());
            }
            ProgressEvent::Retry { .. } | ProgressEvent::Phase { .. } => {
                self.line(&event.describe())
            }
        }
    }
}

impl ProgressSink for TerminalProgress {
    fn event(&self, event: ProgressEvent) {
        match self.verbosity {
            Verbosity::Silent => {}
            Verbosity::Coarse => self.coarse(event),
            Verbosity::Detailed => self.detailed(event),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn byte_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{msg} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} {msg} {bytes}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_lines_match_cli_format() {
        let event = ProgressEvent::phase(Phase::Download, "string/foo@11.0");
        assert_eq!(event.describe(), "phase=Download; string/foo@11.0");
    }
}
