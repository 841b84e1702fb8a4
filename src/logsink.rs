use chrono::Local;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};

/// How much of the decision log reaches the sink. `None` writes nothing,
/// `OnlyErrors` writes errors only, `Normal` drops verbose-tagged lines.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Deserialize, Serialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    None,
    OnlyErrors,
    #[default]
    Normal,
    Verbose,
}

pub trait LogSink: Send + Sync {
    fn write_line(&self, message: &str, verbosity: Verbosity);
    fn write_warning(&self, message: &str, verbosity: Verbosity);
    fn write_error(&self, message: &str, error: &dyn Error);
}

/// Append-only file sink. Writes from independent timers race, so each write
/// takes the lock for exactly one open-append-flush-close sequence. IO errors
/// are swallowed: logging must never take the daemon down with it.
pub struct FileLogSink {
    path: PathBuf,
    level: Verbosity,
    lock: Mutex<()>,
}

impl FileLogSink {
    pub fn new(path: PathBuf, level: Verbosity) -> Self {
        Self {
            path,
            level,
            lock: Mutex::new(()),
        }
    }

    fn append(&self, line: &str) {
        let _guard: MutexGuard<'_, ()> = match self.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Ok(mut file) = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
        else {
            return;
        };
        let _ = writeln!(
            file,
            "{} {}",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            line
        );
        let _ = file.flush();
    }

    fn passes(&self, verbosity: Verbosity) -> bool {
        if matches!(self.level, Verbosity::None | Verbosity::OnlyErrors) {
            return false;
        }
        verbosity <= self.level
    }
}

impl LogSink for FileLogSink {
    fn write_line(&self, message: &str, verbosity: Verbosity) {
        if self.passes(verbosity) {
            self.append(message);
        }
    }

    fn write_warning(&self, message: &str, verbosity: Verbosity) {
        if self.passes(verbosity) {
            self.append(&format!("WARNING: {message}"));
        }
    }

    fn write_error(&self, message: &str, error: &dyn Error) {
        if self.level == Verbosity::None {
            return;
        }
        self.append(&format!("ERROR: {message}: {error}"));
    }
}

/// Sink for hosts that configure no log file.
pub struct NullLogSink;

impl LogSink for NullLogSink {
    fn write_line(&self, _message: &str, _verbosity: Verbosity) {}
    fn write_warning(&self, _message: &str, _verbosity: Verbosity) {}
    fn write_error(&self, _message: &str, _error: &dyn Error) {}
}
