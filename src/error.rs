//! Engine errors and the error sink step failures are logged to.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::timer::now_millis;

/// Errors the engine itself can surface. Step failures never appear here;
/// they travel as result records.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid simulation: {0}")]
    InvalidSimulation(String),

    #[error("failed to open error file: {0}")]
    ErrorFile(#[from] std::io::Error),
}

/// Sink for step exceptions.
///
/// Every exception is reported through `tracing`; when an error file is
/// configured the sink also appends one line per exception.
#[derive(Clone, Default)]
pub struct ErrorSink {
    file: Option<Arc<Mutex<File>>>,
}

impl ErrorSink {
    pub fn open(path: Option<&Path>) -> Result<Self, Error> {
        let file = match path {
            Some(path) => Some(Arc::new(Mutex::new(
                OpenOptions::new().create(true).append(true).open(path)?,
            ))),
            None => None,
        };
        Ok(Self { file })
    }

    pub fn record(&self, scenario: &str, step: &str, user_id: u64, error: &str) {
        tracing::error!(scenario, step, user_id, error, "step failed");
        if let Some(file) = &self.file {
            if let Ok(mut file) = file.lock() {
                let _ = writeln!(
                    file,
                    "{} scenario={scenario} step={step} user={user_id} error={error}",
                    now_millis()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_to_file_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.log");
        let sink = ErrorSink::open(Some(&path)).unwrap();
        sink.record("checkout", "pay", 3, "connection refused");
        sink.record("checkout", "pay", 4, "timed out");

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("scenario=checkout"));
        assert!(lines[0].contains("error=connection refused"));
        assert!(lines[1].contains("user=4"));
    }

    #[test]
    fn no_file_is_a_noop() {
        let sink = ErrorSink::open(None).unwrap();
        sink.record("s", "step", 0, "boom");
    }
}
