//! Error recording seam for provider wrappers.
//!
//! The request layer reports per-engine anomalies (redirect storms,
//! classified errors) through [`ErrorRecorder`]; hosts plug in their own
//! counter backend. [`MemoryRecorder`] is the in-process implementation,
//! also used by tests.

use std::sync::{Mutex, PoisonError};

/// One recorded anomaly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorRecord {
    pub engine: String,
    pub message: String,
    pub status: Option<u16>,
    pub reason: Option<String>,
    pub host: Option<String>,
    /// Secondary records describe degraded-but-usable outcomes.
    pub secondary: bool,
}

/// Sink for per-engine error records.
pub trait ErrorRecorder: Send + Sync {
    fn record(&self, record: ErrorRecord);
}

/// Recorder that drops everything.
pub struct NullRecorder;

impl ErrorRecorder for NullRecorder {
    fn record(&self, _record: ErrorRecord) {}
}

/// Recorder that keeps records in memory.
#[derive(Default)]
pub struct MemoryRecorder {
    records: Mutex<Vec<ErrorRecord>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything recorded so far.
    pub fn records(&self) -> Vec<ErrorRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ErrorRecorder for MemoryRecorder {
    fn record(&self, record: ErrorRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_recorder_collects() {
        let recorder = MemoryRecorder::new();
        assert!(recorder.is_empty());
        recorder.record(ErrorRecord {
            engine: "example".to_string(),
            message: "3 redirects, maximum: 2".to_string(),
            status: Some(200),
            reason: None,
            host: Some("example.com".to_string()),
            secondary: true,
        });
        assert_eq!(recorder.len(), 1);
        assert_eq!(recorder.records()[0].engine, "example");
        assert!(recorder.records()[0].secondary);
    }

    #[test]
    fn test_null_recorder_drops() {
        let recorder = NullRecorder;
        recorder.record(ErrorRecord {
            engine: "example".to_string(),
            message: String::new(),
            status: None,
            reason: None,
            host: None,
            secondary: false,
        });
    }
}
