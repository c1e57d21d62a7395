//! Structured progress events.
//!
//! Each event is one JSON line with an RFC 3339 `timestamp`, the `run_id` of
//! the invocation and an `event` discriminator. Lines go to every attached
//! sink (stdout and `.waypoint/events.jsonl` in production). Events carry no
//! control-flow meaning; a failing sink is logged and skipped.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::phases::PhaseKind;
use crate::state::MilestoneStatus;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    PhaseStart {
        phase: PhaseKind,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        milestone: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        attempt: Option<u32>,
    },
    PhaseComplete {
        phase: PhaseKind,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        milestone: Option<usize>,
        #[serde(skip_serializing_if = "Option::is_none", default)]
        attempt: Option<u32>,
        cost: f64,
        duration_ms: u64,
        turns: u32,
    },
    MilestoneStart {
        milestone: usize,
        name: String,
        version: String,
    },
    MilestoneComplete {
        milestone: usize,
        status: MilestoneStatus,
        attempts: u32,
        cost: f64,
    },
    ExecuteVerifyAttempt {
        milestone: usize,
        attempt: u32,
        max_attempts: u32,
    },
    ExecuteVerifyRetry {
        milestone: usize,
        attempt: u32,
        failures: Vec<String>,
    },
    PipelineBlocked {
        milestone: usize,
        reason: String,
    },
    PipelineComplete {
        status: String,
        completed: usize,
        total: usize,
        total_cost: f64,
    },
}

/// An event as written to the stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventRecord {
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    #[serde(flatten)]
    pub event: PipelineEvent,
}

type Sink = Box<dyn Write + Send>;

pub struct EventLog {
    run_id: String,
    sinks: Mutex<Vec<Sink>>,
    history: Mutex<Vec<EventRecord>>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new()
    }
}

impl EventLog {
    /// An event log with a fresh run id and no sinks.
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            sinks: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn with_sink(self, sink: Sink) -> Self {
        if let Ok(mut sinks) = self.sinks.lock() {
            sinks.push(sink);
        }
        self
    }

    pub fn with_stdout(self) -> Self {
        self.with_sink(Box::new(std::io::stdout()))
    }

    /// Append events to a JSONL file, creating it if needed.
    pub fn with_file(self, path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open event log {}", path.display()))?;
        Ok(self.with_sink(Box::new(file)))
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn emit(&self, event: PipelineEvent) {
        let record = EventRecord {
            timestamp: Utc::now(),
            run_id: self.run_id.clone(),
            event,
        };

        match serde_json::to_string(&record) {
            Ok(line) => {
                if let Ok(mut sinks) = self.sinks.lock() {
                    for sink in sinks.iter_mut() {
                        if let Err(e) = writeln!(sink, "{}", line).and_then(|_| sink.flush()) {
                            warn!(error = %e, "failed to write event");
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "failed to serialize event"),
        }

        if let Ok(mut history) = self.history.lock() {
            history.push(record);
        }
    }

    /// Every event emitted so far, in order.
    pub fn history(&self) -> Vec<EventRecord> {
        self.history
            .lock()
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    pub fn events(&self) -> Vec<PipelineEvent> {
        self.history().into_iter().map(|r| r.event).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Sink that shares its buffer with the test.
    #[derive(Clone, Default)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_event_line_format() {
        let buf = SharedBuf::default();
        let log = EventLog::new().with_sink(Box::new(buf.clone()));
        log.emit(PipelineEvent::ExecuteVerifyRetry {
            milestone: 1,
            attempt: 2,
            failures: vec!["A".to_string()],
        });

        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert_eq!(text.lines().count(), 1);
        let value: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(value["event"], "execute_verify_retry");
        assert_eq!(value["milestone"], 1);
        assert_eq!(value["failures"][0], "A");
        assert_eq!(value["run_id"], log.run_id());
        let ts = value["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok(), "{ts}");
    }

    #[test]
    fn test_optional_fields_omitted() {
        let buf = SharedBuf::default();
        let log = EventLog::new().with_sink(Box::new(buf.clone()));
        log.emit(PipelineEvent::PhaseStart {
            phase: PhaseKind::FinalReport,
            milestone: None,
            attempt: None,
        });
        let text = String::from_utf8(buf.0.lock().unwrap().clone()).unwrap();
        assert!(text.contains(r#""event":"phase_start""#));
        assert!(text.contains(r#""phase":"final_report""#));
        assert!(!text.contains("milestone"));
    }

    #[test]
    fn test_record_roundtrip_and_history() {
        let log = EventLog::new();
        log.emit(PipelineEvent::MilestoneComplete {
            milestone: 0,
            status: MilestoneStatus::Completed,
            attempts: 2,
            cost: 1.5,
        });
        let history = log.history();
        assert_eq!(history.len(), 1);

        let line = serde_json::to_string(&history[0]).unwrap();
        let back: EventRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(back, history[0]);
    }

    #[test]
    fn test_file_sink_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".waypoint/events.jsonl");
        for _ in 0..2 {
            let log = EventLog::new().with_file(&path).unwrap();
            log.emit(PipelineEvent::PipelineBlocked {
                milestone: 0,
                reason: "x".to_string(),
            });
        }
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
