//! Events surfaced by a run, for progress reporting.

use std::path::PathBuf;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::graph::ObjectKind;
use crate::scheduler::Phase;

/// Something that happened during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MigrationEvent {
    PhaseStarted {
        phase: Phase,
        tasks: usize,
    },
    ObjectCreated {
        kind: ObjectKind,
        schema: String,
        name: String,
    },
    ObjectFailed {
        kind: ObjectKind,
        schema: String,
        name: String,
        error: String,
    },
    /// Unsupported object, not migrated.
    ObjectSkipped {
        kind: ObjectKind,
        schema: String,
        name: String,
        reason: String,
    },
    RecordsExported {
        table: String,
        count: u64,
    },
    RecordsImported {
        table: String,
        count: u64,
        total: u64,
    },
    RecordError {
        table: String,
        error: String,
    },
    FileRotated {
        table: String,
        path: PathBuf,
    },
    TableMerged {
        table: String,
        path: PathBuf,
        rows: u64,
    },
    TableFailed {
        table: String,
        error: String,
    },
    /// Non-fatal warning, e.g. an OOM risk estimate.
    Advisory {
        message: String,
    },
    RunCompleted {
        status: String,
    },
}

/// Receives run events. Must not block.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: MigrationEvent);
}

/// Logs events through `tracing`.
#[derive(Debug, Default)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: MigrationEvent) {
        match &event {
            MigrationEvent::PhaseStarted { phase, tasks } => {
                info!("Phase {}: {} tasks", phase, tasks)
            }
            MigrationEvent::ObjectCreated { kind, schema, name } => {
                debug!("Created {} {}.{}", kind, schema, name)
            }
            MigrationEvent::ObjectFailed { kind, schema, name, error: e } => {
                error!("{} {}.{}: failed - {}", kind, schema, name, e)
            }
            MigrationEvent::ObjectSkipped { kind, schema, name, reason } => {
                warn!("Skipped {} {}.{}: {}", kind, schema, name, reason)
            }
            MigrationEvent::RecordsExported { table, count } => {
                debug!("{}: exported {} records", table, count)
            }
            MigrationEvent::RecordsImported { table, count, total } => {
                debug!("{}: imported {} records ({} total)", table, count, total)
            }
            MigrationEvent::RecordError { table, error: e } => warn!("{}: record error - {}", table, e),
            MigrationEvent::FileRotated { table, path } => {
                debug!("{}: rotated to {}", table, path.display())
            }
            MigrationEvent::TableMerged { table, path, rows } => {
                info!("{}: wrote {} rows to {}", table, rows, path.display())
            }
            MigrationEvent::TableFailed { table, error: e } => error!("{}: failed - {}", table, e),
            MigrationEvent::Advisory { message } => warn!("{}", message),
            MigrationEvent::RunCompleted { status } => info!("Run completed: {}", status),
        }
    }
}

/// Forwards events to an unbounded channel; dropped receivers are ignored.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<MigrationEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MigrationEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: MigrationEvent) {
        let _ = self.tx.send(event);
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    events: Mutex<Vec<MigrationEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<MigrationEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl EventSink for CollectingSink {
    fn emit(&self, event: MigrationEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Sends every event to several sinks.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<std::sync::Arc<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: std::sync::Arc<dyn EventSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: MigrationEvent) {
        for sink in &self.sinks {
            sink.emit(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_channel_sink_forwards() {
        let (sink, mut rx) = ChannelSink::new();
        sink.emit(MigrationEvent::Advisory {
            message: "careful".into(),
        });
        assert_eq!(
            rx.recv().await,
            Some(MigrationEvent::Advisory {
                message: "careful".into()
            })
        );
        drop(rx);
        // No receiver: must not panic.
        sink.emit(MigrationEvent::RunCompleted {
            status: "completed".into(),
        });
    }

    #[test]
    fn test_fanout_and_collect() {
        let collected = Arc::new(CollectingSink::new());
        let fanout = FanoutSink::new()
            .with(Arc::new(LogSink))
            .with(collected.clone());
        fanout.emit(MigrationEvent::RecordsImported {
            table: "public.orders".into(),
            count: 10,
            total: 10,
        });
        assert_eq!(collected.events().len(), 1);
    }

    #[test]
    fn test_event_json_is_tagged() {
        let json = serde_json::to_string(&MigrationEvent::ObjectSkipped {
            kind: ObjectKind::Trigger,
            schema: "public".into(),
            name: "trg".into(),
            reason: "unsupported".into(),
        })
        .unwrap();
        assert!(json.starts_with("{\"event\":\"object_skipped\",\"kind\":\"trigger\""));
    }
}
