use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelinePhase {
    Idle,
    Collecting,
    Fetching,
    Summarizing,
    Persisting,
    Completed,
    Error,
}

impl std::fmt::Display for PipelinePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PipelinePhase::Idle => "idle",
            PipelinePhase::Collecting => "collecting",
            PipelinePhase::Fetching => "fetching",
            PipelinePhase::Summarizing => "summarizing",
            PipelinePhase::Persisting => "persisting",
            PipelinePhase::Completed => "completed",
            PipelinePhase::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Bounded, append-only message sink. Entries are strictly append-ordered;
/// when the buffer is full the oldest entry is evicted.
#[derive(Debug)]
pub struct LogBuffer {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(64)),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, message: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(LogEntry {
            timestamp: Utc::now(),
            message: message.into(),
        });
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }
}

/// Immutable snapshot returned by `PipelineController::status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub running: bool,
    pub phase: PipelinePhase,
    /// 0..=100, floor of completed items over total.
    pub progress: u8,
    pub last_run: Option<DateTime<Utc>>,
    pub logs: Vec<LogEntry>,
}

/// Process-wide pipeline state. The `running` flag doubles as the
/// single-flight guard; every code path that sets it true must set it back
/// to false on exit.
#[derive(Debug)]
pub struct PipelineState {
    pub running: bool,
    pub phase: PipelinePhase,
    pub progress: u8,
    pub last_run: Option<DateTime<Utc>>,
    pub logs: LogBuffer,
}

impl PipelineState {
    pub fn new(log_capacity: usize) -> Self {
        Self {
            running: false,
            phase: PipelinePhase::Idle,
            progress: 0,
            last_run: None,
            logs: LogBuffer::new(log_capacity),
        }
    }

    pub fn log(&mut self, message: impl Into<String>) {
        self.logs.push(message);
    }

    pub fn snapshot(&self) -> PipelineStatus {
        PipelineStatus {
            running: self.running,
            phase: self.phase,
            progress: self.progress,
            last_run: self.last_run,
            logs: self.logs.snapshot(),
        }
    }
}

/// Handle shared between the controller, the collector and background run
/// tasks. All mutations happen under this one lock.
pub type SharedState = Arc<RwLock<PipelineState>>;

pub fn shared_state(log_capacity: usize) -> SharedState {
    Arc::new(RwLock::new(PipelineState::new(log_capacity)))
}
