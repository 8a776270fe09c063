//! Operation log sink.
//!
//! The core emits one entry when a long-running operation starts; how entries
//! are persisted or played back is a collaborator concern. Stamp entries carry
//! a full snapshot of the placement state so a session log can reproduce the
//! run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::placement::PlacementState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    Stamp,
    Flatten,
    Smooth,
    Undo,
    Redo,
    Export,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OperationEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: OperationKind,
    pub description: String,
    pub placement: Option<PlacementState>,
}

impl OperationEntry {
    pub fn new(kind: OperationKind, description: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            description: description.into(),
            placement: None,
        }
    }

    pub fn with_placement(mut self, placement: PlacementState) -> Self {
        self.placement = Some(placement);
        self
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Receives operation entries. Implemented by the session-history subsystem.
pub trait OperationSink {
    fn record(&mut self, entry: OperationEntry);
}

/// Collects entries in memory; used by tests and the CLI.
#[derive(Default)]
pub struct VecSink {
    pub entries: Vec<OperationEntry>,
}

impl VecSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OperationSink for VecSink {
    fn record(&mut self, entry: OperationEntry) {
        self.entries.push(entry);
    }
}
