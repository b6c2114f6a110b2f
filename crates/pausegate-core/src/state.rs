use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::spec::GateRequest;
use crate::types::Outcome;

/// Persistent view of one execution record and its gates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub id: String,
    /// Relative console URL of the run, e.g. `job/deploy/42/`.
    pub url: String,
    #[serde(default)]
    pub approvers: Vec<String>,
    #[serde(default)]
    pub pending: Vec<PendingGate>,
    #[serde(default)]
    pub history: Vec<SettledGate>,
    pub updated_at: DateTime<Utc>,
}

impl RunSnapshot {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            approvers: Vec::new(),
            pending: Vec::new(),
            history: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn pending_gate(&self, id: &str) -> Option<&PendingGate> {
        self.pending.iter().find(|g| g.request.id == id)
    }
}

/// A gate still waiting for a decision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingGate {
    pub request: GateRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger: Option<BTreeMap<String, bool>>,
    pub paused_at: DateTime<Utc>,
}

/// A gate that has settled, retained for audit display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettledGate {
    pub id: String,
    pub message: String,
    pub outcome: Outcome,
    pub paused_at: DateTime<Utc>,
    pub settled_at: DateTime<Utc>,
}
