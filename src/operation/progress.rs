//! Persisted progress record for one background operation.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Lifecycle phase. Progress steps carry their own name (`copying`,
/// `indexing`, ...) and serialize as that name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationPhase {
    Starting,
    Progress(String),
    Completed,
    Failed,
}

impl OperationPhase {
    pub const GENERIC_STEP: &'static str = "progress";

    /// Phase for a named progress step. Empty names and the reserved lifecycle
    /// words map to the generic `progress` step.
    pub fn step(name: impl Into<String>) -> Self {
        let name = name.into();
        match name.as_str() {
            "" | "starting" | "completed" | "failed" => {
                OperationPhase::Progress(Self::GENERIC_STEP.to_string())
            }
            _ => OperationPhase::Progress(name),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            OperationPhase::Starting => "starting",
            OperationPhase::Progress(step) => step.as_str(),
            OperationPhase::Completed => "completed",
            OperationPhase::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OperationPhase::Completed | OperationPhase::Failed)
    }
}

impl From<&str> for OperationPhase {
    fn from(value: &str) -> Self {
        match value {
            "starting" => OperationPhase::Starting,
            "completed" => OperationPhase::Completed,
            "failed" => OperationPhase::Failed,
            other => OperationPhase::step(other),
        }
    }
}

impl fmt::Display for OperationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for OperationPhase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OperationPhase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(OperationPhase::from(raw.as_str()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationAction {
    Triggered,
    Started,
    Progress,
    Completed,
    Failed,
}

impl OperationAction {
    pub fn as_str(self) -> &'static str {
        match self {
            OperationAction::Triggered => "triggered",
            OperationAction::Started => "started",
            OperationAction::Progress => "progress",
            OperationAction::Completed => "completed",
            OperationAction::Failed => "failed",
        }
    }
}

impl fmt::Display for OperationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot appended for every handled event. Never edited afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionHistoryEntry {
    pub action: OperationAction,
    pub at: DateTime<Utc>,
    pub phase: OperationPhase,
    pub current: u64,
    pub total: u64,
    pub percentage: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundOperationProgress {
    pub operation_id: String,
    pub phase: OperationPhase,
    pub current: u64,
    pub total: u64,
    pub percentage: u8,
    #[serde(default)]
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
    #[serde(default)]
    pub action_history: Vec<ActionHistoryEntry>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub flags: Map<String, Value>,
}

impl BackgroundOperationProgress {
    /// Fresh record in the `starting` phase.
    pub fn starting(operation_id: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            operation_id: operation_id.into(),
            phase: OperationPhase::Starting,
            current: 0,
            total: 0,
            percentage: 0,
            message: None,
            started_at: at,
            updated_at: at,
            completed_at: None,
            failed_at: None,
            error: None,
            duration_ms: None,
            action_history: Vec::new(),
            user_id: None,
            flags: Map::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    /// Append a snapshot of the current derived fields.
    pub fn record(&mut self, action: OperationAction, at: DateTime<Utc>) {
        self.updated_at = at;
        self.action_history.push(ActionHistoryEntry {
            action,
            at,
            phase: self.phase.clone(),
            current: self.current,
            total: self.total,
            percentage: self.percentage,
            message: self.message.clone(),
        });
    }
}

/// `floor(current * 100 / total)`, at most 100; 0 when `total` is 0.
pub fn compute_percentage(current: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (current as u128 * 100) / total as u128;
    pct.min(100) as u8
}
