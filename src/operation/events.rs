//! Payloads for the `<kind>:<action>` events.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationTriggered {
    pub operation_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub flags: Map<String, Value>,
}

impl OperationTriggered {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            user_id: None,
            flags: Map::new(),
        }
    }

    pub fn by_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_flag(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.flags.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationStarted {
    pub operation_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub flags: Map<String, Value>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub message: Option<String>,
}

impl OperationStarted {
    pub fn new(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            user_id: None,
            flags: Map::new(),
            total: 0,
            message: None,
        }
    }

    pub fn by_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_flags(mut self, flags: Map<String, Value>) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total = total;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl From<&OperationTriggered> for OperationStarted {
    fn from(trigger: &OperationTriggered) -> Self {
        Self {
            operation_id: trigger.operation_id.clone(),
            user_id: trigger.user_id.clone(),
            flags: trigger.flags.clone(),
            total: 0,
            message: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationProgress {
    pub operation_id: String,
    /// Step name, e.g. `copying`
    pub phase: String,
    pub current: u64,
    pub total: u64,
    #[serde(default)]
    pub message: Option<String>,
}

impl OperationProgress {
    pub fn new(operation_id: impl Into<String>, phase: impl Into<String>, current: u64, total: u64) -> Self {
        Self {
            operation_id: operation_id.into(),
            phase: phase.into(),
            current,
            total,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationCompleted {
    pub operation_id: String,
    pub duration_ms: u64,
    #[serde(default)]
    pub message: Option<String>,
}

impl OperationCompleted {
    pub fn new(operation_id: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            operation_id: operation_id.into(),
            duration_ms,
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationFailed {
    pub operation_id: String,
    pub error: String,
    pub duration_ms: u64,
}

impl OperationFailed {
    pub fn new(operation_id: impl Into<String>, error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            operation_id: operation_id.into(),
            error: error.into(),
            duration_ms,
        }
    }
}
