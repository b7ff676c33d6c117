use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::switching::types::{SwitchContext, SwitchEvaluation, SwitchResult};

/// Where the monitor's debounce state machine currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonitorPhase {
    Idle,
    PendingDebounce,
    Processing,
}

/// What caused a switch to be executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwitchTrigger {
    /// The `auto` policy cleared the confidence threshold.
    Automatic,
    /// A pending prompt was approved.
    Approved,
    Forced,
}

/// History entry for one executed switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchEvent {
    pub id: Uuid,
    pub old_path: Option<String>,
    pub new_path: String,
    pub evaluation: SwitchEvaluation,
    pub trigger: SwitchTrigger,
    pub result: SwitchResult,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// A switch waiting for the user's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingPrompt {
    pub id: Uuid,
    pub old_path: Option<String>,
    pub context: SwitchContext,
    pub evaluation: SwitchEvaluation,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Notifications sent on the monitor's event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    PathChanged {
        old: Option<String>,
        new: String,
    },
    /// A switch is advised but policy does not allow executing it.
    SwitchSuggested {
        context: SwitchContext,
        evaluation: SwitchEvaluation,
    },
    PromptRequired(PendingPrompt),
    /// The prompt went unanswered and was declined.
    PromptExpired {
        id: Uuid,
    },
    SwitchCompleted(SwitchEvent),
    SwitchFailed {
        path: String,
        error: String,
    },
}
