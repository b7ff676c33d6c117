//! Value types exchanged by the rule engine and the switch coordinator.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session_management::SessionRecord;

/// Where the user is working right now.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SwitchContext {
    pub project_path: String,
    pub project_name: String,
    pub git_repository: Option<String>,
    /// Skip the rules and always create a new session.
    pub force_create: bool,
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl SwitchContext {
    pub fn new(project_path: impl Into<String>, project_name: impl Into<String>) -> Self {
        Self {
            project_path: project_path.into(),
            project_name: project_name.into(),
            ..Default::default()
        }
    }

    pub fn with_git_repository(mut self, repository: impl Into<String>) -> Self {
        self.git_repository = Some(repository.into());
        self
    }

    pub fn force_create(mut self) -> Self {
        self.force_create = true;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SwitchDecision {
    CreateNew,
    ReactivateExisting,
    NoAction,
}

impl fmt::Display for SwitchDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SwitchDecision::CreateNew => "CREATE_NEW",
            SwitchDecision::ReactivateExisting => "REACTIVATE_EXISTING",
            SwitchDecision::NoAction => "NO_ACTION",
        })
    }
}

/// The rule engine's verdict. Producing one never touches storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchEvaluation {
    pub decision: SwitchDecision,
    pub target_session: Option<SessionRecord>,
    pub sessions_to_pause: Vec<SessionRecord>,
    pub sessions_to_complete: Vec<SessionRecord>,
    /// Within [0, 1].
    pub confidence: f64,
    pub reasons: Vec<String>,
}

impl SwitchEvaluation {
    pub fn new(decision: SwitchDecision, confidence: f64) -> Self {
        Self {
            decision,
            target_session: None,
            sessions_to_pause: Vec::new(),
            sessions_to_complete: Vec::new(),
            confidence,
            reasons: Vec::new(),
        }
    }
}

/// Outcome of [`SwitchCoordinator::switch_session`](super::SwitchCoordinator::switch_session).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchResult {
    /// No sub-step failed.
    pub success: bool,
    /// At least one change was applied.
    pub switched: bool,
    pub decision: SwitchDecision,
    pub target_session: Option<SessionRecord>,
    pub changes: Vec<String>,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub errors: Vec<String>,
}

impl SwitchResult {
    pub fn target_id(&self) -> Option<Uuid> {
        self.target_session.as_ref().map(|s| s.id)
    }
}
