use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::session_management::SessionStatus;
use crate::switching::types::SwitchContext;

/// Tag attached to sessions created by the switch coordinator.
pub const AUTO_SWITCH_TAG: &str = "auto-switch";

/// A tracked unit of work scoped to a project location.
///
/// `ended_at` is set exactly when `status` is terminal; the transition
/// validator is the only code that moves `status`, and it keeps the two in
/// step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: Uuid,
    pub project_name: String,
    pub project_path: String,
    pub git_repository: Option<String>,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub activity_count: u64,
    pub memory_count: u64,
    /// Accumulated work time in whole seconds.
    pub total_work_time: i64,
    pub tags: BTreeSet<String>,
    pub auto_created: bool,
    pub created_by: String,
    pub description: String,
}

impl SessionRecord {
    /// A fresh ACTIVE session for a project, created by `created_by`.
    pub fn new(
        project_name: impl Into<String>,
        project_path: impl Into<String>,
        created_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_name: project_name.into(),
            project_path: project_path.into(),
            git_repository: None,
            status: SessionStatus::Active,
            started_at: now,
            ended_at: None,
            updated_at: now,
            last_activity_at: now,
            activity_count: 0,
            memory_count: 0,
            total_work_time: 0,
            tags: BTreeSet::new(),
            auto_created: false,
            created_by: created_by.into(),
            description: String::new(),
        }
    }

    /// The record persisted by the CREATE_NEW path of a switch.
    pub fn new_auto(context: &SwitchContext, now: DateTime<Utc>) -> Self {
        let mut session = Self::new(
            context.project_name.clone(),
            context.project_path.clone(),
            AUTO_SWITCH_TAG,
            now,
        );
        session.git_repository = context.git_repository.clone();
        session.auto_created = true;
        session.tags.insert(AUTO_SWITCH_TAG.to_string());
        session.description = format!("Automatically created for {}", context.project_name);
        session
    }

    pub fn with_status(mut self, status: SessionStatus, now: DateTime<Utc>) -> Self {
        self.status = status;
        self.ended_at = status.is_terminal().then_some(now);
        self
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Time since the last recorded activity, never negative.
    pub fn idle_for(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_activity_at).max(Duration::zero())
    }

    /// Bumps the usage counter.
    pub fn record_activity(&mut self, now: DateTime<Utc>) {
        self.activity_count += 1;
        self.last_activity_at = now;
        self.updated_at = now;
    }
}
