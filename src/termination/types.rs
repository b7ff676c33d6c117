use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::configuration::types::{OrphanPolicy, TerminationConfig};
use crate::session_management::SessionStatus;

/// Why a session is being terminated. Decides the final status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminationReason {
    Normal,
    UserRequested,
    Error,
    Timeout,
    ForceTerminated,
}

impl TerminationReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminationReason::Normal => "normal",
            TerminationReason::UserRequested => "user_requested",
            TerminationReason::Error => "error",
            TerminationReason::Timeout => "timeout",
            TerminationReason::ForceTerminated => "force_terminated",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().replace('-', "_").as_str() {
            "normal" => Some(TerminationReason::Normal),
            "user_requested" => Some(TerminationReason::UserRequested),
            "error" => Some(TerminationReason::Error),
            "timeout" => Some(TerminationReason::Timeout),
            "force_terminated" => Some(TerminationReason::ForceTerminated),
            _ => None,
        }
    }

    pub fn final_status(self) -> SessionStatus {
        match self {
            TerminationReason::Normal | TerminationReason::UserRequested => {
                SessionStatus::Completed
            }
            TerminationReason::Error
            | TerminationReason::Timeout
            | TerminationReason::ForceTerminated => SessionStatus::Cancelled,
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call overrides. `None` falls back to the coordinator's
/// [`TerminationConfig`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TerminationOptions {
    pub force: bool,
    pub create_backup: Option<bool>,
    pub require_backup: Option<bool>,
    pub orphaned_memories: Option<OrphanPolicy>,
    pub generate_report: Option<bool>,
}

impl TerminationOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            ..Default::default()
        }
    }
}

/// A termination request with every option resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminationContext {
    pub session_id: Uuid,
    pub reason: TerminationReason,
    pub force: bool,
    pub create_backup: bool,
    pub require_backup: bool,
    pub orphaned_memories: OrphanPolicy,
    pub generate_report: bool,
    pub requested_at: DateTime<Utc>,
}

impl TerminationContext {
    pub fn resolve(
        session_id: Uuid,
        reason: TerminationReason,
        options: &TerminationOptions,
        config: &TerminationConfig,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id,
            reason,
            force: options.force,
            create_backup: options.create_backup.unwrap_or(config.create_backup),
            require_backup: options.require_backup.unwrap_or(config.require_backup),
            orphaned_memories: options.orphaned_memories.unwrap_or(config.orphaned_memories),
            generate_report: options.generate_report.unwrap_or(config.generate_report),
            requested_at: now,
        }
    }
}

/// Counts from the finalisation and cleanup steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupResult {
    pub memories_processed: usize,
    pub todos_converted: usize,
    pub orphans_found: usize,
    pub memories_archived: usize,
    pub memories_deleted: usize,
    pub links_removed: usize,
    /// Session-scoped cache rows dropped.
    pub resources_freed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminationReport {
    pub session_id: Uuid,
    pub project_name: String,
    pub final_status: SessionStatus,
    pub duration_secs: i64,
    pub total_memories: usize,
    pub completed_items: usize,
    pub open_items: usize,
    /// `completed / (completed + open)`, 1.0 when the session had no items.
    pub completion_ratio: f64,
    pub preservation_notes: Vec<String>,
    pub summary: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminationResult {
    pub session_id: Uuid,
    pub reason: TerminationReason,
    pub success: bool,
    pub final_status: Option<SessionStatus>,
    pub backup_id: Option<Uuid>,
    pub cleanup: CleanupResult,
    pub report: Option<TerminationReport>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TerminationResult {
    pub fn new(session_id: Uuid, reason: TerminationReason, now: DateTime<Utc>) -> Self {
        Self {
            session_id,
            reason,
            success: false,
            final_status: None,
            backup_id: None,
            cleanup: CleanupResult::default(),
            report: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    pub fn failed(
        session_id: Uuid,
        reason: TerminationReason,
        now: DateTime<Utc>,
        error: impl Into<String>,
    ) -> Self {
        let mut result = Self::new(session_id, reason, now);
        result.errors.push(error.into());
        result
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOptions {
    pub parallel: bool,
    /// Falls back to `batch_concurrency` from the configuration.
    pub max_concurrency: Option<usize>,
    pub stop_on_error: bool,
    pub options: TerminationOptions,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            parallel: false,
            max_concurrency: None,
            stop_on_error: false,
            options: TerminationOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub requested: usize,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Not attempted because an earlier failure stopped the batch.
    pub skipped: usize,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchTerminationResult {
    pub success: bool,
    pub results: Vec<TerminationResult>,
    pub summary: BatchSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reasons_map_to_final_statuses() {
        assert_eq!(TerminationReason::Normal.final_status(), SessionStatus::Completed);
        assert_eq!(
            TerminationReason::UserRequested.final_status(),
            SessionStatus::Completed
        );
        for reason in [
            TerminationReason::Error,
            TerminationReason::Timeout,
            TerminationReason::ForceTerminated,
        ] {
            assert_eq!(reason.final_status(), SessionStatus::Cancelled);
        }
    }

    #[test]
    fn reasons_parse_loosely() {
        assert_eq!(
            TerminationReason::parse("user-requested"),
            Some(TerminationReason::UserRequested)
        );
        assert_eq!(
            TerminationReason::parse("TIMEOUT"),
            Some(TerminationReason::Timeout)
        );
        assert_eq!(TerminationReason::parse("whatever"), None);
    }

    #[test]
    fn options_override_configuration() {
        let config = TerminationConfig::default();
        let options = TerminationOptions {
            create_backup: Some(false),
            orphaned_memories: Some(OrphanPolicy::Delete),
            ..TerminationOptions::forced()
        };
        let ctx = TerminationContext::resolve(
            Uuid::new_v4(),
            TerminationReason::Normal,
            &options,
            &config,
            Utc::now(),
        );
        assert!(ctx.force);
        assert!(!ctx.create_backup);
        assert_eq!(ctx.orphaned_memories, OrphanPolicy::Delete);
        assert_eq!(ctx.generate_report, config.generate_report);
    }
}
