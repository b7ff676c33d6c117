//! Status transition rules for sessions.
//!
//! ```text
//!            pause                 complete / cancel
//!   ACTIVE ─────────▶ PAUSED ──────────────────────▶ COMPLETED | CANCELLED
//!     ▲   ◀───────── resume                                  │
//!     │                                                      │
//!     └──────────── reopen (gated by TransitionPolicy) ──────┘
//! ```
//!
//! ACTIVE may also go straight to COMPLETED or CANCELLED. Every other pair is
//! rejected unless the caller forces it. Forcing skips the rule table and the
//! policy gates, but the timestamp bookkeeping is applied regardless.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::configuration::types::TransitionPolicy;
use crate::error_handling::types::TransitionError;
use crate::session_management::{SessionRecord, SessionStatus};

use SessionStatus::{Active, Cancelled, Completed, Paused};

const ALLOWED: [(SessionStatus, SessionStatus); 8] = [
    (Active, Paused),
    (Paused, Active),
    (Active, Completed),
    (Active, Cancelled),
    (Paused, Completed),
    (Paused, Cancelled),
    (Completed, Active),
    (Cancelled, Active),
];

/// Caller-supplied modifiers for a status change.
#[derive(Debug, Clone, Default)]
pub struct TransitionOptions {
    pub force: bool,
    pub reason: Option<String>,
}

impl TransitionOptions {
    pub fn forced() -> Self {
        Self {
            force: true,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// What a successful [`TransitionValidator::change_state`] did.
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionOutcome {
    pub from: SessionStatus,
    pub to: SessionStatus,
    /// `false` for a same-status request, which leaves the record untouched.
    pub changed: bool,
    pub forced: bool,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// Share of sessions per status, for reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDistribution {
    pub total: usize,
    pub active: usize,
    pub paused: usize,
    pub completed: usize,
    pub cancelled: usize,
    pub active_ratio: f64,
    pub completed_ratio: f64,
    pub cancelled_ratio: f64,
}

pub struct TransitionValidator {
    policy: TransitionPolicy,
    clock: Arc<dyn Clock>,
}

impl TransitionValidator {
    pub fn new(policy: TransitionPolicy, clock: Arc<dyn Clock>) -> Self {
        Self { policy, clock }
    }

    pub fn policy(&self) -> &TransitionPolicy {
        &self.policy
    }

    /// Whether `from → to` appears in the transition table.
    pub fn can_transition(&self, from: SessionStatus, to: SessionStatus) -> bool {
        ALLOWED.contains(&(from, to))
    }

    /// Policy gates layered on top of the table.
    fn condition_holds(&self, from: SessionStatus, to: SessionStatus) -> Result<(), TransitionError> {
        match (from, to) {
            (Completed, Active) if !self.policy.allow_reopen_completed => {
                Err(TransitionError::ReopenForbidden { from })
            }
            (Cancelled, Active) if !self.policy.allow_reopen_cancelled => {
                Err(TransitionError::ReopenForbidden { from })
            }
            _ => Ok(()),
        }
    }

    /// Statuses the session could move to right now without forcing.
    pub fn available_transitions(&self, session: &SessionRecord) -> Vec<SessionStatus> {
        SessionStatus::ALL
            .into_iter()
            .filter(|&to| {
                self.can_transition(session.status, to)
                    && self.condition_holds(session.status, to).is_ok()
            })
            .collect()
    }

    /// Moves `session` to `to`, updating its timestamps.
    pub fn change_state(
        &self,
        session: &mut SessionRecord,
        to: SessionStatus,
        options: &TransitionOptions,
    ) -> Result<TransitionOutcome, TransitionError> {
        let from = session.status;
        let now = self.clock.now();

        if from == to {
            return Ok(TransitionOutcome {
                from,
                to,
                changed: false,
                forced: options.force,
                reason: options.reason.clone(),
                at: now,
            });
        }

        if !options.force {
            if !self.can_transition(from, to) {
                debug!("[{}] rejected transition {} -> {}", session.id, from, to);
                return Err(TransitionError::NotAllowed { from, to });
            }
            self.condition_holds(from, to)?;
        }

        session.status = to;
        session.updated_at = now;
        session.last_activity_at = now;
        if to.is_terminal() {
            session.ended_at = Some(now);
        } else if from.is_terminal() {
            session.ended_at = None;
        }

        info!(
            "[{}] {} -> {}{}{}",
            session.id,
            from,
            to,
            if options.force { " (forced)" } else { "" },
            options
                .reason
                .as_deref()
                .map(|r| format!(": {}", r))
                .unwrap_or_default()
        );

        Ok(TransitionOutcome {
            from,
            to,
            changed: true,
            forced: options.force,
            reason: options.reason.clone(),
            at: now,
        })
    }

    pub fn activate(
        &self,
        session: &mut SessionRecord,
        options: &TransitionOptions,
    ) -> Result<TransitionOutcome, TransitionError> {
        self.change_state(session, Active, options)
    }

    pub fn pause(
        &self,
        session: &mut SessionRecord,
        options: &TransitionOptions,
    ) -> Result<TransitionOutcome, TransitionError> {
        self.change_state(session, Paused, options)
    }

    pub fn complete(
        &self,
        session: &mut SessionRecord,
        options: &TransitionOptions,
    ) -> Result<TransitionOutcome, TransitionError> {
        self.change_state(session, Completed, options)
    }

    pub fn cancel(
        &self,
        session: &mut SessionRecord,
        options: &TransitionOptions,
    ) -> Result<TransitionOutcome, TransitionError> {
        self.change_state(session, Cancelled, options)
    }

    pub fn analyze_state_history(sessions: &[SessionRecord]) -> StateDistribution {
        let mut dist = StateDistribution {
            total: sessions.len(),
            ..Default::default()
        };
        for session in sessions {
            match session.status {
                Active => dist.active += 1,
                Paused => dist.paused += 1,
                Completed => dist.completed += 1,
                Cancelled => dist.cancelled += 1,
            }
        }
        if dist.total > 0 {
            let total = dist.total as f64;
            dist.active_ratio = dist.active as f64 / total;
            dist.completed_ratio = dist.completed as f64 / total;
            dist.cancelled_ratio = dist.cancelled as f64 / total;
        }
        dist
    }
}
