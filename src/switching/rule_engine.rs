//! Fixed-order decision procedure.
//!
//! Rules are tried in order and the first one that produces a decision wins:
//!
//! 1. `force_create` on the context: create, confidence 1.0.
//! 2. An ACTIVE session already sits on this path or carries this name:
//!    nothing to do, confidence 0.9.
//! 3. The best PAUSED/COMPLETED candidate clears `similarity_threshold` and
//!    recent sessions are preferred: reactivate it, confidence 0.8.
//! 4. Too many ACTIVE sessions: the ones idle past
//!    `auto_complete_after_hours` are queued for completion (no decision).
//! 5. Otherwise create, confidence 0.9.
//!
//! The engine is pure: callers hand it the candidates and the active set.

use std::cmp::Ordering;

use chrono::{DateTime, Duration, Utc};
use log::{debug, trace};

use crate::configuration::types::SwitchRules;
use crate::session_management::{SessionRecord, SessionStatus};
use crate::switching::similarity::{recency_bucket, similarity};
use crate::switching::types::{SwitchContext, SwitchDecision, SwitchEvaluation};

pub const FORCED_CONFIDENCE: f64 = 1.0;
pub const ALREADY_ACTIVE_CONFIDENCE: f64 = 0.9;
pub const REACTIVATE_CONFIDENCE: f64 = 0.8;
pub const CREATE_CONFIDENCE: f64 = 0.9;

/// A candidate with the scores used to rank it.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCandidate {
    pub session: SessionRecord,
    pub similarity: f64,
    pub recency: f64,
}

#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: SwitchRules,
}

impl RuleEngine {
    pub fn new(rules: SwitchRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &SwitchRules {
        &self.rules
    }

    /// Orders candidates by similarity, then recency, best first.
    pub fn rank_candidates(
        &self,
        context: &SwitchContext,
        candidates: &[SessionRecord],
        now: DateTime<Utc>,
    ) -> Vec<ScoredCandidate> {
        let mut scored: Vec<ScoredCandidate> = candidates
            .iter()
            .map(|session| ScoredCandidate {
                similarity: similarity(session, context),
                recency: recency_bucket(session, now),
                session: session.clone(),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(Ordering::Equal)
                .then(b.recency.partial_cmp(&a.recency).unwrap_or(Ordering::Equal))
        });
        for c in &scored {
            trace!(
                "candidate {} ({}) similarity={:.2} recency={:.1}",
                c.session.id,
                c.session.project_name,
                c.similarity,
                c.recency
            );
        }
        scored
    }

    pub fn evaluate(
        &self,
        context: &SwitchContext,
        candidates: &[SessionRecord],
        active: &[SessionRecord],
        now: DateTime<Utc>,
    ) -> SwitchEvaluation {
        if context.force_create {
            let mut eval = SwitchEvaluation::new(SwitchDecision::CreateNew, FORCED_CONFIDENCE);
            eval.reasons.push("New session creation was forced".into());
            if self.rules.auto_pause_previous {
                eval.sessions_to_pause = active.to_vec();
            }
            return eval;
        }

        let context_name = context.project_name.to_lowercase();
        if let Some(current) = active.iter().find(|s| {
            s.project_path == context.project_path
                || (!context_name.is_empty() && s.project_name.to_lowercase() == context_name)
        }) {
            let mut eval =
                SwitchEvaluation::new(SwitchDecision::NoAction, ALREADY_ACTIVE_CONFIDENCE);
            eval.reasons.push(format!(
                "Session {} is already active for {}",
                current.id, current.project_name
            ));
            eval.target_session = Some(current.clone());
            return eval;
        }

        let resumable: Vec<SessionRecord> = candidates
            .iter()
            .filter(|s| matches!(s.status, SessionStatus::Paused | SessionStatus::Completed))
            .cloned()
            .collect();
        let ranked = self.rank_candidates(context, &resumable, now);
        if let Some(best) = ranked.first() {
            debug!(
                "best candidate {} scored {:.2} (threshold {:.2})",
                best.session.id, best.similarity, self.rules.similarity_threshold
            );
            if best.similarity >= self.rules.similarity_threshold
                && self.rules.prefer_recent_sessions
            {
                let mut eval = SwitchEvaluation::new(
                    SwitchDecision::ReactivateExisting,
                    REACTIVATE_CONFIDENCE,
                );
                eval.reasons.push(format!(
                    "Found {} session {} with similarity {:.2}",
                    best.session.status, best.session.id, best.similarity
                ));
                eval.target_session = Some(best.session.clone());
                if self.rules.auto_pause_previous {
                    eval.sessions_to_pause = active.to_vec();
                    if !active.is_empty() {
                        eval.reasons
                            .push(format!("Pausing {} active session(s)", active.len()));
                    }
                }
                return eval;
            }
        }

        let mut eval = SwitchEvaluation::new(SwitchDecision::CreateNew, CREATE_CONFIDENCE);

        if active.len() > self.rules.max_active_sessions {
            let idle_limit =
                Duration::try_hours(self.rules.auto_complete_after_hours).unwrap_or(Duration::MAX);
            eval.sessions_to_complete = active
                .iter()
                .filter(|s| s.idle_for(now) > idle_limit)
                .cloned()
                .collect();
            eval.reasons.push(format!(
                "{} active sessions exceed the limit of {}; {} idle for more than {}h",
                active.len(),
                self.rules.max_active_sessions,
                eval.sessions_to_complete.len(),
                self.rules.auto_complete_after_hours
            ));
        }

        eval.reasons.push(match ranked.first() {
            Some(best) => format!(
                "No sufficiently similar session (best {:.2})",
                best.similarity
            ),
            None => "No existing session matches this context".to_string(),
        });

        if self.rules.auto_pause_previous {
            eval.sessions_to_pause = active
                .iter()
                .filter(|s| !eval.sessions_to_complete.iter().any(|c| c.id == s.id))
                .cloned()
                .collect();
        }

        eval
    }
}
