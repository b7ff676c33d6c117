use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::configuration::types::{SwitchRules, TransitionPolicy};
use crate::error_handling::types::SessionError;
use crate::session_management::{
    SessionRecord, SessionStatus, TransitionOptions, TransitionValidator,
};
use crate::storage::session_filter::{by_git_repository, by_project_name, by_project_path, with_status};
use crate::storage::Storage;
use crate::switching::project_analyzer::ProjectAnalyzer;
use crate::switching::rule_engine::RuleEngine;
use crate::switching::types::{SwitchContext, SwitchDecision, SwitchEvaluation, SwitchResult};

/// Turns rule-engine verdicts into storage mutations.
///
/// Execution order inside one switch is fixed: pauses, then completions,
/// then reactivation or creation of the target. Each step is an independent
/// write; a failing step is reported in [`SwitchResult::errors`] and the
/// remaining steps still run.
pub struct SwitchCoordinator {
    storage: Arc<dyn Storage>,
    engine: RuleEngine,
    validator: TransitionValidator,
    clock: Arc<dyn Clock>,
    analyzer: Option<Arc<dyn ProjectAnalyzer>>,
}

impl SwitchCoordinator {
    pub fn new(
        storage: Arc<dyn Storage>,
        rules: SwitchRules,
        policy: TransitionPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            engine: RuleEngine::new(rules),
            validator: TransitionValidator::new(policy, clock.clone()),
            clock,
            analyzer: None,
        }
    }

    pub fn with_analyzer(mut self, analyzer: Arc<dyn ProjectAnalyzer>) -> Self {
        self.analyzer = Some(analyzer);
        self
    }

    pub fn engine(&self) -> &RuleEngine {
        &self.engine
    }

    pub fn validator(&self) -> &TransitionValidator {
        &self.validator
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub async fn active_sessions(&self) -> Result<Vec<SessionRecord>, SessionError> {
        Ok(self
            .storage
            .get_sessions(&with_status(SessionStatus::Active))
            .await?)
    }

    /// Sessions matching the context by name, exact path or repository.
    ///
    /// Each criterion is looked up separately and capped at
    /// `candidate_lookup_limit`; the union is de-duplicated by id.
    pub async fn find_candidates(
        &self,
        context: &SwitchContext,
    ) -> Result<Vec<SessionRecord>, SessionError> {
        let limit = self.engine.rules().candidate_lookup_limit;
        let mut filters = Vec::with_capacity(3);
        if !context.project_name.is_empty() {
            filters.push(by_project_name(context.project_name.as_str()).limit(limit));
        }
        filters.push(by_project_path(context.project_path.as_str()).limit(limit));
        if let Some(repo) = &context.git_repository {
            filters.push(by_git_repository(repo.as_str()).limit(limit));
        }

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for filter in &filters {
            for session in self.storage.get_sessions(filter).await? {
                if seen.insert(session.id) {
                    candidates.push(session);
                }
            }
        }
        debug!(
            "{} candidate(s) for {} ({})",
            candidates.len(),
            context.project_name,
            context.project_path
        );
        Ok(candidates)
    }

    /// Decides what a switch to `context` would do. Reads only.
    pub async fn evaluate(&self, context: &SwitchContext) -> Result<SwitchEvaluation, SessionError> {
        let active = self.active_sessions().await?;
        let candidates = self.find_candidates(context).await?;
        Ok(self
            .engine
            .evaluate(context, &candidates, &active, self.clock.now()))
    }

    /// Evaluates `context` and applies the verdict.
    pub async fn switch_session(&self, context: &SwitchContext) -> Result<SwitchResult, SessionError> {
        let evaluation = self.evaluate(context).await?;
        Ok(self.execute(context, evaluation).await)
    }

    /// Applies an evaluation produced earlier for `context`.
    pub async fn execute(&self, context: &SwitchContext, evaluation: SwitchEvaluation) -> SwitchResult {
        let mut changes = Vec::new();
        let mut errors = Vec::new();

        for session in &evaluation.sessions_to_pause {
            match self.move_session(session.id, SessionStatus::Paused, "paused by switch").await {
                Ok(true) => changes.push(format!(
                    "Paused session {} ({})",
                    session.id, session.project_name
                )),
                Ok(false) => {}
                Err(e) => errors.push(format!("Failed to pause session {}: {}", session.id, e)),
            }
        }

        for session in &evaluation.sessions_to_complete {
            match self
                .move_session(session.id, SessionStatus::Completed, "idle past auto-complete limit")
                .await
            {
                Ok(true) => changes.push(format!(
                    "Completed idle session {} ({})",
                    session.id, session.project_name
                )),
                Ok(false) => {}
                Err(e) => errors.push(format!("Failed to complete session {}: {}", session.id, e)),
            }
        }

        let target = match evaluation.decision {
            SwitchDecision::ReactivateExisting => match &evaluation.target_session {
                Some(target) => match self.reactivate(target.id).await {
                    Ok(session) => {
                        changes.push(format!(
                            "Reactivated session {} ({})",
                            session.id, session.project_name
                        ));
                        Some(session)
                    }
                    Err(e) => {
                        errors.push(format!("Failed to reactivate session {}: {}", target.id, e));
                        Some(target.clone())
                    }
                },
                None => {
                    errors.push("Reactivation requested without a target session".to_string());
                    None
                }
            },
            SwitchDecision::CreateNew => match self.create(context).await {
                Ok(session) => {
                    changes.push(format!(
                        "Created session {} ({})",
                        session.id, session.project_name
                    ));
                    Some(session)
                }
                Err(e) => {
                    errors.push(format!("Failed to create session: {}", e));
                    None
                }
            },
            SwitchDecision::NoAction => evaluation.target_session.clone(),
        };

        if errors.is_empty() {
            info!(
                "Switch to {} finished: {} ({} change(s))",
                context.project_path,
                evaluation.decision,
                changes.len()
            );
        } else {
            warn!(
                "Switch to {} finished with {} error(s): {}",
                context.project_path,
                errors.len(),
                errors.join("; ")
            );
        }

        SwitchResult {
            success: errors.is_empty(),
            switched: !changes.is_empty(),
            decision: evaluation.decision,
            target_session: target,
            changes,
            confidence: evaluation.confidence,
            reasons: evaluation.reasons,
            errors,
        }
    }

    async fn load(&self, id: Uuid) -> Result<SessionRecord, SessionError> {
        self.storage
            .get_session(id)
            .await?
            .ok_or(SessionError::NotFound(id))
    }

    /// Re-reads the session and applies one transition. `Ok(false)` when the
    /// session already had that status.
    async fn move_session(
        &self,
        id: Uuid,
        to: SessionStatus,
        reason: &str,
    ) -> Result<bool, SessionError> {
        let mut session = self.load(id).await?;
        let outcome = self.validator.change_state(
            &mut session,
            to,
            &TransitionOptions::default().with_reason(reason),
        )?;
        if outcome.changed {
            self.storage.save_session(&session).await?;
        }
        Ok(outcome.changed)
    }

    async fn reactivate(&self, id: Uuid) -> Result<SessionRecord, SessionError> {
        let mut session = self.load(id).await?;
        self.validator.activate(
            &mut session,
            &TransitionOptions::default().with_reason("reactivated by switch"),
        )?;
        session.record_activity(self.clock.now());
        self.storage.save_session(&session).await?;
        Ok(session)
    }

    async fn create(&self, context: &SwitchContext) -> Result<SessionRecord, SessionError> {
        let mut session = SessionRecord::new_auto(context, self.clock.now());

        if let Some(analyzer) = &self.analyzer {
            match analyzer.analyze(Path::new(&context.project_path)).await {
                Ok(metadata) => {
                    if let Some(kind) = &metadata.project_type {
                        session.description = format!("{} ({} project)", session.description, kind);
                    }
                    session.tags.extend(metadata.tags);
                }
                Err(e) => warn!(
                    "Project analysis of {} failed, continuing without it: {}",
                    context.project_path, e
                ),
            }
        }

        self.storage.insert_session(&session).await?;
        Ok(session)
    }
}
