use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use chrono::Duration;
use futures::future::join_all;
use futures::FutureExt;
use log::{debug, error, info, warn};
use serde_json::json;
use uuid::Uuid;

use crate::clock::Clock;
use crate::configuration::types::{OrphanPolicy, TerminationConfig, TransitionPolicy};
use crate::error_handling::types::SessionError;
use crate::session_management::{SessionRecord, TransitionOptions, TransitionValidator};
use crate::storage::{AuditEntry, LinkedMemory, MemoryUpdate, SessionBackup, Storage, WorkType};
use crate::termination::types::{
    BatchOptions, BatchSummary, BatchTerminationResult, TerminationContext, TerminationOptions,
    TerminationReason, TerminationReport, TerminationResult,
};

/// Appended to TODO items that were still open when their session ended.
pub const CLOSED_ON_TERMINATION_MARKER: &str = "[closed on termination]";

/// Audit action recorded for every finished termination.
pub const AUDIT_ACTION_TERMINATED: &str = "terminated";

/// Shuts sessions down in a fixed sequence: load, validate, back up,
/// finalise open TODOs, clean up links, persist the final status, report
/// and audit.
///
/// The public operations never return `Err`; every failure ends up in the
/// returned [`TerminationResult`].
pub struct TerminationCoordinator {
    storage: Arc<dyn Storage>,
    validator: TransitionValidator,
    clock: Arc<dyn Clock>,
    config: TerminationConfig,
}

impl TerminationCoordinator {
    pub fn new(
        storage: Arc<dyn Storage>,
        config: TerminationConfig,
        policy: TransitionPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            validator: TransitionValidator::new(policy, clock.clone()),
            clock,
            config,
        }
    }

    pub fn config(&self) -> &TerminationConfig {
        &self.config
    }

    pub async fn terminate_session(
        &self,
        session_id: Uuid,
        reason: TerminationReason,
        options: TerminationOptions,
    ) -> TerminationResult {
        let now = self.clock.now();
        let context = TerminationContext::resolve(session_id, reason, &options, &self.config, now);
        let mut result = TerminationResult::new(session_id, reason, now);

        match self.run(&context, &mut result).await {
            Ok(()) => {
                result.success = true;
                info!(
                    "Session {} terminated ({}), final status {}",
                    session_id,
                    reason,
                    result
                        .final_status
                        .map(|s| s.to_string())
                        .unwrap_or_default()
                );
            }
            Err(e) => {
                error!("Termination of session {} failed: {}", session_id, e);
                result.success = false;
                result.errors.push(e.to_string());
            }
        }
        result.finished_at = self.clock.now();
        result
    }

    /// Terminates as `ForceTerminated`, downgrading validation failures to
    /// warnings.
    pub async fn force_terminate_session(&self, session_id: Uuid) -> TerminationResult {
        self.terminate_session(
            session_id,
            TerminationReason::ForceTerminated,
            TerminationOptions::forced(),
        )
        .await
    }

    pub async fn terminate_multiple_sessions(
        &self,
        session_ids: &[Uuid],
        reason: TerminationReason,
        batch: BatchOptions,
    ) -> BatchTerminationResult {
        let started = Instant::now();
        let mut results: Vec<TerminationResult> = Vec::with_capacity(session_ids.len());

        if batch.parallel {
            let limit = batch
                .max_concurrency
                .unwrap_or(self.config.batch_concurrency)
                .max(1);
            debug!(
                "Terminating {} sessions, {} at a time",
                session_ids.len(),
                limit
            );
            for chunk in session_ids.chunks(limit) {
                let outcomes = join_all(
                    chunk
                        .iter()
                        .map(|&id| self.terminate_guarded(id, reason, batch.options.clone())),
                )
                .await;
                let chunk_failed = outcomes.iter().any(|r| !r.success);
                results.extend(outcomes);
                if chunk_failed && batch.stop_on_error {
                    warn!("Stopping batch termination after a failure");
                    break;
                }
            }
        } else {
            for &id in session_ids {
                let outcome = self
                    .terminate_guarded(id, reason, batch.options.clone())
                    .await;
                let failed = !outcome.success;
                results.push(outcome);
                if failed && batch.stop_on_error {
                    warn!("Stopping batch termination after session {} failed", id);
                    break;
                }
            }
        }

        let succeeded = results.iter().filter(|r| r.success).count();
        let summary = BatchSummary {
            requested: session_ids.len(),
            processed: results.len(),
            succeeded,
            failed: results.len() - succeeded,
            skipped: session_ids.len() - results.len(),
            elapsed_ms: started.elapsed().as_millis(),
        };
        info!(
            "Batch termination: {}/{} succeeded, {} failed, {} skipped",
            summary.succeeded, summary.requested, summary.failed, summary.skipped
        );

        BatchTerminationResult {
            success: summary.failed == 0 && summary.skipped == 0,
            results,
            summary,
        }
    }

    /// Runs one termination, turning a panic into a failed result.
    async fn terminate_guarded(
        &self,
        session_id: Uuid,
        reason: TerminationReason,
        options: TerminationOptions,
    ) -> TerminationResult {
        match AssertUnwindSafe(self.terminate_session(session_id, reason, options))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!("Termination of session {} panicked: {}", session_id, message);
                TerminationResult::failed(
                    session_id,
                    reason,
                    self.clock.now(),
                    format!("Termination panicked: {}", message),
                )
            }
        }
    }

    async fn run(
        &self,
        ctx: &TerminationContext,
        result: &mut TerminationResult,
    ) -> Result<(), SessionError> {
        let mut session = self
            .storage
            .get_session(ctx.session_id)
            .await?
            .ok_or(SessionError::NotFound(ctx.session_id))?;
        let linked = self.storage.get_session_memories(ctx.session_id).await?;

        self.validate(ctx, &session, &linked, result)?;

        if ctx.create_backup {
            self.backup(ctx, &session, &linked, result).await?;
        }

        self.finalize_open_items(&linked, result).await?;
        self.cleanup(ctx, &linked, result).await?;

        let final_status = ctx.reason.final_status();
        self.validator.change_state(
            &mut session,
            final_status,
            &TransitionOptions {
                force: ctx.force,
                reason: Some(format!("terminated: {}", ctx.reason)),
            },
        )?;
        let ended_at = *session.ended_at.get_or_insert(self.clock.now());
        session.total_work_time = (ended_at - session.started_at).num_seconds().max(0);
        session.memory_count = linked.len() as u64;
        session.updated_at = self.clock.now();
        self.storage.save_session(&session).await?;
        result.final_status = Some(session.status);

        if ctx.generate_report {
            result.report = Some(self.build_report(ctx, &session, &linked, result));
        }

        self.audit(ctx, result).await;
        Ok(())
    }

    fn validate(
        &self,
        ctx: &TerminationContext,
        session: &SessionRecord,
        linked: &[LinkedMemory],
        result: &mut TerminationResult,
    ) -> Result<(), SessionError> {
        if session.is_terminal() {
            let message = format!("Session {} is already {}", session.id, session.status);
            if !ctx.force {
                return Err(SessionError::Validation(message));
            }
            result.warnings.push(format!("{}; forcing termination", message));
        }

        let recent =
            Duration::try_minutes(self.config.recent_activity_minutes).unwrap_or(Duration::MAX);
        let idle = session.idle_for(self.clock.now());
        if idle < recent {
            result.warnings.push(format!(
                "Session had recent activity {}s ago",
                idle.num_seconds()
            ));
        }

        let open = linked
            .iter()
            .filter(|l| l.memory.work_type == WorkType::Todo)
            .count();
        if open > 0 {
            result
                .warnings
                .push(format!("Session has {} unfinished TODO item(s)", open));
        }
        Ok(())
    }

    async fn backup(
        &self,
        ctx: &TerminationContext,
        session: &SessionRecord,
        linked: &[LinkedMemory],
        result: &mut TerminationResult,
    ) -> Result<(), SessionError> {
        let backup = SessionBackup {
            id: Uuid::new_v4(),
            session: session.clone(),
            memories: linked.iter().map(|l| l.memory.clone()).collect(),
            created_at: self.clock.now(),
        };
        match self.storage.save_backup(&backup).await {
            Ok(()) => {
                debug!("Backup {} stored for session {}", backup.id, session.id);
                result.backup_id = Some(backup.id);
                Ok(())
            }
            Err(e) if ctx.require_backup => Err(SessionError::Backend(e)),
            Err(e) => {
                warn!("Backup of session {} failed, continuing: {}", session.id, e);
                result.warnings.push(format!("Backup failed: {}", e));
                Ok(())
            }
        }
    }

    async fn finalize_open_items(
        &self,
        linked: &[LinkedMemory],
        result: &mut TerminationResult,
    ) -> Result<(), SessionError> {
        let now = self.clock.now();
        let stamp = now.to_rfc3339();
        let updates: Vec<MemoryUpdate> = linked
            .iter()
            .filter(|l| l.memory.work_type == WorkType::Todo)
            .map(|l| MemoryUpdate {
                id: l.memory.id,
                work_type: WorkType::Memory,
                content: format!(
                    "{}\n\n{} {}",
                    l.memory.content, CLOSED_ON_TERMINATION_MARKER, stamp
                ),
                updated_at: now,
            })
            .collect();

        result.cleanup.memories_processed = linked.len();
        if updates.is_empty() {
            return Ok(());
        }
        let converted = self.storage.update_memories(&updates).await?;
        result.cleanup.todos_converted = converted;
        result.warnings.push(format!(
            "Converted {} unfinished TODO item(s) to memories",
            converted
        ));
        Ok(())
    }

    async fn cleanup(
        &self,
        ctx: &TerminationContext,
        linked: &[LinkedMemory],
        result: &mut TerminationResult,
    ) -> Result<(), SessionError> {
        let orphans: Vec<Uuid> = linked
            .iter()
            .filter(|l| l.is_orphan())
            .map(|l| l.memory.id)
            .collect();
        result.cleanup.orphans_found = orphans.len();

        if !orphans.is_empty() {
            match ctx.orphaned_memories {
                OrphanPolicy::Keep => {}
                OrphanPolicy::Archive => {
                    result.cleanup.memories_archived =
                        self.storage.archive_memories(&orphans).await?;
                }
                OrphanPolicy::Delete => {
                    result.cleanup.memories_deleted =
                        self.storage.delete_memories(&orphans).await?;
                }
            }
        }

        result.cleanup.links_removed = self.storage.remove_session_links(ctx.session_id).await?;

        match self.storage.clear_session_cache(ctx.session_id).await {
            Ok(freed) => result.cleanup.resources_freed = freed,
            Err(e) => warn!(
                "Clearing cache of session {} failed, ignoring: {}",
                ctx.session_id, e
            ),
        }
        Ok(())
    }

    fn build_report(
        &self,
        ctx: &TerminationContext,
        session: &SessionRecord,
        linked: &[LinkedMemory],
        result: &TerminationResult,
    ) -> TerminationReport {
        let open = linked
            .iter()
            .filter(|l| l.memory.work_type == WorkType::Todo)
            .count();
        let completed = linked.len() - open;
        let completion_ratio = if linked.is_empty() {
            1.0
        } else {
            completed as f64 / linked.len() as f64
        };

        let cleanup = &result.cleanup;
        let mut notes = Vec::new();
        let kept = linked.len() - cleanup.memories_deleted;
        notes.push(format!("{} linked memories preserved", kept));
        match ctx.orphaned_memories {
            OrphanPolicy::Keep if cleanup.orphans_found > 0 => notes.push(format!(
                "{} orphaned memories kept unlinked",
                cleanup.orphans_found
            )),
            OrphanPolicy::Archive if cleanup.memories_archived > 0 => notes.push(format!(
                "{} orphaned memories archived",
                cleanup.memories_archived
            )),
            OrphanPolicy::Delete if cleanup.memories_deleted > 0 => notes.push(format!(
                "{} orphaned memories deleted",
                cleanup.memories_deleted
            )),
            _ => {}
        }
        if let Some(backup) = result.backup_id {
            notes.push(format!("Backup {} stored", backup));
        }

        let hours = session.total_work_time / 3600;
        let minutes = (session.total_work_time % 3600) / 60;
        let summary = format!(
            "Session {} ({}) ended as {} after {}h {}m; {} of {} items complete ({:.0}%)",
            session.id,
            session.project_name,
            session.status,
            hours,
            minutes,
            completed,
            linked.len(),
            completion_ratio * 100.0
        );

        TerminationReport {
            session_id: session.id,
            project_name: session.project_name.clone(),
            final_status: session.status,
            duration_secs: session.total_work_time,
            total_memories: linked.len(),
            completed_items: completed,
            open_items: open,
            completion_ratio,
            preservation_notes: notes,
            summary,
        }
    }

    /// The session is already finalised here, so a failed audit write is
    /// reported as a warning.
    async fn audit(&self, ctx: &TerminationContext, result: &mut TerminationResult) {
        let entry = AuditEntry {
            session_id: ctx.session_id,
            action: AUDIT_ACTION_TERMINATED.to_string(),
            reason: ctx.reason.as_str().to_string(),
            details: json!({
                "final_status": result.final_status,
                "forced": ctx.force,
                "backup_id": result.backup_id,
                "cleanup": result.cleanup,
                "warnings": result.warnings.len(),
            }),
            created_at: self.clock.now(),
        };
        if let Err(e) = self.storage.append_audit_entry(&entry).await {
            warn!("Audit entry for session {} not written: {}", ctx.session_id, e);
            result.warnings.push(format!("Audit entry not written: {}", e));
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
