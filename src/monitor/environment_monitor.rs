use std::collections::{HashMap, VecDeque};
use std::future;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use log::{debug, error, info, trace, warn};
use tokio::sync::mpsc::{self, Sender, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use uuid::Uuid;

use crate::configuration::types::{MonitorConfig, SwitchPolicy};
use crate::error_handling::types::MonitorError;
use crate::monitor::debounce::Debouncer;
use crate::monitor::location::{check_path, detect_git_remote, project_name_from_path, LocationProvider};
use crate::monitor::types::{MonitorEvent, MonitorPhase, PendingPrompt, SwitchEvent, SwitchTrigger};
use crate::switching::switch_coordinator::SwitchCoordinator;
use crate::switching::types::{SwitchContext, SwitchDecision, SwitchEvaluation, SwitchResult};

/// Confidence recorded for switches forced through [`EnvironmentMonitor::force_switch`].
pub const FORCED_SWITCH_CONFIDENCE: f64 = 1.0;

enum Command {
    PathChanged(String),
}

struct PromptEntry {
    prompt: PendingPrompt,
    timer: JoinHandle<()>,
}

struct MonitorState {
    running: bool,
    /// Last location reported by the location provider.
    last_polled: Option<String>,
    /// Last location observed, polled or triggered.
    last_path: Option<String>,
    /// Last location that made it through the debounce.
    settled_path: Option<String>,
    debouncer: Debouncer,
    history: VecDeque<SwitchEvent>,
    /// Times of successful switches within the rate-limit window.
    recent_switches: VecDeque<DateTime<Utc>>,
    prompts: HashMap<Uuid, PromptEntry>,
    loop_task: Option<JoinHandle<()>>,
    commands: Option<UnboundedSender<Command>>,
}

struct Inner {
    config: MonitorConfig,
    coordinator: Arc<SwitchCoordinator>,
    location: Arc<dyn LocationProvider>,
    events: Sender<MonitorEvent>,
    state: Mutex<MonitorState>,
}

/// Watches the working location and switches sessions when it changes.
///
/// The monitor owns one background task that multiplexes three inputs:
///
/// ```text
///   poll tick ──┐
///   trigger ────┼──▶ debounce ──▶ filters ──▶ rate limit ──▶ evaluate ──▶ policy
///   settle ─────┘                                                          │
///                                       SwitchCompleted / PromptRequired ◀─┘
/// ```
///
/// Notifications go out on the [`MonitorEvent`] channel passed to
/// [`EnvironmentMonitor::new`]. A full or closed channel drops the event.
///
/// Switch execution runs on its own task, so `stop()` never interrupts a
/// switch that already started.
pub struct EnvironmentMonitor {
    inner: Arc<Inner>,
}

impl EnvironmentMonitor {
    pub fn new(
        config: MonitorConfig,
        coordinator: Arc<SwitchCoordinator>,
        location: Arc<dyn LocationProvider>,
        events: Sender<MonitorEvent>,
    ) -> Self {
        let debouncer = Debouncer::new(config.debounce());
        Self {
            inner: Arc::new(Inner {
                config,
                coordinator,
                location,
                events,
                state: Mutex::new(MonitorState {
                    running: false,
                    last_polled: None,
                    last_path: None,
                    settled_path: None,
                    debouncer,
                    history: VecDeque::new(),
                    recent_switches: VecDeque::new(),
                    prompts: HashMap::new(),
                    loop_task: None,
                    commands: None,
                }),
            }),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.inner.config
    }

    /// Spawns the monitoring task. No-op when already running.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut state = self.inner.lock();
        if state.running {
            debug!("Environment monitor already running");
            return;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        state.running = true;
        state.commands = Some(tx);
        state.loop_task = Some(tokio::spawn(run_loop(self.inner.clone(), rx)));
        info!(
            "Environment monitor started (policy {:?}, poll every {}ms, debounce {}ms)",
            self.inner.config.policy, self.inner.config.poll_interval_ms, self.inner.config.debounce_ms
        );
    }

    /// Stops polling, cancels the debounce and prompt timers and discards
    /// pending prompts. No-op when already stopped.
    pub fn stop(&self) {
        let mut state = self.inner.lock();
        if !state.running {
            return;
        }
        state.running = false;
        state.commands = None;
        if let Some(task) = state.loop_task.take() {
            task.abort();
        }
        let discarded = state.prompts.len();
        for (_, entry) in state.prompts.drain() {
            entry.timer.abort();
        }
        state.debouncer.reset();
        info!(
            "Environment monitor stopped ({} pending prompt(s) discarded)",
            discarded
        );
    }

    pub fn is_running(&self) -> bool {
        self.inner.lock().running
    }

    pub fn phase(&self) -> MonitorPhase {
        self.inner.lock().debouncer.phase()
    }

    pub fn last_path(&self) -> Option<String> {
        self.inner.lock().last_path.clone()
    }

    /// Executed switches, oldest first.
    pub fn switch_history(&self) -> Vec<SwitchEvent> {
        self.inner.lock().history.iter().cloned().collect()
    }

    pub fn pending_prompts(&self) -> Vec<PendingPrompt> {
        let mut prompts: Vec<PendingPrompt> = self
            .inner
            .lock()
            .prompts
            .values()
            .map(|entry| entry.prompt.clone())
            .collect();
        prompts.sort_by_key(|p| p.created_at);
        prompts
    }

    /// Feeds a location change as if the poller had seen it.
    pub fn trigger_path_change(&self, path: impl Into<String>) -> Result<(), MonitorError> {
        let state = self.inner.lock();
        if !state.running {
            return Err(MonitorError::NotRunning);
        }
        match &state.commands {
            Some(commands) => commands
                .send(Command::PathChanged(path.into()))
                .map_err(|_| MonitorError::NotRunning),
            None => Err(MonitorError::NotRunning),
        }
    }

    /// Switches to `context` ignoring policy, threshold, filters and the rate
    /// limit.
    pub async fn force_switch(&self, context: SwitchContext) -> Result<SwitchResult, MonitorError> {
        let mut evaluation = self.inner.coordinator.evaluate(&context).await?;
        evaluation.confidence = FORCED_SWITCH_CONFIDENCE;
        evaluation.reasons.push("Switch forced by caller".to_string());
        let old_path = self.inner.lock().settled_path.clone();
        info!("Forcing switch to {}", context.project_path);
        Ok(self
            .inner
            .execute_switch(old_path, context, evaluation, SwitchTrigger::Forced)
            .await)
    }

    /// Resolves a pending prompt. Each prompt can be answered once;
    /// approving executes the stored evaluation and returns its result.
    pub async fn respond_to_prompt(
        &self,
        id: Uuid,
        approved: bool,
    ) -> Result<Option<SwitchResult>, MonitorError> {
        let entry = self
            .inner
            .lock()
            .prompts
            .remove(&id)
            .ok_or(MonitorError::PromptNotFound(id))?;
        entry.timer.abort();

        if !approved {
            info!("Prompt {} declined", id);
            return Ok(None);
        }

        info!("Prompt {} approved", id);
        let prompt = entry.prompt;
        let result = self
            .inner
            .execute_switch(
                prompt.old_path,
                prompt.context,
                prompt.evaluation,
                SwitchTrigger::Approved,
            )
            .await;
        Ok(Some(result))
    }
}

impl Drop for EnvironmentMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_loop(inner: Arc<Inner>, mut commands: UnboundedReceiver<Command>) {
    let mut ticker = time::interval(inner.config.poll_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let deadline = inner.lock().debouncer.deadline();
        tokio::select! {
            biased;
            _ = ticker.tick() => inner.poll_location().await,
            Some(command) = commands.recv() => match command {
                Command::PathChanged(path) => inner.observe(path),
            },
            _ = sleep_until(deadline) => inner.process_settled().await,
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

/// Drops switch times older than one hour before `now`.
fn prune_window(recent: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
    let window_start = now - ChronoDuration::hours(1);
    recent.retain(|at| *at > window_start);
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, MonitorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn emit(&self, event: MonitorEvent) {
        if let Err(e) = self.events.try_send(event) {
            debug!("Monitor event dropped: {}", e);
        }
    }

    async fn poll_location(&self) {
        let current = match self.location.current_location().await {
            Ok(path) => path,
            Err(e) => {
                warn!("Unable to read the working location: {}", e);
                return;
            }
        };

        let mut state = self.lock();
        match state.last_polled.clone() {
            None => {
                trace!("baseline location {}", current);
                state.last_polled = Some(current.clone());
                state.last_path.get_or_insert(current.clone());
                state.settled_path.get_or_insert(current);
            }
            Some(previous) if previous == current => {}
            Some(_) => {
                state.last_polled = Some(current.clone());
                drop(state);
                self.observe(current);
            }
        }
    }

    fn observe(&self, path: String) {
        let mut state = self.lock();
        if state.last_path.as_deref() == Some(path.as_str()) {
            return;
        }
        let old = state.last_path.replace(path.clone());
        state.debouncer.observe(path.clone(), Instant::now());
        drop(state);

        debug!("Location changed: {:?} -> {}", old, path);
        self.emit(MonitorEvent::PathChanged { old, new: path });
    }

    async fn process_settled(self: &Arc<Self>) {
        let Some(path) = self.lock().debouncer.fire(Instant::now()) else {
            return;
        };
        self.handle_settled(path).await;
        self.lock().debouncer.finish();
    }

    fn successful_switches_last_hour(&self) -> usize {
        let now = self.coordinator.clock().now();
        let mut state = self.lock();
        prune_window(&mut state.recent_switches, now);
        state.recent_switches.len()
    }

    async fn build_context(&self, path: &str) -> SwitchContext {
        let mut context = SwitchContext::new(path, project_name_from_path(path));
        if self.config.detect_git_remote {
            context.git_repository = detect_git_remote(path).await;
        }
        context
    }

    async fn handle_settled(self: &Arc<Self>, path: String) {
        let old_path = self.lock().settled_path.replace(path.clone());

        if self.config.policy == SwitchPolicy::Disabled {
            trace!("switching disabled, ignoring {}", path);
            return;
        }
        if let Err(e) = check_path(&path, &self.config) {
            debug!("Ignoring location change: {}", e);
            return;
        }
        let recent = self.successful_switches_last_hour();
        if recent >= self.config.max_switches_per_hour {
            info!(
                "Rate limit reached ({} switches in the last hour), dropping change to {}",
                recent, path
            );
            return;
        }

        let context = self.build_context(&path).await;
        let evaluation = match self.coordinator.evaluate(&context).await {
            Ok(evaluation) => evaluation,
            Err(e) => {
                error!("Evaluation for {} failed: {}", path, e);
                self.emit(MonitorEvent::SwitchFailed {
                    path,
                    error: e.to_string(),
                });
                return;
            }
        };
        debug!(
            "Evaluation for {}: {} at {:.2}",
            path, evaluation.decision, evaluation.confidence
        );

        if evaluation.decision == SwitchDecision::NoAction {
            return;
        }
        let confident = evaluation.confidence >= self.config.auto_switch_threshold;

        match self.config.policy {
            SwitchPolicy::Auto if confident && !self.config.require_confirmation => {
                self.execute_switch(old_path, context, evaluation, SwitchTrigger::Automatic)
                    .await;
            }
            SwitchPolicy::Auto | SwitchPolicy::Prompt
                if confident || self.config.require_confirmation =>
            {
                self.create_prompt(old_path, context, evaluation);
            }
            _ => self.emit(MonitorEvent::SwitchSuggested {
                context,
                evaluation,
            }),
        }
    }

    fn create_prompt(
        self: &Arc<Self>,
        old_path: Option<String>,
        context: SwitchContext,
        evaluation: SwitchEvaluation,
    ) {
        let now = self.coordinator.clock().now();
        let timeout = self.config.prompt_timeout();
        let prompt = PendingPrompt {
            id: Uuid::new_v4(),
            old_path,
            context,
            evaluation,
            created_at: now,
            expires_at: now
                + ChronoDuration::from_std(timeout).unwrap_or_else(|_| ChronoDuration::zero()),
        };

        let id = prompt.id;
        let mut state = self.lock();
        if !state.running {
            return;
        }
        // The entry is in place before its timer can fire.
        let inner = Arc::clone(self);
        let timer = tokio::spawn(async move {
            time::sleep(timeout).await;
            inner.expire_prompt(id);
        });
        state.prompts.insert(
            id,
            PromptEntry {
                prompt: prompt.clone(),
                timer,
            },
        );

        info!(
            "Prompt {} created: {} for {}",
            id, prompt.evaluation.decision, prompt.context.project_path
        );
        self.emit(MonitorEvent::PromptRequired(prompt));
    }

    fn expire_prompt(&self, id: Uuid) {
        if self.lock().prompts.remove(&id).is_some() {
            info!("Prompt {} expired without an answer", id);
            self.emit(MonitorEvent::PromptExpired { id });
        }
    }

    /// Runs the switch on its own task. The task also records the outcome,
    /// so a `stop()` while it runs does not lose the history entry.
    async fn execute_switch(
        self: &Arc<Self>,
        old_path: Option<String>,
        context: SwitchContext,
        evaluation: SwitchEvaluation,
        trigger: SwitchTrigger,
    ) -> SwitchResult {
        let inner = Arc::clone(self);
        let fallback = evaluation.clone();
        let path = context.project_path.clone();
        let task = tokio::spawn(async move {
            let result = inner.coordinator.execute(&context, evaluation.clone()).await;
            inner.record_switch(old_path, context.project_path, evaluation, trigger, &result);
            result
        });

        match task.await {
            Ok(result) => result,
            Err(e) => {
                error!("Switch task for {} failed: {}", path, e);
                let error = format!("Switch task failed: {}", e);
                self.emit(MonitorEvent::SwitchFailed {
                    path,
                    error: error.clone(),
                });
                SwitchResult {
                    success: false,
                    switched: false,
                    decision: fallback.decision,
                    target_session: None,
                    changes: Vec::new(),
                    confidence: fallback.confidence,
                    reasons: fallback.reasons,
                    errors: vec![error],
                }
            }
        }
    }

    fn record_switch(
        &self,
        old_path: Option<String>,
        new_path: String,
        evaluation: SwitchEvaluation,
        trigger: SwitchTrigger,
        result: &SwitchResult,
    ) {
        let now = self.coordinator.clock().now();
        let event = SwitchEvent {
            id: Uuid::new_v4(),
            old_path,
            new_path,
            evaluation,
            trigger,
            result: result.clone(),
            success: result.success,
            timestamp: now,
        };

        {
            let mut state = self.lock();
            state.history.push_back(event.clone());
            while state.history.len() > self.config.history_limit {
                state.history.pop_front();
            }
            prune_window(&mut state.recent_switches, now);
            if result.success {
                state.recent_switches.push_back(now);
            }
        }

        if result.success {
            self.emit(MonitorEvent::SwitchCompleted(event));
        } else {
            self.emit(MonitorEvent::SwitchFailed {
                path: event.new_path,
                error: result.errors.join("; "),
            });
        }
    }
}
