#[cfg(test)]
mod tests {
    use crate::clock::ManualClock;
    use crate::configuration::types::{MonitorConfig, SwitchPolicy, SwitchRules, TransitionPolicy};
    use crate::error_handling::types::{MonitorError, StorageError};
    use crate::monitor::{
        EnvironmentMonitor, FixedLocation, MonitorEvent, MonitorPhase, SwitchTrigger,
    };
    use crate::session_management::SessionRecord;
    use crate::storage::{
        AuditEntry, LinkedMemory, MemoryStorage, MemoryUpdate, SessionBackup, SessionFilter,
        Storage,
    };
    use crate::switching::{SwitchContext, SwitchCoordinator, SwitchDecision};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc::{self, Receiver};
    use tokio::time::{sleep, timeout};
    use tokio_test::{assert_err, assert_ok};
    use uuid::Uuid;

    struct Harness {
        monitor: EnvironmentMonitor,
        events: Receiver<MonitorEvent>,
        storage: Arc<MemoryStorage>,
        coordinator: Arc<SwitchCoordinator>,
        location: Arc<FixedLocation>,
        clock: Arc<ManualClock>,
    }

    // Git lookups spawn a process, which would let paused time run ahead.
    fn config(policy: SwitchPolicy) -> MonitorConfig {
        MonitorConfig {
            policy,
            poll_interval_ms: 1_000,
            debounce_ms: 2_000,
            prompt_timeout_secs: 30,
            detect_git_remote: false,
            ..Default::default()
        }
    }

    fn harness(config: MonitorConfig) -> Harness {
        let storage = Arc::new(MemoryStorage::new());
        harness_on(config, storage.clone(), storage)
    }

    /// `backend` serves the coordinator; `storage` is what assertions read.
    fn harness_on(
        config: MonitorConfig,
        storage: Arc<MemoryStorage>,
        backend: Arc<dyn Storage>,
    ) -> Harness {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap(),
        ));
        let coordinator = Arc::new(SwitchCoordinator::new(
            backend,
            SwitchRules::default(),
            TransitionPolicy::default(),
            clock.clone(),
        ));
        let location = Arc::new(FixedLocation::new("/home/dev"));
        let (tx, rx) = mpsc::channel(256);
        let monitor = EnvironmentMonitor::new(config, coordinator.clone(), location.clone(), tx);
        Harness {
            monitor,
            events: rx,
            storage,
            coordinator,
            location,
            clock,
        }
    }

    /// Holds every session insert for a few seconds.
    struct SlowInserts(Arc<MemoryStorage>);

    #[async_trait]
    impl Storage for SlowInserts {
        async fn get_session(&self, id: Uuid) -> Result<Option<SessionRecord>, StorageError> {
            self.0.get_session(id).await
        }
        async fn get_sessions(&self, f: &SessionFilter) -> Result<Vec<SessionRecord>, StorageError> {
            self.0.get_sessions(f).await
        }
        async fn insert_session(&self, s: &SessionRecord) -> Result<(), StorageError> {
            sleep(Duration::from_secs(5)).await;
            self.0.insert_session(s).await
        }
        async fn save_session(&self, s: &SessionRecord) -> Result<(), StorageError> {
            self.0.save_session(s).await
        }
        async fn get_session_memories(&self, id: Uuid) -> Result<Vec<LinkedMemory>, StorageError> {
            self.0.get_session_memories(id).await
        }
        async fn update_memories(&self, u: &[MemoryUpdate]) -> Result<usize, StorageError> {
            self.0.update_memories(u).await
        }
        async fn archive_memories(&self, ids: &[Uuid]) -> Result<usize, StorageError> {
            self.0.archive_memories(ids).await
        }
        async fn delete_memories(&self, ids: &[Uuid]) -> Result<usize, StorageError> {
            self.0.delete_memories(ids).await
        }
        async fn remove_session_links(&self, id: Uuid) -> Result<usize, StorageError> {
            self.0.remove_session_links(id).await
        }
        async fn clear_session_cache(&self, id: Uuid) -> Result<usize, StorageError> {
            self.0.clear_session_cache(id).await
        }
        async fn save_backup(&self, b: &SessionBackup) -> Result<(), StorageError> {
            self.0.save_backup(b).await
        }
        async fn append_audit_entry(&self, e: &AuditEntry) -> Result<(), StorageError> {
            self.0.append_audit_entry(e).await
        }
    }

    async fn next_event(rx: &mut Receiver<MonitorEvent>) -> MonitorEvent {
        timeout(Duration::from_secs(300), rx.recv())
            .await
            .expect("timed out waiting for a monitor event")
            .expect("event channel closed")
    }

    async fn assert_quiet(rx: &mut Receiver<MonitorEvent>, window: Duration) {
        if let Ok(event) = timeout(window, rx.recv()).await {
            panic!("unexpected monitor event: {:?}", event);
        }
    }

    async fn expect_path_changed(rx: &mut Receiver<MonitorEvent>, expected: &str) {
        match next_event(rx).await {
            MonitorEvent::PathChanged { new, .. } => assert_eq!(new, expected),
            other => panic!("expected PathChanged, got {:?}", other),
        }
    }

    async fn session_count(storage: &MemoryStorage) -> usize {
        storage
            .get_sessions(&SessionFilter::default())
            .await
            .unwrap()
            .len()
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_changes_are_processed_once() {
        let mut h = harness(config(SwitchPolicy::Manual));
        h.monitor.start();

        assert_ok!(h.monitor.trigger_path_change("/w/alpha"));
        sleep(Duration::from_millis(500)).await;
        assert_ok!(h.monitor.trigger_path_change("/w/beta"));
        sleep(Duration::from_millis(500)).await;
        assert_ok!(h.monitor.trigger_path_change("/w/gamma"));

        for path in ["/w/alpha", "/w/beta", "/w/gamma"] {
            expect_path_changed(&mut h.events, path).await;
        }
        match next_event(&mut h.events).await {
            MonitorEvent::SwitchSuggested { context, evaluation } => {
                assert_eq!(context.project_path, "/w/gamma");
                assert_eq!(context.project_name, "gamma");
                assert_eq!(evaluation.decision, SwitchDecision::CreateNew);
            }
            other => panic!("expected SwitchSuggested, got {:?}", other),
        }
        assert_quiet(&mut h.events, Duration::from_secs(30)).await;

        assert_eq!(h.monitor.phase(), MonitorPhase::Idle);
        assert_eq!(h.monitor.last_path().as_deref(), Some("/w/gamma"));
        assert_eq!(session_count(&h.storage).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polled_location_change_is_detected() {
        let mut h = harness(config(SwitchPolicy::Manual));
        h.monitor.start();
        sleep(Duration::from_millis(10)).await;

        h.location.set("/w/polled");
        match next_event(&mut h.events).await {
            MonitorEvent::PathChanged { old, new } => {
                assert_eq!(old.as_deref(), Some("/home/dev"));
                assert_eq!(new, "/w/polled");
            }
            other => panic!("expected PathChanged, got {:?}", other),
        }
        assert!(matches!(
            next_event(&mut h.events).await,
            MonitorEvent::SwitchSuggested { .. }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_policy_executes_and_records_history() {
        let mut h = harness(config(SwitchPolicy::Auto));
        h.monitor.start();

        h.monitor.trigger_path_change("/w/app").unwrap();
        expect_path_changed(&mut h.events, "/w/app").await;
        match next_event(&mut h.events).await {
            MonitorEvent::SwitchCompleted(event) => {
                assert_eq!(event.trigger, SwitchTrigger::Automatic);
                assert_eq!(event.new_path, "/w/app");
                assert_eq!(event.old_path.as_deref(), Some("/home/dev"));
                assert!(event.success);
                assert_eq!(event.result.decision, SwitchDecision::CreateNew);
            }
            other => panic!("expected SwitchCompleted, got {:?}", other),
        }

        let history = h.monitor.switch_history();
        assert_eq!(history.len(), 1);
        let sessions = h.storage.get_sessions(&SessionFilter::default()).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].project_name, "app");
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_is_bounded() {
        let mut h = harness(MonitorConfig {
            history_limit: 1,
            ..config(SwitchPolicy::Auto)
        });
        h.monitor.start();

        for path in ["/w/one", "/w/two"] {
            h.monitor.trigger_path_change(path).unwrap();
            expect_path_changed(&mut h.events, path).await;
            assert!(matches!(
                next_event(&mut h.events).await,
                MonitorEvent::SwitchCompleted(_)
            ));
        }

        let history = h.monitor.switch_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].new_path, "/w/two");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_drops_changes_but_not_direct_evaluation() {
        let mut h = harness(MonitorConfig {
            max_switches_per_hour: 2,
            ..config(SwitchPolicy::Auto)
        });
        h.monitor.start();

        for path in ["/w/a1", "/w/b2"] {
            h.monitor.trigger_path_change(path).unwrap();
            expect_path_changed(&mut h.events, path).await;
            assert!(matches!(
                next_event(&mut h.events).await,
                MonitorEvent::SwitchCompleted(_)
            ));
        }

        h.monitor.trigger_path_change("/w/c3").unwrap();
        expect_path_changed(&mut h.events, "/w/c3").await;
        assert_quiet(&mut h.events, Duration::from_secs(30)).await;
        assert_eq!(h.monitor.switch_history().len(), 2);
        assert_eq!(session_count(&h.storage).await, 2);

        let direct = h
            .coordinator
            .evaluate(&SwitchContext::new("/w/c3", "c3"))
            .await
            .unwrap();
        assert_eq!(direct.decision, SwitchDecision::CreateNew);

        // Once the window has slid past the earlier switches, changes flow again.
        h.clock.advance(ChronoDuration::minutes(61));
        h.monitor.trigger_path_change("/w/d4").unwrap();
        expect_path_changed(&mut h.events, "/w/d4").await;
        assert!(matches!(
            next_event(&mut h.events).await,
            MonitorEvent::SwitchCompleted(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_outlives_a_short_history() {
        let mut h = harness(MonitorConfig {
            history_limit: 1,
            max_switches_per_hour: 2,
            ..config(SwitchPolicy::Auto)
        });
        h.monitor.start();

        for path in ["/w/a1", "/w/b2"] {
            h.monitor.trigger_path_change(path).unwrap();
            expect_path_changed(&mut h.events, path).await;
            assert!(matches!(
                next_event(&mut h.events).await,
                MonitorEvent::SwitchCompleted(_)
            ));
        }

        for path in ["/w/c3", "/w/d4"] {
            h.monitor.trigger_path_change(path).unwrap();
            expect_path_changed(&mut h.events, path).await;
            assert_quiet(&mut h.events, Duration::from_secs(30)).await;
        }

        let history = h.monitor.switch_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].new_path, "/w/b2");
        assert_eq!(session_count(&h.storage).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_during_switch_keeps_its_outcome() {
        let storage = Arc::new(MemoryStorage::new());
        let backend = Arc::new(SlowInserts(storage.clone()));
        let mut h = harness_on(config(SwitchPolicy::Auto), storage, backend);
        h.monitor.start();

        h.monitor.trigger_path_change("/w/app").unwrap();
        expect_path_changed(&mut h.events, "/w/app").await;
        // Debounce fires at 2s; the insert holds the switch until 7s.
        sleep(Duration::from_secs(3)).await;
        assert_eq!(session_count(&h.storage).await, 0);
        h.monitor.stop();
        assert!(!h.monitor.is_running());

        match next_event(&mut h.events).await {
            MonitorEvent::SwitchCompleted(event) => {
                assert_eq!(event.new_path, "/w/app");
                assert_eq!(event.trigger, SwitchTrigger::Automatic);
            }
            other => panic!("expected SwitchCompleted, got {:?}", other),
        }
        assert_eq!(h.monitor.switch_history().len(), 1);
        assert_eq!(session_count(&h.storage).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_zero_timeout_prompt_still_expires() {
        let mut h = harness(MonitorConfig {
            debounce_ms: 10,
            prompt_timeout_secs: 0,
            ..config(SwitchPolicy::Prompt)
        });
        h.monitor.start();

        h.monitor.trigger_path_change("/w/app").unwrap();
        expect_path_changed(&mut h.events, "/w/app").await;
        let prompt = match next_event(&mut h.events).await {
            MonitorEvent::PromptRequired(prompt) => prompt,
            other => panic!("expected PromptRequired, got {:?}", other),
        };
        assert_eq!(
            next_event(&mut h.events).await,
            MonitorEvent::PromptExpired { id: prompt.id }
        );
        assert!(h.monitor.pending_prompts().is_empty());
        assert_eq!(session_count(&h.storage).await, 0);
        h.monitor.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_unanswered_prompt_expires_as_declined() {
        let mut h = harness(config(SwitchPolicy::Prompt));
        h.monitor.start();

        h.monitor.trigger_path_change("/w/app").unwrap();
        expect_path_changed(&mut h.events, "/w/app").await;
        let prompt = match next_event(&mut h.events).await {
            MonitorEvent::PromptRequired(prompt) => prompt,
            other => panic!("expected PromptRequired, got {:?}", other),
        };
        assert_eq!(h.monitor.pending_prompts(), vec![prompt.clone()]);
        assert_eq!(
            prompt.expires_at - prompt.created_at,
            ChronoDuration::seconds(30)
        );

        assert_eq!(
            next_event(&mut h.events).await,
            MonitorEvent::PromptExpired { id: prompt.id }
        );
        assert!(h.monitor.pending_prompts().is_empty());
        assert!(matches!(
            h.monitor.respond_to_prompt(prompt.id, true).await,
            Err(MonitorError::PromptNotFound(id)) if id == prompt.id
        ));
        assert_eq!(session_count(&h.storage).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_prompt_resolves_exactly_once() {
        let mut h = harness(config(SwitchPolicy::Prompt));
        h.monitor.start();

        h.monitor.trigger_path_change("/w/app").unwrap();
        expect_path_changed(&mut h.events, "/w/app").await;
        let MonitorEvent::PromptRequired(prompt) = next_event(&mut h.events).await else {
            panic!("expected a prompt");
        };

        let result = h
            .monitor
            .respond_to_prompt(prompt.id, true)
            .await
            .unwrap()
            .expect("approved prompt returns a result");
        assert!(result.success);
        assert_eq!(result.decision, SwitchDecision::CreateNew);
        match next_event(&mut h.events).await {
            MonitorEvent::SwitchCompleted(event) => {
                assert_eq!(event.trigger, SwitchTrigger::Approved)
            }
            other => panic!("expected SwitchCompleted, got {:?}", other),
        }

        assert_err!(h.monitor.respond_to_prompt(prompt.id, true).await);
        assert_err!(h.monitor.respond_to_prompt(prompt.id, false).await);
        assert_quiet(&mut h.events, Duration::from_secs(60)).await;
        assert_eq!(session_count(&h.storage).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_declined_prompt_changes_nothing() {
        let mut h = harness(config(SwitchPolicy::Prompt));
        h.monitor.start();

        h.monitor.trigger_path_change("/w/app").unwrap();
        expect_path_changed(&mut h.events, "/w/app").await;
        let MonitorEvent::PromptRequired(prompt) = next_event(&mut h.events).await else {
            panic!("expected a prompt");
        };

        let answer = h.monitor.respond_to_prompt(prompt.id, false).await.unwrap();
        assert!(answer.is_none());
        assert!(h.monitor.switch_history().is_empty());
        assert_eq!(session_count(&h.storage).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_prompts_and_rejects_triggers() {
        let mut h = harness(config(SwitchPolicy::Prompt));
        h.monitor.start();
        h.monitor.start();
        assert!(h.monitor.is_running());

        h.monitor.trigger_path_change("/w/app").unwrap();
        expect_path_changed(&mut h.events, "/w/app").await;
        let MonitorEvent::PromptRequired(prompt) = next_event(&mut h.events).await else {
            panic!("expected a prompt");
        };

        h.monitor.stop();
        h.monitor.stop();
        assert!(!h.monitor.is_running());
        assert!(h.monitor.pending_prompts().is_empty());
        assert!(matches!(
            h.monitor.trigger_path_change("/w/other"),
            Err(MonitorError::NotRunning)
        ));
        assert!(h.monitor.respond_to_prompt(prompt.id, true).await.is_err());
        assert_quiet(&mut h.events, Duration::from_secs(60)).await;
        assert_eq!(session_count(&h.storage).await, 0);

        h.monitor.start();
        assert!(h.monitor.is_running());
        assert_ok!(h.monitor.trigger_path_change("/w/next"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_policy_only_reports_path_changes() {
        let mut h = harness(config(SwitchPolicy::Disabled));
        h.monitor.start();

        h.monitor.trigger_path_change("/w/app").unwrap();
        expect_path_changed(&mut h.events, "/w/app").await;
        assert_quiet(&mut h.events, Duration::from_secs(30)).await;
        assert_eq!(session_count(&h.storage).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_excluded_paths_are_ignored() {
        let mut h = harness(config(SwitchPolicy::Auto));
        h.monitor.start();

        h.monitor
            .trigger_path_change("/w/app/node_modules/left-pad")
            .unwrap();
        expect_path_changed(&mut h.events, "/w/app/node_modules/left-pad").await;
        assert_quiet(&mut h.events, Duration::from_secs(30)).await;
        assert!(h.monitor.switch_history().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_below_threshold_only_suggests() {
        let mut h = harness(MonitorConfig {
            auto_switch_threshold: 0.95,
            ..config(SwitchPolicy::Auto)
        });
        h.monitor.start();

        h.monitor.trigger_path_change("/w/app").unwrap();
        expect_path_changed(&mut h.events, "/w/app").await;
        assert!(matches!(
            next_event(&mut h.events).await,
            MonitorEvent::SwitchSuggested { .. }
        ));
        assert_eq!(session_count(&h.storage).await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_required_confirmation_turns_auto_into_prompt() {
        let mut h = harness(MonitorConfig {
            require_confirmation: true,
            ..config(SwitchPolicy::Auto)
        });
        h.monitor.start();

        h.monitor.trigger_path_change("/w/app").unwrap();
        expect_path_changed(&mut h.events, "/w/app").await;
        assert!(matches!(
            next_event(&mut h.events).await,
            MonitorEvent::PromptRequired(_)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_switch_bypasses_policy() {
        let h = harness(config(SwitchPolicy::Manual));

        let result = h
            .monitor
            .force_switch(SwitchContext::new("/w/app", "app"))
            .await
            .unwrap();
        assert!(result.success);
        assert!(result.switched);
        assert_eq!(result.confidence, 1.0);

        let history = h.monitor.switch_history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].trigger, SwitchTrigger::Forced);
        assert_eq!(history[0].evaluation.confidence, 1.0);
        assert_eq!(session_count(&h.storage).await, 1);
    }
}
