use std::path::Path;
use std::sync::Arc;

use log::{debug, error, info};
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::configuration::config::Config;
use crate::error_handling::types::*;
use crate::monitor::location::{detect_git_remote, project_name_from_path};
use crate::monitor::{CurrentDirLocation, EnvironmentMonitor, LocationProvider, MonitorEvent};
use crate::session_management::{SessionRecord, SessionStatus};
use crate::storage::{DatabaseStorage, MemoryStorage, SessionFilter, Storage};
use crate::switching::{
    ManifestAnalyzer, SwitchContext, SwitchCoordinator, SwitchEvaluation, SwitchResult,
};
use crate::termination::{
    TerminationCoordinator, TerminationOptions, TerminationReason, TerminationResult,
};

/// `database.path` value selecting the in-process store.
pub const IN_MEMORY_DATABASE: &str = ":memory:";

/// Owns the storage backend and the coordinators built on top of it.
pub struct Controller {
    pub config: Config,
    storage: Arc<dyn Storage>,
    clock: Arc<dyn Clock>,
    switcher: Arc<SwitchCoordinator>,
    terminator: TerminationCoordinator,
}

impl Controller {
    /// Opens the configured store and wires the coordinators to it.
    pub async fn new(config: Config) -> Result<Self, ControllerError> {
        info!("Opening session store at {}", config.database.path.display());

        let storage: Arc<dyn Storage> = if config.database.path == Path::new(IN_MEMORY_DATABASE) {
            debug!("Using the in-process session store");
            Arc::new(MemoryStorage::new())
        } else {
            match DatabaseStorage::connect(&config.database.path).await {
                Ok(storage) => Arc::new(storage),
                Err(err) => {
                    error!("Unable to open the session store: {}", err);
                    return Err(ControllerError::Storage(err));
                }
            }
        };

        Ok(Self::with_storage(config, storage, Arc::new(SystemClock)))
    }

    pub fn with_storage(config: Config, storage: Arc<dyn Storage>, clock: Arc<dyn Clock>) -> Self {
        let switcher = SwitchCoordinator::new(
            storage.clone(),
            config.rules.clone(),
            config.transitions.clone(),
            clock.clone(),
        )
        .with_analyzer(Arc::new(ManifestAnalyzer));
        let terminator = TerminationCoordinator::new(
            storage.clone(),
            config.termination.clone(),
            config.transitions.clone(),
            clock.clone(),
        );

        Self {
            config,
            storage,
            clock,
            switcher: Arc::new(switcher),
            terminator,
        }
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    pub fn switch_coordinator(&self) -> &Arc<SwitchCoordinator> {
        &self.switcher
    }

    pub fn termination_coordinator(&self) -> &TerminationCoordinator {
        &self.terminator
    }

    /// A monitor watching the process working directory.
    pub fn monitor(&self, events: Sender<MonitorEvent>) -> EnvironmentMonitor {
        self.monitor_with(Arc::new(CurrentDirLocation), events)
    }

    pub fn monitor_with(
        &self,
        location: Arc<dyn LocationProvider>,
        events: Sender<MonitorEvent>,
    ) -> EnvironmentMonitor {
        EnvironmentMonitor::new(
            self.config.monitor.clone(),
            self.switcher.clone(),
            location,
            events,
        )
    }

    /// Builds the switch context for a location on disk.
    pub async fn context_for(&self, path: &str) -> SwitchContext {
        let mut context = SwitchContext::new(path, project_name_from_path(path));
        if self.config.monitor.detect_git_remote {
            context.git_repository = detect_git_remote(path).await;
        }
        context
    }

    pub async fn evaluate(&self, path: &str) -> Result<SwitchEvaluation, ControllerError> {
        let context = self.context_for(path).await;
        Ok(self.switcher.evaluate(&context).await?)
    }

    pub async fn switch(
        &self,
        path: &str,
        force_create: bool,
    ) -> Result<SwitchResult, ControllerError> {
        let mut context = self.context_for(path).await;
        context.force_create = force_create;
        Ok(self.switcher.switch_session(&context).await?)
    }

    pub async fn terminate(
        &self,
        session_id: Uuid,
        reason: TerminationReason,
        force: bool,
    ) -> TerminationResult {
        let options = TerminationOptions {
            force,
            ..Default::default()
        };
        self.terminator
            .terminate_session(session_id, reason, options)
            .await
    }

    /// Sessions matching `status` (all when `None`), most recently active first.
    pub async fn sessions(
        &self,
        status: Option<SessionStatus>,
    ) -> Result<Vec<SessionRecord>, ControllerError> {
        let filter = SessionFilter {
            statuses: status.into_iter().collect(),
            ..Default::default()
        };
        Ok(self.storage.get_sessions(&filter).await?)
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::configuration::types::DatabaseConfig;
    use crate::switching::SwitchDecision;
    use std::path::PathBuf;

    fn memory_config() -> Config {
        let mut config = Config {
            database: DatabaseConfig {
                path: PathBuf::from(IN_MEMORY_DATABASE),
            },
            ..Default::default()
        };
        config.monitor.detect_git_remote = false;
        config
    }

    #[tokio::test]
    async fn test_switch_then_list_then_terminate() {
        let controller = Controller::new(memory_config()).await.unwrap();

        let evaluation = controller.evaluate("/w/app").await.unwrap();
        assert_eq!(evaluation.decision, SwitchDecision::CreateNew);

        let result = controller.switch("/w/app", false).await.unwrap();
        assert!(result.success);
        let id = result.target_id().unwrap();

        let active = controller.sessions(Some(SessionStatus::Active)).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].project_name, "app");

        let terminated = controller
            .terminate(id, TerminationReason::UserRequested, false)
            .await;
        assert!(terminated.success, "errors: {:?}", terminated.errors);
        assert!(controller
            .sessions(Some(SessionStatus::Active))
            .await
            .unwrap()
            .is_empty());
        assert_eq!(controller.sessions(None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_opens_database_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut config = memory_config();
        config.database.path = dir.path().join("nested").join("sessions.sqlite3");

        let controller = Controller::new(config.clone()).await.unwrap();
        controller.switch("/w/api", false).await.unwrap();
        drop(controller);

        let reopened = Controller::new(config).await.unwrap();
        let sessions = reopened.sessions(None).await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].project_path, "/w/api");
    }
}
