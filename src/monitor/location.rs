//! Where the user is working, and what can be derived from the path alone.

use std::sync::Mutex;

use async_trait::async_trait;
use log::debug;
use tokio::process::Command;

use crate::configuration::types::MonitorConfig;
use crate::error_handling::types::SessionError;

/// Source of the current working location.
#[async_trait]
pub trait LocationProvider: Send + Sync {
    async fn current_location(&self) -> std::io::Result<String>;
}

/// The process working directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct CurrentDirLocation;

#[async_trait]
impl LocationProvider for CurrentDirLocation {
    async fn current_location(&self) -> std::io::Result<String> {
        Ok(std::env::current_dir()?.to_string_lossy().into_owned())
    }
}

/// A location set by the embedding program.
#[derive(Debug, Default)]
pub struct FixedLocation {
    path: Mutex<String>,
}

impl FixedLocation {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: Mutex::new(path.into()),
        }
    }

    pub fn set(&self, path: impl Into<String>) {
        *self.path.lock().unwrap_or_else(|p| p.into_inner()) = path.into();
    }
}

#[async_trait]
impl LocationProvider for FixedLocation {
    async fn current_location(&self) -> std::io::Result<String> {
        Ok(self.path.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }
}

/// Last path segment that is non-empty, not dot-prefixed and at least two
/// characters long; `"unknown"` when there is none.
pub fn project_name_from_path(path: &str) -> String {
    path.split(['/', '\\'])
        .rev()
        .find(|segment| !segment.starts_with('.') && segment.chars().count() >= 2)
        .unwrap_or("unknown")
        .to_string()
}

/// Rejects paths matching an excluded substring or outside every allowed
/// prefix.
pub fn check_path(path: &str, config: &MonitorConfig) -> Result<(), SessionError> {
    if let Some(pattern) = config
        .excluded_paths
        .iter()
        .find(|pattern| path.contains(pattern.as_str()))
    {
        return Err(SessionError::PolicyViolation(format!(
            "{} matches excluded pattern {:?}",
            path, pattern
        )));
    }
    if !config.allowed_paths.is_empty()
        && !config
            .allowed_paths
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
    {
        return Err(SessionError::PolicyViolation(format!(
            "{} is outside the allowed paths",
            path
        )));
    }
    Ok(())
}

/// `remote.origin.url` of the repository containing `path`, if any.
pub async fn detect_git_remote(path: &str) -> Option<String> {
    let output = Command::new("git")
        .arg("-C")
        .arg(path)
        .args(["config", "--get", "remote.origin.url"])
        .output()
        .await;

    match output {
        Ok(out) if out.status.success() => {
            let url = String::from_utf8_lossy(&out.stdout).trim().to_string();
            (!url.is_empty()).then_some(url)
        }
        Ok(_) => None,
        Err(e) => {
            debug!("git remote lookup for {} failed: {}", path, e);
            None
        }
    }
}
