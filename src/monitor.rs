//! # Environment Monitor Module
//!
//! Polls the working location, debounces changes, applies path filters and
//! a sliding-window rate limit, and hands settled locations to the
//! [`SwitchCoordinator`](crate::switching::SwitchCoordinator) according to
//! the configured [`SwitchPolicy`](crate::configuration::types::SwitchPolicy).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//! use worksession::clock::SystemClock;
//! use worksession::configuration::types::*;
//! use worksession::monitor::{CurrentDirLocation, EnvironmentMonitor};
//! use worksession::storage::MemoryStorage;
//! use worksession::switching::SwitchCoordinator;
//!
//! #[tokio::main]
//! async fn main() {
//!     let coordinator = Arc::new(SwitchCoordinator::new(
//!         Arc::new(MemoryStorage::new()),
//!         SwitchRules::default(),
//!         TransitionPolicy::default(),
//!         Arc::new(SystemClock),
//!     ));
//!     let (tx, mut rx) = mpsc::channel(64);
//!     let monitor = EnvironmentMonitor::new(
//!         MonitorConfig::default(),
//!         coordinator,
//!         Arc::new(CurrentDirLocation),
//!         tx,
//!     );
//!     monitor.start();
//!     while let Some(event) = rx.recv().await {
//!         println!("{:?}", event);
//!     }
//! }
//! ```

pub mod debounce;
pub mod environment_monitor;
pub mod location;
pub mod types;

pub use environment_monitor::EnvironmentMonitor;
pub use location::{CurrentDirLocation, FixedLocation, LocationProvider};
pub use types::*;

#[cfg(test)]
pub mod tests;
