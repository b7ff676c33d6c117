//! Trailing debounce as an explicit state machine.
//!
//! `Idle → PendingDebounce → Processing → Idle`. Every observation restarts
//! the window; only the last observed path is handed out once it settles.

use std::time::Duration;

use log::trace;
use tokio::time::Instant;

use crate::monitor::types::MonitorPhase;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Phase {
    Idle,
    Pending { path: String, deadline: Instant },
    Processing { path: String },
}

#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    phase: Phase,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> MonitorPhase {
        match self.phase {
            Phase::Idle => MonitorPhase::Idle,
            Phase::Pending { .. } => MonitorPhase::PendingDebounce,
            Phase::Processing { .. } => MonitorPhase::Processing,
        }
    }

    /// When the pending path settles, if one is pending.
    pub fn deadline(&self) -> Option<Instant> {
        match &self.phase {
            Phase::Pending { deadline, .. } => Some(*deadline),
            _ => None,
        }
    }

    pub fn observe(&mut self, path: String, now: Instant) {
        let deadline = now + self.window;
        trace!("debounce: {} settles at {:?}", path, deadline);
        self.phase = Phase::Pending { path, deadline };
    }

    /// Hands out the settled path and enters `Processing`.
    pub fn fire(&mut self, now: Instant) -> Option<String> {
        match &self.phase {
            Phase::Pending { path, deadline } if now >= *deadline => {
                let path = path.clone();
                self.phase = Phase::Processing { path: path.clone() };
                Some(path)
            }
            _ => None,
        }
    }

    /// Leaves `Processing`. A path observed meanwhile stays pending.
    pub fn finish(&mut self) {
        if matches!(self.phase, Phase::Processing { .. }) {
            self.phase = Phase::Idle;
        }
    }

    pub fn reset(&mut self) {
        self.phase = Phase::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(2_000);

    #[test]
    fn rapid_changes_settle_on_the_last_one() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);

        debouncer.observe("/a".into(), start);
        debouncer.observe("/b".into(), start + Duration::from_millis(500));
        debouncer.observe("/c".into(), start + Duration::from_millis(1_000));

        assert_eq!(debouncer.phase(), MonitorPhase::PendingDebounce);
        assert_eq!(debouncer.fire(start + Duration::from_millis(2_500)), None);
        assert_eq!(
            debouncer.deadline(),
            Some(start + Duration::from_millis(3_000))
        );

        assert_eq!(
            debouncer.fire(start + Duration::from_millis(3_000)),
            Some("/c".to_string())
        );
        assert_eq!(debouncer.phase(), MonitorPhase::Processing);
        assert_eq!(debouncer.fire(start + Duration::from_secs(10)), None);

        debouncer.finish();
        assert_eq!(debouncer.phase(), MonitorPhase::Idle);
        assert_eq!(debouncer.deadline(), None);
    }

    #[test]
    fn observation_during_processing_stays_pending() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.observe("/a".into(), start);
        debouncer.fire(start + WINDOW);

        debouncer.observe("/b".into(), start + WINDOW);
        debouncer.finish();
        assert_eq!(debouncer.phase(), MonitorPhase::PendingDebounce);

        debouncer.reset();
        assert_eq!(debouncer.phase(), MonitorPhase::Idle);
    }
}
