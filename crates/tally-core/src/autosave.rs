//! Autosave scheduling.
//!
//! The scheduler owns the idle deadline and decides whether an autosave
//! attempt may run. It never saves by itself: the coordinator loop sleeps
//! until [`AutosaveScheduler::deadline`], asks [`AutosaveScheduler::evaluate`]
//! and then calls the conductor. Skipped attempts are not retried.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::config::EngineConfig;

/// Why a save was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveReason {
    /// No edits for the idle delay.
    Idle,
    /// The host lost focus.
    Blur,
    /// Connectivity came back while there were unsaved edits.
    Reconnect,
    Manual,
    /// User resolved a conflict by overwriting the remote copy.
    ConflictPush,
}

impl SaveReason {
    /// Autosave triggers, as opposed to explicit user requests.
    #[must_use]
    pub const fn is_automatic(self) -> bool {
        matches!(self, Self::Idle | Self::Blur | Self::Reconnect)
    }
}

/// Why a save did not run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    NotDirty,
    /// A save or restore already holds the operation lock.
    Busy,
    NotAuthenticated,
    Offline,
    /// The last successful save is younger than the throttle window.
    Throttled,
    /// A conflict is waiting for an explicit pull or push.
    ConflictPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutosaveDecision {
    Attempt(SaveReason),
    Skip(SkipReason),
}

/// Conditions an autosave depends on, supplied by the conductor.
pub trait AutosaveGate {
    fn is_dirty(&self) -> bool;
    fn is_saving(&self) -> bool;
    fn is_authenticated(&self) -> bool;
    fn is_online(&self) -> bool;
    fn has_conflict(&self) -> bool;
    /// Local time of the last successful save.
    fn last_saved_at(&self) -> Option<DateTime<Utc>>;
}

#[derive(Debug, Clone)]
pub struct AutosaveScheduler {
    idle_delay: Duration,
    min_save_interval: Duration,
    idle_deadline: Option<Instant>,
}

impl AutosaveScheduler {
    #[must_use]
    pub const fn new(idle_delay: Duration, min_save_interval: Duration) -> Self {
        Self {
            idle_delay,
            min_save_interval,
            idle_deadline: None,
        }
    }

    #[must_use]
    pub const fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.idle_delay(), config.min_save_interval())
    }

    /// Restart the idle timer after an edit.
    pub fn on_data_changed(&mut self, now: Instant) {
        self.idle_deadline = Some(now + self.idle_delay);
    }

    /// Focus was lost: drop the idle timer and attempt right away.
    pub fn on_blur(&mut self) -> SaveReason {
        self.idle_deadline = None;
        SaveReason::Blur
    }

    pub fn cancel_idle(&mut self) {
        self.idle_deadline = None;
    }

    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.idle_deadline
    }

    /// Consume the idle deadline if it has passed.
    pub fn take_due(&mut self, now: Instant) -> Option<SaveReason> {
        match self.idle_deadline {
            Some(deadline) if deadline <= now => {
                self.idle_deadline = None;
                Some(SaveReason::Idle)
            }
            _ => None,
        }
    }

    /// Decide whether an autosave for `reason` may run now.
    pub fn evaluate(
        &self,
        reason: SaveReason,
        gate: &dyn AutosaveGate,
        now: DateTime<Utc>,
    ) -> AutosaveDecision {
        let skip = if !gate.is_dirty() {
            Some(SkipReason::NotDirty)
        } else if gate.is_saving() {
            Some(SkipReason::Busy)
        } else if !gate.is_online() {
            Some(SkipReason::Offline)
        } else if !gate.is_authenticated() {
            Some(SkipReason::NotAuthenticated)
        } else if gate.has_conflict() {
            Some(SkipReason::ConflictPending)
        } else if self.is_throttled(gate.last_saved_at(), now) {
            Some(SkipReason::Throttled)
        } else {
            None
        };

        match skip {
            Some(skip) => {
                tracing::debug!("Skipping {:?} autosave: {:?}", reason, skip);
                AutosaveDecision::Skip(skip)
            }
            None => AutosaveDecision::Attempt(reason),
        }
    }

    fn is_throttled(&self, last_saved_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let Some(last_saved_at) = last_saved_at else {
            return false;
        };
        let window = chrono::Duration::from_std(self.min_save_interval)
            .unwrap_or(chrono::Duration::MAX);
        now - last_saved_at < window
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy)]
    struct Gate {
        dirty: bool,
        saving: bool,
        authenticated: bool,
        online: bool,
        conflict: bool,
        last_saved_at: Option<DateTime<Utc>>,
    }

    impl Default for Gate {
        fn default() -> Self {
            Self {
                dirty: true,
                saving: false,
                authenticated: true,
                online: true,
                conflict: false,
                last_saved_at: None,
            }
        }
    }

    impl AutosaveGate for Gate {
        fn is_dirty(&self) -> bool {
            self.dirty
        }
        fn is_saving(&self) -> bool {
            self.saving
        }
        fn is_authenticated(&self) -> bool {
            self.authenticated
        }
        fn is_online(&self) -> bool {
            self.online
        }
        fn has_conflict(&self) -> bool {
            self.conflict
        }
        fn last_saved_at(&self) -> Option<DateTime<Utc>> {
            self.last_saved_at
        }
    }

    fn scheduler() -> AutosaveScheduler {
        AutosaveScheduler::from_config(&EngineConfig::default())
    }

    #[tokio::test(start_paused = true)]
    async fn idle_deadline_restarts_on_each_change() {
        let mut scheduler = scheduler();
        scheduler.on_data_changed(Instant::now());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(scheduler.take_due(Instant::now()), None);
        scheduler.on_data_changed(Instant::now());

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(scheduler.take_due(Instant::now()), None);

        tokio::time::advance(Duration::from_secs(3)).await;
        assert_eq!(scheduler.take_due(Instant::now()), Some(SaveReason::Idle));
        assert_eq!(scheduler.deadline(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn blur_cancels_pending_idle_timer() {
        let mut scheduler = scheduler();
        scheduler.on_data_changed(Instant::now());
        assert_eq!(scheduler.on_blur(), SaveReason::Blur);

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(scheduler.take_due(Instant::now()), None);
    }

    #[test]
    fn evaluate_checks_every_predicate() {
        let scheduler = scheduler();
        let now = Utc::now();
        let cases = [
            (Gate { dirty: false, ..Gate::default() }, SkipReason::NotDirty),
            (Gate { saving: true, ..Gate::default() }, SkipReason::Busy),
            (Gate { online: false, ..Gate::default() }, SkipReason::Offline),
            (
                Gate {
                    authenticated: false,
                    ..Gate::default()
                },
                SkipReason::NotAuthenticated,
            ),
            (
                Gate {
                    conflict: true,
                    ..Gate::default()
                },
                SkipReason::ConflictPending,
            ),
        ];
        for (gate, expected) in cases {
            assert_eq!(
                scheduler.evaluate(SaveReason::Idle, &gate, now),
                AutosaveDecision::Skip(expected)
            );
        }
        assert_eq!(
            scheduler.evaluate(SaveReason::Blur, &Gate::default(), now),
            AutosaveDecision::Attempt(SaveReason::Blur)
        );
    }

    #[test]
    fn evaluate_throttles_recent_saves() {
        let scheduler = scheduler();
        let now = Utc::now();
        let recent = Gate {
            last_saved_at: Some(now - chrono::Duration::seconds(59)),
            ..Gate::default()
        };
        assert_eq!(
            scheduler.evaluate(SaveReason::Idle, &recent, now),
            AutosaveDecision::Skip(SkipReason::Throttled)
        );

        let old = Gate {
            last_saved_at: Some(now - chrono::Duration::seconds(61)),
            ..Gate::default()
        };
        assert_eq!(
            scheduler.evaluate(SaveReason::Idle, &old, now),
            AutosaveDecision::Attempt(SaveReason::Idle)
        );
    }

    #[test]
    fn only_timer_and_focus_triggers_are_automatic() {
        assert!(SaveReason::Idle.is_automatic());
        assert!(SaveReason::Reconnect.is_automatic());
        assert!(!SaveReason::Manual.is_automatic());
        assert!(!SaveReason::ConflictPush.is_automatic());
    }
}
