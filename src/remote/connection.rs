//! Connection manager: tracks reachability and authorization, and owns the
//! exponential backoff policy for reconnection probes.
//!
//! The manager is plain state mutated only by the scheduler task. It never
//! spawns timers itself; instead each transition returns a [`Directive`]
//! telling the owner what to do (sleep-then-recheck, recheck immediately, or
//! nothing), which keeps all timer wiring in one place and makes the policy
//! trivially unit-testable.

use std::time::Duration;

use crate::remote::error::ErrorClass;

/// Minimum delay before the first reconnection probe.
pub const MIN_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Ceiling for the backoff delay.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(15);

/// What the owning task should do after reporting an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Sleep for the given duration, then run a connectivity check.
    ScheduleRetry(Duration),
    /// Discard the cached credential and run a check immediately.
    Recheck,
    /// No state change worth acting on.
    Nothing,
}

#[derive(Debug)]
pub struct ConnectionManager {
    pub connected: bool,
    pub authorized: bool,
    delay: Duration,
    retry_pending: bool,
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self {
            connected: false,
            authorized: false,
            delay: MIN_RETRY_DELAY,
            retry_pending: false,
        }
    }
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remote actions may only be dispatched while this holds.
    pub fn gate_open(&self) -> bool {
        self.connected && self.authorized
    }

    /// A connectivity probe succeeded: fully open the gate and reset backoff.
    pub fn on_check_ok(&mut self) {
        self.connected = true;
        self.authorized = true;
        self.delay = MIN_RETRY_DELAY;
    }

    /// A probe or action failed. Classifies the error and returns the
    /// directive for the owner.
    ///
    /// At most one retry timer is outstanding at a time: asking for another
    /// while one is pending is a no-op. The delay doubles for each fired
    /// retry, capped at [`MAX_RETRY_DELAY`].
    pub fn on_error(&mut self, class: ErrorClass) -> Directive {
        match class {
            ErrorClass::Unreachable => {
                self.connected = false;
                if self.retry_pending {
                    return Directive::Nothing;
                }
                self.retry_pending = true;
                let delay = self.delay;
                self.delay = (self.delay * 2).min(MAX_RETRY_DELAY);
                Directive::ScheduleRetry(delay)
            }
            ErrorClass::Unauthorized => {
                let was_authorized = self.authorized;
                self.authorized = false;
                // Only recheck once per credential loss. The recheck runs
                // without a credential and fails upward, which is the cue for
                // the operator to re-authenticate.
                if was_authorized {
                    Directive::Recheck
                } else {
                    Directive::Nothing
                }
            }
            ErrorClass::Other => Directive::Nothing,
        }
    }

    /// The pending retry timer fired; the owner is about to run a check.
    pub fn retry_fired(&mut self) {
        self.retry_pending = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_closed() {
        let conn = ConnectionManager::new();
        assert!(!conn.gate_open());
        assert!(!conn.connected);
        assert!(!conn.authorized);
    }

    #[test]
    fn check_ok_opens_gate() {
        let mut conn = ConnectionManager::new();
        conn.on_check_ok();
        assert!(conn.gate_open());
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let mut conn = ConnectionManager::new();
        let mut delays = Vec::new();
        for _ in 0..6 {
            match conn.on_error(ErrorClass::Unreachable) {
                Directive::ScheduleRetry(d) => delays.push(d),
                other => panic!("expected ScheduleRetry, got {other:?}"),
            }
            conn.retry_fired();
        }
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
                Duration::from_secs(15),
                Duration::from_secs(15),
            ]
        );
    }

    #[test]
    fn success_resets_backoff() {
        let mut conn = ConnectionManager::new();
        conn.on_error(ErrorClass::Unreachable);
        conn.retry_fired();
        conn.on_error(ErrorClass::Unreachable);
        conn.retry_fired();
        conn.on_check_ok();

        match conn.on_error(ErrorClass::Unreachable) {
            Directive::ScheduleRetry(d) => assert_eq!(d, MIN_RETRY_DELAY),
            other => panic!("expected ScheduleRetry, got {other:?}"),
        }
    }

    #[test]
    fn pending_retry_is_coalesced() {
        let mut conn = ConnectionManager::new();
        assert!(matches!(
            conn.on_error(ErrorClass::Unreachable),
            Directive::ScheduleRetry(_)
        ));
        // Second error while the timer is still pending: no new timer.
        assert_eq!(conn.on_error(ErrorClass::Unreachable), Directive::Nothing);
        conn.retry_fired();
        assert!(matches!(
            conn.on_error(ErrorClass::Unreachable),
            Directive::ScheduleRetry(_)
        ));
    }

    #[test]
    fn unreachable_closes_gate() {
        let mut conn = ConnectionManager::new();
        conn.on_check_ok();
        conn.on_error(ErrorClass::Unreachable);
        assert!(!conn.connected);
        assert!(!conn.gate_open());
        // Authorization is a separate axis and survives connectivity loss.
        assert!(conn.authorized);
    }

    #[test]
    fn unauthorized_rechecks_once() {
        let mut conn = ConnectionManager::new();
        conn.on_check_ok();
        assert_eq!(conn.on_error(ErrorClass::Unauthorized), Directive::Recheck);
        assert!(!conn.authorized);
        // Already unauthorized: no recheck loop.
        assert_eq!(conn.on_error(ErrorClass::Unauthorized), Directive::Nothing);
    }

    #[test]
    fn other_errors_leave_state_alone() {
        let mut conn = ConnectionManager::new();
        conn.on_check_ok();
        assert_eq!(conn.on_error(ErrorClass::Other), Directive::Nothing);
        assert!(conn.gate_open());
    }
}
