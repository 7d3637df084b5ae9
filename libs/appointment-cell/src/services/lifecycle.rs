// libs/appointment-cell/src/services/lifecycle.rs
use tracing::{debug, warn};

use crate::models::{BookingError, LifecycleStatus};

/// Requested --confirm--> Confirmed --complete--> Completed, and
/// Requested | Confirmed --cancel--> Cancelled.
pub struct BookingLifecycle;

impl BookingLifecycle {
    /// All valid next statuses for a given current status
    pub fn valid_transitions(current: LifecycleStatus) -> &'static [LifecycleStatus] {
        match current {
            LifecycleStatus::Requested => &[LifecycleStatus::Confirmed, LifecycleStatus::Cancelled],
            LifecycleStatus::Confirmed => &[LifecycleStatus::Completed, LifecycleStatus::Cancelled],
            // Terminal states - payment status may still move, lifecycle may not
            LifecycleStatus::Completed => &[],
            LifecycleStatus::Cancelled => &[],
        }
    }

    pub fn can_transition(current: LifecycleStatus, next: LifecycleStatus) -> bool {
        Self::valid_transitions(current).contains(&next)
    }

    pub fn check_confirm(current: LifecycleStatus) -> Result<(), BookingError> {
        Self::check(current, LifecycleStatus::Confirmed, "confirm")
    }

    pub fn check_complete(current: LifecycleStatus) -> Result<(), BookingError> {
        Self::check(current, LifecycleStatus::Completed, "complete")
    }

    /// Cancelling distinguishes the two terminal states for the caller.
    pub fn check_cancel(current: LifecycleStatus) -> Result<(), BookingError> {
        match current {
            LifecycleStatus::Requested | LifecycleStatus::Confirmed => Ok(()),
            LifecycleStatus::Completed => Err(BookingError::CannotCancelCompleted),
            LifecycleStatus::Cancelled => Err(BookingError::AlreadyCancelled),
        }
    }

    fn check(current: LifecycleStatus, next: LifecycleStatus, action: &'static str) -> Result<(), BookingError> {
        if Self::can_transition(current, next) {
            debug!("Status transition validated: {} -> {}", current, next);
            Ok(())
        } else {
            warn!("Invalid status transition attempted: {} -> {}", current, next);
            Err(BookingError::InvalidStateTransition { from: current, action })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_confirm_only_from_requested() {
        assert!(BookingLifecycle::check_confirm(LifecycleStatus::Requested).is_ok());
        for status in [LifecycleStatus::Confirmed, LifecycleStatus::Completed, LifecycleStatus::Cancelled] {
            assert_matches!(
                BookingLifecycle::check_confirm(status),
                Err(BookingError::InvalidStateTransition { from, action: "confirm" }) if from == status
            );
        }
    }

    #[test]
    fn test_complete_only_from_confirmed() {
        assert!(BookingLifecycle::check_complete(LifecycleStatus::Confirmed).is_ok());
        assert_matches!(
            BookingLifecycle::check_complete(LifecycleStatus::Requested),
            Err(BookingError::InvalidStateTransition { .. })
        );
        assert_matches!(
            BookingLifecycle::check_complete(LifecycleStatus::Cancelled),
            Err(BookingError::InvalidStateTransition { .. })
        );
    }

    #[test]
    fn test_cancel_distinguishes_terminal_states() {
        assert!(BookingLifecycle::check_cancel(LifecycleStatus::Requested).is_ok());
        assert!(BookingLifecycle::check_cancel(LifecycleStatus::Confirmed).is_ok());
        assert_eq!(
            BookingLifecycle::check_cancel(LifecycleStatus::Completed),
            Err(BookingError::CannotCancelCompleted)
        );
        assert_eq!(
            BookingLifecycle::check_cancel(LifecycleStatus::Cancelled),
            Err(BookingError::AlreadyCancelled)
        );
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        assert!(BookingLifecycle::valid_transitions(LifecycleStatus::Completed).is_empty());
        assert!(BookingLifecycle::valid_transitions(LifecycleStatus::Cancelled).is_empty());
    }
}
