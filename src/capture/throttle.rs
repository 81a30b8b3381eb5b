use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::PointerState;

const ENABLE_LOGS: bool = true;

use crate::log_warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    Allowed,
    Wait { remaining: Duration },
}

impl ThrottleDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ThrottleDecision::Allowed)
    }
}

/// Allows a capture only once `window` has passed since the pointer's `capturedAt`.
#[derive(Debug, Clone, Copy)]
pub struct ThrottleGuard {
    window: Duration,
}

impl ThrottleGuard {
    pub fn new(window: Duration) -> Self {
        Self { window }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn check(&self, pointer: &PointerState, now: DateTime<Utc>) -> ThrottleDecision {
        decide(pointer, now, self.window)
    }
}

/// Pure throttle rule. Unreadable pointers fail open so corruption cannot wedge capture.
pub fn decide(pointer: &PointerState, now: DateTime<Utc>, window: Duration) -> ThrottleDecision {
    let pointer = match pointer {
        PointerState::Missing => return ThrottleDecision::Allowed,
        PointerState::Corrupt(reason) => {
            log_warn!("Pointer corrupted or unreadable ({reason}); proceeding with new capture");
            return ThrottleDecision::Allowed;
        }
        PointerState::Present(pointer) => pointer,
    };

    // A timestamp ahead of the clock would block until the clock catches up.
    let Ok(elapsed) = (now - pointer.captured_at).to_std() else {
        log_warn!(
            "Pointer capturedAt {} is in the future; proceeding with new capture",
            pointer.captured_at
        );
        return ThrottleDecision::Allowed;
    };

    match window.checked_sub(elapsed) {
        Some(remaining) if !remaining.is_zero() => ThrottleDecision::Wait { remaining },
        _ => ThrottleDecision::Allowed,
    }
}
