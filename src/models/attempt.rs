use std::{fmt, time::Duration};

use crate::error::FailureReason;

use super::Snapshot;

/// Result of one orchestrator run. Never persisted.
#[derive(Debug)]
pub enum AttemptOutcome {
    /// Throttled; `remaining` is informational.
    Skipped { remaining: Duration },
    Captured(Snapshot),
    Failed(FailureReason),
}

impl AttemptOutcome {
    pub fn is_captured(&self) -> bool {
        matches!(self, AttemptOutcome::Captured(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, AttemptOutcome::Skipped { .. })
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptOutcome::Skipped { remaining } => {
                write!(f, "skipped, next capture allowed in ~{} minutes", remaining.as_secs() / 60)
            }
            AttemptOutcome::Captured(snapshot) => write!(f, "captured {}", snapshot.filename()),
            AttemptOutcome::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}
