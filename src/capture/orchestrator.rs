use std::sync::Arc;

use chrono::Utc;

use crate::{
    models::{AttemptOutcome, Snapshot},
    settings::Settings,
    store::SnapshotStore,
};

use super::{
    browser::{capture, CaptureTarget, MatchRule, RenderEngine},
    throttle::{ThrottleDecision, ThrottleGuard},
};

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info};

/// One throttle-check, browser-capture, persist sequence.
///
/// Safe to call out of band: the throttle lives here, not in the scheduler.
pub struct CaptureOrchestrator {
    store: SnapshotStore,
    engine: Arc<dyn RenderEngine>,
    target: CaptureTarget,
    guard: ThrottleGuard,
}

impl CaptureOrchestrator {
    pub fn new(store: SnapshotStore, engine: Arc<dyn RenderEngine>, settings: &Settings) -> Self {
        Self {
            store,
            engine,
            target: CaptureTarget {
                url: settings.target_url.clone(),
                rule: MatchRule::new(settings.api_fragment.clone()),
                timeout: settings.capture_timeout(),
            },
            guard: ThrottleGuard::new(settings.throttle_window()),
        }
    }

    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    pub async fn run_once(&self) -> AttemptOutcome {
        let pointer = self.store.pointer_state();
        if let ThrottleDecision::Wait { remaining } = self.guard.check(&pointer, Utc::now()) {
            log_info!(
                "[Skipped] Last capture was less than {}h ago; next run allowed in approx {} minutes",
                self.guard.window().as_secs() / 3600,
                remaining.as_secs() / 60
            );
            return AttemptOutcome::Skipped { remaining };
        }

        let data = match capture(self.engine.as_ref(), &self.target).await {
            Ok(data) => data,
            Err(err) => {
                log_error!("[Failed] {err}");
                return AttemptOutcome::Failed(err.into());
            }
        };

        // The payload's own timestamps are not ours to trust.
        let snapshot = Snapshot::new(Utc::now(), data);
        match self.store.publish(&snapshot) {
            Ok(pointer) => {
                log_info!("[Success] Captured snapshot {}", pointer.filename);
                AttemptOutcome::Captured(snapshot)
            }
            Err(err) => {
                log_error!("[Failed] {err}");
                AttemptOutcome::Failed(err.into())
            }
        }
    }
}
