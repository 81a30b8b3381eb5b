use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tokio_util::sync::CancellationToken;

use crate::models::AttemptOutcome;

use super::orchestrator::CaptureOrchestrator;

const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Periodic trigger for the orchestrator: once at start, then every `period`.
///
/// Only one attempt runs at a time. Ticks that land while an attempt is in
/// flight are dropped rather than queued.
pub struct CaptureScheduler {
    orchestrator: Arc<CaptureOrchestrator>,
    period: Duration,
    in_flight: Arc<Mutex<()>>,
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl CaptureScheduler {
    pub fn new(orchestrator: Arc<CaptureOrchestrator>, period: Duration) -> Self {
        Self {
            orchestrator,
            period,
            in_flight: Arc::new(Mutex::new(())),
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    pub fn start(&mut self) -> Result<()> {
        if self.handle.is_some() {
            bail!("scheduler already active");
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(schedule_loop(
            Arc::clone(&self.orchestrator),
            self.period,
            Arc::clone(&self.in_flight),
            cancel_token.clone(),
        ));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        log_info!("Scheduler started, period {}s", self.period.as_secs());
        Ok(())
    }

    /// Stops ticking. An attempt already in flight is allowed to finish.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle.await.context("scheduler loop task failed to join")?;
            log_info!("Scheduler stopped");
        }
        Ok(())
    }

    /// Out-of-band run. Returns `None` when an attempt is already in flight.
    pub async fn trigger_now(&self) -> Option<AttemptOutcome> {
        run_attempt(&self.orchestrator, &self.in_flight).await
    }
}

async fn schedule_loop(
    orchestrator: Arc<CaptureOrchestrator>,
    period: Duration,
    in_flight: Arc<Mutex<()>>,
    cancel_token: CancellationToken,
) {
    // First tick completes immediately.
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel_token.cancelled() => {
                log_info!("scheduler loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                log_info!("[Scheduler] Triggering capture");
                if let Some(outcome) = run_attempt(&orchestrator, &in_flight).await {
                    log_info!("[Scheduler] Attempt {outcome}");
                }
            }
        }
    }
}

/// Runs one attempt on its own task so a panicking browser cannot take the loop down.
async fn run_attempt(
    orchestrator: &Arc<CaptureOrchestrator>,
    in_flight: &Arc<Mutex<()>>,
) -> Option<AttemptOutcome> {
    let Ok(guard) = Arc::clone(in_flight).try_lock_owned() else {
        log_warn!("[Scheduler] Previous capture still running; skipping this trigger");
        return None;
    };

    let orchestrator = Arc::clone(orchestrator);
    let task = tokio::spawn(async move {
        let _guard = guard;
        orchestrator.run_once().await
    });

    match task.await {
        Ok(outcome) => Some(outcome),
        Err(err) => {
            log_error!("[Scheduler Error] capture task failed: {err}");
            None
        }
    }
}
