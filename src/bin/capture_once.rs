//! Runs a single capture attempt outside the server's schedule.
//!
//! The throttle still applies, so running this next to the server is safe.

use anyhow::{Context, Result};
use aqi_relay_lib::{build_orchestrator, models::AttemptOutcome, settings::Settings, utils};

#[tokio::main]
async fn main() -> Result<()> {
    utils::logging::init();

    let settings = Settings::load(None).context("failed to load settings")?;
    let orchestrator = build_orchestrator(&settings)?;

    match orchestrator.run_once().await {
        AttemptOutcome::Failed(reason) => Err(reason).context("capture attempt failed"),
        outcome => {
            log::info!("Attempt {outcome}");
            Ok(())
        }
    }
}
