use std::time::Duration;

use tokio::time::sleep;
use tracing::{error, info};

use crate::state::AppState;

/// Physically removes expired flows. Reads already hide them, so this only
/// bounds storage growth and emits expiry events.
pub fn start_sweep_worker(state: AppState) {
    tokio::spawn(async move {
        loop {
            match state.flows.sweep_expired().await {
                Ok(0) => {}
                Ok(count) => info!(count, "swept expired flows"),
                Err(err) => error!(error = %err, "flow sweep iteration failed"),
            }

            sleep(Duration::from_secs(state.config.sweep_interval_secs.max(1))).await;
        }
    });
}
