//! Background task that closes idle sessions.
//!
//! One sweeper runs per server, not per session. Each tick calls
//! [`SessionManager::cleanup`]; the task exits when the shutdown token fires.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::session::SessionManager;

/// Spawn the idle sweeper.
pub fn spawn_idle_sweeper(
    sessions: Arc<SessionManager>,
    max_idle: Duration,
    interval: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        let _ = ticker.tick().await;
        debug!(?max_idle, ?interval, "idle sweeper started");

        loop {
            tokio::select! {
                () = token.cancelled() => break,
                _ = ticker.tick() => {
                    let _ = sessions.cleanup(max_idle);
                }
            }
        }
        info!("idle sweeper stopped");
    })
}
