//! Periodic proactive credential refresh

use std::time::Duration;

use super::coordinator::{AuthStatus, RefreshCoordinator};
use crate::error::AuthError;

pub const REFRESH_INTERVAL: Duration = Duration::from_secs(20 * 60);

pub struct BackgroundRefreshScheduler {
    coordinator: RefreshCoordinator,
    interval: Duration,
}

impl BackgroundRefreshScheduler {
    pub fn new(coordinator: RefreshCoordinator) -> Self {
        Self {
            coordinator,
            interval: REFRESH_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Tick forever; the first tick fires immediately
    pub async fn run(self) {
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            "Starting background credential refresh"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let _ = self.tick().await;
        }
    }

    /// One proactive check. An `Unauthorized` result flips the coordinator's
    /// status, which is what subscribers see; repeating it on later ticks is
    /// a no-op until a login restores authorization.
    pub async fn tick(&self) -> Result<(), AuthError> {
        let was = self.coordinator.status();
        let result = self.coordinator.ensure_valid_credential().await;
        match &result {
            Ok(credential) => {
                let remaining = credential.remaining_millis(self.coordinator.clock().now_millis());
                tracing::debug!(minutes_left = remaining / 60_000, "Credential valid");
            }
            Err(AuthError::Unauthorized) if was == AuthStatus::Unauthorized => {
                tracing::debug!("Still waiting for re-authentication");
            }
            Err(AuthError::Unauthorized) => {
                tracing::error!("Re-authentication required, run `spotify-bridge login`");
            }
            Err(AuthError::Transient(reason)) => {
                tracing::warn!(%reason, "Proactive refresh failed, will retry next tick");
            }
        }
        result.map(|_| ())
    }
}
