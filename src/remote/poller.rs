//! Long-lived task feeding the remote playback state to the reconciler

use std::time::Duration;

use tokio::sync::mpsc;

use super::client::RemoteStateClient;
use crate::error::{BridgeError, UpstreamError};
use crate::model::{LikedStatus, PlaybackState};
use crate::reconciler::{SourceId, SourceUpdate};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

pub struct RemotePoller {
    client: RemoteStateClient,
    updates: mpsc::Sender<SourceUpdate>,
    interval: Duration,
    healthy: bool,
}

impl RemotePoller {
    pub fn new(client: RemoteStateClient, updates: mpsc::Sender<SourceUpdate>) -> Self {
        Self {
            client,
            updates,
            interval: DEFAULT_POLL_INTERVAL,
            healthy: false,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn run(mut self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Starting remote playback poller");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match self.poll_once().await {
                Ok(()) => {}
                Err(BridgeError::Upstream(UpstreamError::RateLimited { retry_after_seconds })) => {
                    tracing::warn!(retry_after_seconds, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_secs(retry_after_seconds)).await;
                }
                Err(_) => {}
            }
            if self.updates.is_closed() {
                tracing::debug!("Reconciler gone, stopping remote poller");
                return;
            }
        }
    }

    /// Fetch, resolve the liked status and publish one remote state
    pub async fn poll_once(&mut self) -> Result<(), BridgeError> {
        match self.fetch().await {
            Ok(state) => {
                if !self.healthy {
                    tracing::info!("Remote playback source available");
                    self.healthy = true;
                    self.send(SourceUpdate::Connected(SourceId::Remote)).await;
                }
                self.send(SourceUpdate::State(SourceId::Remote, state)).await;
                Ok(())
            }
            Err(e) => {
                if self.healthy {
                    tracing::warn!(error = %e, "Remote playback source unavailable");
                    self.healthy = false;
                    self.send(SourceUpdate::Disconnected(SourceId::Remote)).await;
                } else {
                    tracing::debug!(error = %e, "Remote poll failed");
                }
                Err(e)
            }
        }
    }

    async fn fetch(&self) -> Result<PlaybackState, BridgeError> {
        let now = self.client.coordinator().clock().now_millis();
        let Some(mut state) = self.client.get_playback_state().await? else {
            return Ok(PlaybackState::idle(now));
        };
        state.liked = match state.track_id().map(str::to_string) {
            Some(id) => self.client.liked_status(&id).await,
            None => LikedStatus::Unknown,
        };
        Ok(state)
    }

    async fn send(&self, update: SourceUpdate) {
        if self.updates.send(update).await.is_err() {
            tracing::debug!("Reconciler channel closed");
        }
    }
}
