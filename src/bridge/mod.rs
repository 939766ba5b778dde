//! Local side: live connection to an MPRIS player (spotifyd) on D-Bus.
//!
//! The bridge keeps a mirror of the player's properties, merging every
//! `PropertiesChanged` notification into it and forwarding the result to the
//! reconciler. When the player goes away it reconnects every five seconds.

mod bus;
mod mirror;
mod mpris;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{RwLock, mpsc};

pub use bus::{
    BusConnection, Metadata, PlaybackStatus, PlayerBus, PlayerControl, PlayerProperties,
};
pub use mirror::{PlayerMirror, spotify_track_id};
pub use mpris::{BusKind, DEFAULT_PLAYER_PREFIX, MprisBus};

use crate::clock::Clock;
use crate::error::BusError;
use crate::model::{PlaybackState, RepeatState};
use crate::reconciler::{SourceId, SourceUpdate};

pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const BUS_CALL_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct LocalEventBridge {
    inner: Arc<Inner>,
}

struct Inner {
    bus: Arc<dyn PlayerBus>,
    device_name: String,
    clock: Arc<dyn Clock>,
    updates: mpsc::Sender<SourceUpdate>,
    control: RwLock<Option<Arc<dyn PlayerControl>>>,
    mirror: RwLock<PlayerMirror>,
    reconnect_delay: Duration,
    call_timeout: Duration,
}

impl LocalEventBridge {
    pub fn new(
        bus: Arc<dyn PlayerBus>,
        device_name: String,
        clock: Arc<dyn Clock>,
        updates: mpsc::Sender<SourceUpdate>,
    ) -> Self {
        Self::with_timings(bus, device_name, clock, updates, RECONNECT_DELAY, BUS_CALL_TIMEOUT)
    }

    pub fn with_timings(
        bus: Arc<dyn PlayerBus>,
        device_name: String,
        clock: Arc<dyn Clock>,
        updates: mpsc::Sender<SourceUpdate>,
        reconnect_delay: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                bus,
                device_name,
                clock,
                updates,
                control: RwLock::new(None),
                mirror: RwLock::new(PlayerMirror::default()),
                reconnect_delay,
                call_timeout,
            }),
        }
    }

    /// Connect, follow the player until it goes away, repeat. Only returns
    /// when the reconciler is gone; otherwise cancelled by aborting the task.
    pub async fn run(self) {
        loop {
            match self.inner.bus.connect().await {
                Ok(connection) => self.follow(connection).await,
                Err(e) => tracing::debug!(error = %e, "Local player not available"),
            }
            if self.inner.updates.is_closed() {
                return;
            }
            tracing::debug!(
                delay_secs = self.inner.reconnect_delay.as_secs(),
                "Reconnecting to local player"
            );
            tokio::time::sleep(self.inner.reconnect_delay).await;
        }
    }

    async fn follow(&self, connection: BusConnection) {
        let BusConnection { control, mut changes } = connection;
        let snapshot = match self.bounded("GetAll", control.properties()).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                tracing::warn!(error = %e, "Could not read local player state");
                return;
            }
        };

        *self.inner.mirror.write().await = PlayerMirror::from_snapshot(snapshot);
        *self.inner.control.write().await = Some(control);
        tracing::info!("Connected to local player");
        self.send(SourceUpdate::Connected(SourceId::Local)).await;
        self.publish().await;

        while let Some(change) = changes.next().await {
            tracing::trace!(?change, "Local player properties changed");
            self.inner.mirror.write().await.apply(change);
            self.publish().await;
        }

        *self.inner.control.write().await = None;
        tracing::warn!("Lost connection to local player");
        self.send(SourceUpdate::Disconnected(SourceId::Local)).await;
    }

    async fn publish(&self) {
        let state = self.current_state().await;
        self.send(SourceUpdate::State(SourceId::Local, state)).await;
    }

    async fn send(&self, update: SourceUpdate) {
        if self.inner.updates.send(update).await.is_err() {
            tracing::debug!("Reconciler channel closed");
        }
    }

    async fn current_state(&self) -> PlaybackState {
        self.inner
            .mirror
            .read()
            .await
            .to_state(&self.inner.device_name, self.inner.clock.now_millis())
    }

    async fn control(&self) -> Result<Arc<dyn PlayerControl>, BusError> {
        self.inner
            .control
            .read()
            .await
            .clone()
            .ok_or(BusError::Disconnected)
    }

    async fn bounded<T>(
        &self,
        method: &'static str,
        call: impl Future<Output = Result<T, BusError>>,
    ) -> Result<T, BusError> {
        match tokio::time::timeout(self.inner.call_timeout, call).await {
            Ok(result) => {
                if let Err(e) = &result {
                    tracing::warn!(method, error = %e, "Bus call failed");
                }
                result
            }
            Err(_) => Err(BusError::CallFailed(format!("{method} timed out"))),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.inner.control.read().await.is_some()
    }

    /// Mirrored state, while connected
    pub async fn get_state(&self) -> Option<PlaybackState> {
        if !self.is_connected().await {
            return None;
        }
        Some(self.current_state().await)
    }

    pub async fn play(&self) -> Result<(), BusError> {
        let control = self.control().await?;
        self.bounded("Play", control.play()).await
    }

    pub async fn pause(&self) -> Result<(), BusError> {
        let control = self.control().await?;
        self.bounded("Pause", control.pause()).await
    }

    pub async fn next(&self) -> Result<(), BusError> {
        let control = self.control().await?;
        self.bounded("Next", control.next()).await
    }

    pub async fn previous(&self) -> Result<(), BusError> {
        let control = self.control().await?;
        self.bounded("Previous", control.previous()).await
    }

    /// MPRIS seeks are relative, so the offset is computed from the last
    /// known position
    pub async fn seek(&self, target_ms: u64) -> Result<(), BusError> {
        let control = self.control().await?;
        let target_micros = i64::try_from(target_ms).unwrap_or(i64::MAX).saturating_mul(1000);
        let offset = target_micros - self.inner.mirror.read().await.position_micros();
        tracing::debug!(target_ms, offset, "Seeking local player");
        self.bounded("Seek", control.seek(offset)).await?;

        self.inner.mirror.write().await.set_position_micros(target_micros);
        self.publish().await;
        Ok(())
    }

    pub async fn set_volume(&self, volume_percent: u8) -> Result<(), BusError> {
        let control = self.control().await?;
        let volume = f64::from(volume_percent.min(100)) / 100.0;
        self.bounded("Volume", control.set_volume(volume)).await
    }

    pub async fn set_shuffle(&self, shuffle: bool) -> Result<(), BusError> {
        let control = self.control().await?;
        self.bounded("Shuffle", control.set_shuffle(shuffle)).await
    }

    pub async fn set_repeat(&self, state: RepeatState) -> Result<(), BusError> {
        let control = self.control().await?;
        self.bounded("LoopStatus", control.set_loop_status(state)).await
    }

    /// Read `Position` from the player and refresh the mirror with it
    pub async fn get_current_position_ms(&self) -> Result<u64, BusError> {
        let control = self.control().await?;
        let position = self.bounded("Position", control.position_micros()).await?;
        self.inner.mirror.write().await.set_position_micros(position);
        Ok((position.max(0) / 1000) as u64)
    }
}
