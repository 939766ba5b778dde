//! Inbound command surface. Arguments are validated before any I/O;
//! transport commands go to the local player while it is connected and to
//! the Web API otherwise.

use crate::bridge::LocalEventBridge;
use crate::error::{Result, ValidationError};
use crate::model::{DeviceInfo, LikedStatus, PlaybackState, RepeatState};
use crate::reconciler::{SourceId, StateReconciler};
use crate::remote::RemoteStateClient;

#[derive(Clone)]
pub struct PlaybackController {
    remote: RemoteStateClient,
    bridge: Option<LocalEventBridge>,
    reconciler: StateReconciler,
}

pub fn validate_seek(position_ms: i64) -> Result<u64, ValidationError> {
    u64::try_from(position_ms).map_err(|_| ValidationError::OutOfRange {
        field: "position_ms",
        min: 0,
        max: i64::MAX,
        value: position_ms,
    })
}

pub fn validate_volume(volume: i64) -> Result<u8, ValidationError> {
    match u8::try_from(volume) {
        Ok(v) if v <= 100 => Ok(v),
        _ => Err(ValidationError::OutOfRange {
            field: "volume",
            min: 0,
            max: 100,
            value: volume,
        }),
    }
}

pub fn validate_track_ids(ids: &[String]) -> Result<Vec<String>, ValidationError> {
    let ids: Vec<String> = ids
        .iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();
    if ids.is_empty() {
        return Err(ValidationError::MissingField("ids"));
    }
    Ok(ids)
}

impl PlaybackController {
    pub fn new(
        remote: RemoteStateClient,
        bridge: Option<LocalEventBridge>,
        reconciler: StateReconciler,
    ) -> Self {
        Self {
            remote,
            bridge,
            reconciler,
        }
    }

    async fn connected_bridge(&self) -> Option<&LocalEventBridge> {
        match &self.bridge {
            Some(bridge) if bridge.is_connected().await => Some(bridge),
            _ => None,
        }
    }

    /// Push the remote state after a command so observers don't wait for
    /// the next poll. Failures only cost freshness.
    async fn refresh_remote(&self) {
        match self.fetch_remote().await {
            Ok(state) => {
                self.reconciler.publish(SourceId::Remote, state);
            }
            Err(e) => tracing::debug!(error = %e, "Post-command refresh failed"),
        }
    }

    async fn fetch_remote(&self) -> Result<PlaybackState> {
        let now = self.remote.coordinator().clock().now_millis();
        let Some(mut state) = self.remote.get_playback_state().await? else {
            return Ok(PlaybackState::idle(now));
        };
        if let Some(id) = state.track_id().map(str::to_string) {
            state.liked = self.remote.liked_status(&id).await;
        }
        Ok(state)
    }

    pub async fn play(&self) -> Result<()> {
        if let Some(bridge) = self.connected_bridge().await {
            return Ok(bridge.play().await?);
        }
        self.remote.play().await?;
        self.refresh_remote().await;
        Ok(())
    }

    pub async fn pause(&self) -> Result<()> {
        if let Some(bridge) = self.connected_bridge().await {
            return Ok(bridge.pause().await?);
        }
        self.remote.pause().await?;
        self.refresh_remote().await;
        Ok(())
    }

    pub async fn next(&self) -> Result<()> {
        if let Some(bridge) = self.connected_bridge().await {
            return Ok(bridge.next().await?);
        }
        self.remote.next().await?;
        self.refresh_remote().await;
        Ok(())
    }

    pub async fn previous(&self) -> Result<()> {
        if let Some(bridge) = self.connected_bridge().await {
            return Ok(bridge.previous().await?);
        }
        self.remote.previous().await?;
        self.refresh_remote().await;
        Ok(())
    }

    pub async fn seek(&self, position_ms: i64) -> Result<()> {
        let position_ms = validate_seek(position_ms)?;
        if let Some(bridge) = self.connected_bridge().await {
            return Ok(bridge.seek(position_ms).await?);
        }
        self.remote.seek(position_ms).await?;
        self.refresh_remote().await;
        Ok(())
    }

    pub async fn set_volume(&self, volume: i64) -> Result<()> {
        let volume = validate_volume(volume)?;
        if let Some(bridge) = self.connected_bridge().await {
            return Ok(bridge.set_volume(volume).await?);
        }
        self.remote.set_volume(volume).await?;
        self.refresh_remote().await;
        Ok(())
    }

    pub async fn set_shuffle(&self, shuffle: bool) -> Result<()> {
        if let Some(bridge) = self.connected_bridge().await {
            return Ok(bridge.set_shuffle(shuffle).await?);
        }
        self.remote.set_shuffle(shuffle).await?;
        self.refresh_remote().await;
        Ok(())
    }

    pub async fn set_repeat(&self, state: &str) -> Result<()> {
        let state: RepeatState = state.parse()?;
        if let Some(bridge) = self.connected_bridge().await {
            return Ok(bridge.set_repeat(state).await?);
        }
        self.remote.set_repeat(state).await?;
        self.refresh_remote().await;
        Ok(())
    }

    pub async fn like(&self, ids: &[String]) -> Result<()> {
        let ids = validate_track_ids(ids)?;
        self.remote.save_tracks(&ids).await?;
        self.reconciler.update_liked(&ids, LikedStatus::Liked);
        Ok(())
    }

    pub async fn unlike(&self, ids: &[String]) -> Result<()> {
        let ids = validate_track_ids(ids)?;
        self.remote.remove_tracks(&ids).await?;
        self.reconciler.update_liked(&ids, LikedStatus::NotLiked);
        Ok(())
    }

    pub async fn check_liked(&self, ids: &[String]) -> Result<Vec<bool>> {
        let ids = validate_track_ids(ids)?;
        self.remote.check_saved_tracks(&ids).await
    }

    pub async fn devices(&self) -> Result<Vec<DeviceInfo>> {
        self.remote.list_devices().await
    }

    /// Canonical state, or a direct remote read before anything was published
    pub async fn current_state(&self) -> Result<PlaybackState> {
        if let Some(state) = self.reconciler.get_last() {
            return Ok(state);
        }
        self.fetch_remote().await
    }
}
