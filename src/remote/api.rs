//! Raw Spotify Web API surface used by `RemoteStateClient`.
//!
//! Calls take the access token explicitly so the caller decides when to
//! refresh and retry. Failures carry the raw HTTP status so they can be
//! translated in one place.

use std::sync::Arc;

use async_trait::async_trait;
use rspotify::{
    AuthCodeSpotify, ClientError, Config, Token,
    http::HttpError,
    model::TrackId,
    prelude::*,
};

use crate::model::{DeviceInfo, PlaybackState, RepeatState};

/// Spotify caps saved-track lookups and edits at 50 ids per request
const SAVED_TRACKS_BATCH: usize = 50;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApiFailure {
    /// Non-success HTTP status
    Status {
        status: u16,
        retry_after: Option<u64>,
        message: String,
    },
    Timeout,
    Transport(String),
    Decode(String),
    InvalidId(String),
}

pub type ApiResult<T> = std::result::Result<T, ApiFailure>;

#[async_trait]
pub trait SpotifyApi: Send + Sync {
    /// `None` when nothing is playing (HTTP 204)
    async fn playback_state(&self, token: &str) -> ApiResult<Option<PlaybackState>>;
    async fn devices(&self, token: &str) -> ApiResult<Vec<DeviceInfo>>;
    async fn resume(&self, token: &str, device_id: Option<&str>) -> ApiResult<()>;
    async fn pause(&self, token: &str) -> ApiResult<()>;
    async fn next(&self, token: &str) -> ApiResult<()>;
    async fn previous(&self, token: &str) -> ApiResult<()>;
    async fn seek(&self, token: &str, position_ms: u64) -> ApiResult<()>;
    async fn set_volume(&self, token: &str, volume_percent: u8) -> ApiResult<()>;
    async fn set_shuffle(&self, token: &str, shuffle: bool) -> ApiResult<()>;
    async fn set_repeat(&self, token: &str, state: RepeatState) -> ApiResult<()>;
    async fn transfer_playback(&self, token: &str, device_id: &str, play: bool) -> ApiResult<()>;
    async fn saved_tracks_contains(&self, token: &str, ids: &[String]) -> ApiResult<Vec<bool>>;
    async fn save_tracks(&self, token: &str, ids: &[String]) -> ApiResult<()>;
    async fn remove_tracks(&self, token: &str, ids: &[String]) -> ApiResult<()>;
}

/// `SpotifyApi` over rspotify. Automatic refresh and token caching are
/// disabled; the access token is installed before every request.
#[derive(Clone)]
pub struct RspotifyApi {
    client: Arc<AuthCodeSpotify>,
}

impl RspotifyApi {
    pub fn new() -> Self {
        let config = Config {
            token_cached: false,
            token_refreshing: false,
            ..Default::default()
        };
        Self {
            client: Arc::new(AuthCodeSpotify::with_config(
                Default::default(),
                Default::default(),
                config,
            )),
        }
    }

    async fn authorized(&self, token: &str) -> ApiResult<&AuthCodeSpotify> {
        let mut slot = self
            .client
            .token
            .lock()
            .await
            .map_err(|_| ApiFailure::Transport("token lock unavailable".to_string()))?;
        let stale = slot.as_ref().is_none_or(|t| t.access_token != token);
        if stale {
            *slot = Some(Token {
                access_token: token.to_string(),
                ..Default::default()
            });
        }
        Ok(&self.client)
    }
}

impl Default for RspotifyApi {
    fn default() -> Self {
        Self::new()
    }
}

fn track_ids(ids: &[String]) -> ApiResult<Vec<TrackId<'static>>> {
    ids.iter()
        .map(|id| {
            TrackId::from_id(id.clone()).map_err(|_| ApiFailure::InvalidId(id.clone()))
        })
        .collect()
}

impl From<ClientError> for ApiFailure {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Http(http) => match *http {
                HttpError::StatusCode(response) => {
                    let status = response.status();
                    let retry_after = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.trim().parse().ok());
                    ApiFailure::Status {
                        status: status.as_u16(),
                        retry_after,
                        message: status.canonical_reason().unwrap_or("").to_string(),
                    }
                }
                HttpError::Client(e) if e.is_timeout() => ApiFailure::Timeout,
                HttpError::Client(e) => ApiFailure::Transport(e.to_string()),
            },
            ClientError::ParseJson(e) => ApiFailure::Decode(e.to_string()),
            other => ApiFailure::Transport(other.to_string()),
        }
    }
}

#[async_trait]
impl SpotifyApi for RspotifyApi {
    async fn playback_state(&self, token: &str) -> ApiResult<Option<PlaybackState>> {
        let client = self.authorized(token).await?;
        let playback = client.current_playback(None, None::<Vec<_>>).await?;
        Ok(playback.as_ref().map(PlaybackState::from_playback))
    }

    async fn devices(&self, token: &str) -> ApiResult<Vec<DeviceInfo>> {
        let client = self.authorized(token).await?;
        let devices = client.device().await?;
        Ok(devices.iter().map(DeviceInfo::from_device).collect())
    }

    async fn resume(&self, token: &str, device_id: Option<&str>) -> ApiResult<()> {
        let client = self.authorized(token).await?;
        client.resume_playback(device_id, None).await?;
        Ok(())
    }

    async fn pause(&self, token: &str) -> ApiResult<()> {
        self.authorized(token).await?.pause_playback(None).await?;
        Ok(())
    }

    async fn next(&self, token: &str) -> ApiResult<()> {
        self.authorized(token).await?.next_track(None).await?;
        Ok(())
    }

    async fn previous(&self, token: &str) -> ApiResult<()> {
        self.authorized(token).await?.previous_track(None).await?;
        Ok(())
    }

    async fn seek(&self, token: &str, position_ms: u64) -> ApiResult<()> {
        let position =
            chrono::Duration::milliseconds(i64::try_from(position_ms).unwrap_or(i64::MAX));
        self.authorized(token).await?.seek_track(position, None).await?;
        Ok(())
    }

    async fn set_volume(&self, token: &str, volume_percent: u8) -> ApiResult<()> {
        self.authorized(token).await?.volume(volume_percent, None).await?;
        Ok(())
    }

    async fn set_shuffle(&self, token: &str, shuffle: bool) -> ApiResult<()> {
        self.authorized(token).await?.shuffle(shuffle, None).await?;
        Ok(())
    }

    async fn set_repeat(&self, token: &str, state: RepeatState) -> ApiResult<()> {
        self.authorized(token).await?.repeat(state.into(), None).await?;
        Ok(())
    }

    async fn transfer_playback(&self, token: &str, device_id: &str, play: bool) -> ApiResult<()> {
        self.authorized(token)
            .await?
            .transfer_playback(device_id, Some(play))
            .await?;
        Ok(())
    }

    async fn saved_tracks_contains(&self, token: &str, ids: &[String]) -> ApiResult<Vec<bool>> {
        let client = self.authorized(token).await?;
        let mut found = Vec::with_capacity(ids.len());
        for batch in ids.chunks(SAVED_TRACKS_BATCH) {
            found.extend(client.current_user_saved_tracks_contains(track_ids(batch)?).await?);
        }
        Ok(found)
    }

    async fn save_tracks(&self, token: &str, ids: &[String]) -> ApiResult<()> {
        let client = self.authorized(token).await?;
        for batch in ids.chunks(SAVED_TRACKS_BATCH) {
            client.current_user_saved_tracks_add(track_ids(batch)?).await?;
        }
        Ok(())
    }

    async fn remove_tracks(&self, token: &str, ids: &[String]) -> ApiResult<()> {
        let client = self.authorized(token).await?;
        for batch in ids.chunks(SAVED_TRACKS_BATCH) {
            client.current_user_saved_tracks_delete(track_ids(batch)?).await?;
        }
        Ok(())
    }
}
