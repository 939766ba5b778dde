//! Typed access to the remote playback state with credential handling

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};

use super::api::{ApiFailure, ApiResult, SpotifyApi};
use super::devices::{DeviceChoice, DevicePreference};
use crate::auth::RefreshCoordinator;
use crate::error::{BridgeError, Result, UpstreamError, ValidationError};
use crate::log_api_result;
use crate::model::{DeviceInfo, LikedSongsCache, LikedStatus, PlaybackState, RepeatState};

pub const REMOTE_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Spotify client wrapper. Every call obtains a credential from the shared
/// `RefreshCoordinator` first and, on a 401, refreshes and retries once.
#[derive(Clone)]
pub struct RemoteStateClient {
    api: Arc<dyn SpotifyApi>,
    coordinator: RefreshCoordinator,
    devices: DevicePreference,
    liked_songs_cache: LikedSongsCache,
}

impl RemoteStateClient {
    pub fn new(
        api: Arc<dyn SpotifyApi>,
        coordinator: RefreshCoordinator,
        device_name_hint: Option<String>,
    ) -> Self {
        Self {
            api,
            coordinator,
            devices: DevicePreference::new(device_name_hint),
            liked_songs_cache: LikedSongsCache::new(),
        }
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    async fn call<T, F>(&self, operation: &'static str, request: F) -> Result<T>
    where
        F: Fn(Arc<dyn SpotifyApi>, String) -> BoxFuture<'static, ApiResult<T>>,
    {
        let credential = self.coordinator.ensure_valid_credential().await?;
        let result = match self.attempt(&request, credential.access_token.clone()).await {
            Err(ApiFailure::Status { status: 401, .. }) => {
                tracing::warn!(operation, "Access token rejected, refreshing and retrying once");
                let refreshed = self.coordinator.force_refresh(&credential.access_token).await?;
                match self.attempt(&request, refreshed.access_token).await {
                    Err(ApiFailure::Status { status: 401, .. }) => {
                        Err(UpstreamError::CredentialExpired.into())
                    }
                    other => other.map_err(translate),
                }
            }
            other => other.map_err(translate),
        };
        log_api_result!(operation, result);
        result
    }

    async fn attempt<T, F>(&self, request: &F, token: String) -> ApiResult<T>
    where
        F: Fn(Arc<dyn SpotifyApi>, String) -> BoxFuture<'static, ApiResult<T>>,
    {
        match tokio::time::timeout(REMOTE_CALL_TIMEOUT, request(self.api.clone(), token)).await {
            Ok(result) => result,
            Err(_) => Err(ApiFailure::Timeout),
        }
    }

    pub async fn get_playback_state(&self) -> Result<Option<PlaybackState>> {
        let state = self
            .call("playback_state", |api, token| {
                async move { api.playback_state(&token).await }.boxed()
            })
            .await?;
        if let Some(state) = &state {
            self.devices.observe_state(state).await;
        }
        Ok(state)
    }

    pub async fn list_devices(&self) -> Result<Vec<DeviceInfo>> {
        let devices = self
            .call("devices", |api, token| {
                async move { api.devices(&token).await }.boxed()
            })
            .await?;
        tracing::debug!(count = devices.len(), "Found devices");
        self.devices.observe_devices(&devices).await;
        Ok(devices)
    }

    /// Resume on the active device, or transfer to the best available one
    pub async fn play(&self) -> Result<()> {
        let devices = self.list_devices().await?;
        match self.devices.select(&devices).await? {
            DeviceChoice::Active(device_id) => {
                crate::log_api_request!("resume", device_id = %device_id);
                self.call("resume", move |api, token| {
                    let device_id = device_id.clone();
                    async move { api.resume(&token, Some(&device_id)).await }.boxed()
                })
                .await
            }
            DeviceChoice::Transfer(device_id) => self.transfer_playback(&device_id, true).await,
        }
    }

    pub async fn pause(&self) -> Result<()> {
        self.call("pause", |api, token| {
            async move { api.pause(&token).await }.boxed()
        })
        .await
    }

    pub async fn next(&self) -> Result<()> {
        self.call("next", |api, token| {
            async move { api.next(&token).await }.boxed()
        })
        .await
    }

    pub async fn previous(&self) -> Result<()> {
        self.call("previous", |api, token| {
            async move { api.previous(&token).await }.boxed()
        })
        .await
    }

    pub async fn seek(&self, position_ms: u64) -> Result<()> {
        crate::log_api_request!("seek", position_ms);
        self.call("seek", move |api, token| {
            async move { api.seek(&token, position_ms).await }.boxed()
        })
        .await
    }

    pub async fn set_volume(&self, volume_percent: u8) -> Result<()> {
        crate::log_api_request!("set_volume", volume_percent);
        self.call("set_volume", move |api, token| {
            async move { api.set_volume(&token, volume_percent).await }.boxed()
        })
        .await
    }

    pub async fn set_shuffle(&self, shuffle: bool) -> Result<()> {
        self.call("set_shuffle", move |api, token| {
            async move { api.set_shuffle(&token, shuffle).await }.boxed()
        })
        .await
    }

    pub async fn set_repeat(&self, state: RepeatState) -> Result<()> {
        self.call("set_repeat", move |api, token| {
            async move { api.set_repeat(&token, state).await }.boxed()
        })
        .await
    }

    pub async fn transfer_playback(&self, device_id: &str, play: bool) -> Result<()> {
        crate::log_api_request!("transfer_playback", device_id, play);
        let device_id = device_id.to_string();
        self.call("transfer_playback", move |api, token| {
            let device_id = device_id.clone();
            async move { api.transfer_playback(&token, &device_id, play).await }.boxed()
        })
        .await
    }

    pub async fn check_saved_tracks(&self, ids: &[String]) -> Result<Vec<bool>> {
        let owned = ids.to_vec();
        let found = self
            .call("saved_tracks_contains", move |api, token| {
                let ids = owned.clone();
                async move { api.saved_tracks_contains(&token, &ids).await }.boxed()
            })
            .await?;
        self.liked_songs_cache
            .record(ids.iter().map(String::as_str).zip(found.iter().copied()))
            .await;
        Ok(found)
    }

    pub async fn save_tracks(&self, ids: &[String]) -> Result<()> {
        let owned = ids.to_vec();
        self.call("save_tracks", move |api, token| {
            let ids = owned.clone();
            async move { api.save_tracks(&token, &ids).await }.boxed()
        })
        .await?;
        self.liked_songs_cache
            .record(ids.iter().map(|id| (id.as_str(), true)))
            .await;
        Ok(())
    }

    pub async fn remove_tracks(&self, ids: &[String]) -> Result<()> {
        let owned = ids.to_vec();
        self.call("remove_tracks", move |api, token| {
            let ids = owned.clone();
            async move { api.remove_tracks(&token, &ids).await }.boxed()
        })
        .await?;
        self.liked_songs_cache
            .record(ids.iter().map(|id| (id.as_str(), false)))
            .await;
        Ok(())
    }

    /// Cached answer if there is one, otherwise ask Spotify. Never fails:
    /// anything that goes wrong is reported as `Unknown`.
    pub async fn liked_status(&self, track_id: &str) -> LikedStatus {
        match self.liked_songs_cache.status(track_id).await {
            LikedStatus::Unknown => {}
            known => return known,
        }
        match self.check_saved_tracks(&[track_id.to_string()]).await {
            Ok(found) => found.first().copied().map(LikedStatus::from).unwrap_or_default(),
            Err(e) => {
                tracing::debug!(track_id, error = %e, "Liked status unavailable");
                LikedStatus::Unknown
            }
        }
    }
}

fn translate(failure: ApiFailure) -> BridgeError {
    match failure {
        ApiFailure::Status {
            status,
            retry_after,
            message,
        } => match status {
            401 => UpstreamError::CredentialExpired.into(),
            403 => UpstreamError::Forbidden(message).into(),
            404 => UpstreamError::NotFound(message).into(),
            429 => UpstreamError::RateLimited {
                retry_after_seconds: retry_after.unwrap_or(1),
            }
            .into(),
            502 | 503 => UpstreamError::Unavailable(message).into(),
            _ => UpstreamError::Unexpected { status, message }.into(),
        },
        ApiFailure::Timeout => UpstreamError::Unavailable("request timed out".to_string()).into(),
        ApiFailure::Transport(message) => UpstreamError::Unavailable(message).into(),
        ApiFailure::Decode(message) => UpstreamError::Unexpected {
            status: 200,
            message,
        }
        .into(),
        ApiFailure::InvalidId(value) => ValidationError::InvalidValue {
            field: "ids",
            value,
        }
        .into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;
    use crate::test_support::{FakeSpotifyApi, FakeTokenEndpoint, coordinator_with, device, status};

    fn client(
        api: Arc<FakeSpotifyApi>,
        endpoint: Arc<FakeTokenEndpoint>,
    ) -> (RemoteStateClient, tempfile::TempDir) {
        let (coordinator, dir) = coordinator_with(endpoint);
        (RemoteStateClient::new(api, coordinator, None), dir)
    }

    #[tokio::test]
    async fn nothing_playing_is_none() {
        let api = Arc::new(FakeSpotifyApi::default());
        let (client, _dir) = client(api.clone(), Arc::new(FakeTokenEndpoint::succeeding("new")));

        assert_eq!(client.get_playback_state().await, Ok(None));
        assert_eq!(api.calls(), vec!["playback_state:access"]);
    }

    #[tokio::test]
    async fn unauthorized_response_refreshes_and_retries_once() {
        let api = Arc::new(FakeSpotifyApi::default());
        api.fail_next("pause", status(401));
        let endpoint = Arc::new(FakeTokenEndpoint::succeeding("refreshed"));
        let (client, _dir) = client(api.clone(), endpoint.clone());

        assert_eq!(client.pause().await, Ok(()));
        assert_eq!(endpoint.calls(), 1);
        assert_eq!(api.calls(), vec!["pause:access", "pause:refreshed"]);
    }

    #[tokio::test]
    async fn second_unauthorized_response_surfaces_credential_expired() {
        let api = Arc::new(FakeSpotifyApi::default());
        api.fail_next("pause", status(401));
        api.fail_next("pause", status(401));
        let endpoint = Arc::new(FakeTokenEndpoint::succeeding("refreshed"));
        let (client, _dir) = client(api.clone(), endpoint.clone());

        assert_eq!(
            client.pause().await,
            Err(UpstreamError::CredentialExpired.into())
        );
        assert_eq!(endpoint.calls(), 1);
        assert_eq!(api.calls().len(), 2);
    }

    #[tokio::test]
    async fn revoked_refresh_after_401_is_an_auth_error() {
        let api = Arc::new(FakeSpotifyApi::default());
        api.fail_next("next", status(401));
        let endpoint = Arc::new(FakeTokenEndpoint::failing(
            crate::auth::RefreshFailure::InvalidGrant,
        ));
        let (client, _dir) = client(api.clone(), endpoint);

        assert_eq!(client.next().await, Err(AuthError::Unauthorized.into()));
        assert_eq!(api.calls().len(), 1);
    }

    #[tokio::test]
    async fn status_codes_are_translated_without_retry() {
        let api = Arc::new(FakeSpotifyApi::default());
        let (client, _dir) = client(api.clone(), Arc::new(FakeTokenEndpoint::succeeding("new")));

        api.fail_next("next", status(403));
        assert!(matches!(
            client.next().await,
            Err(BridgeError::Upstream(UpstreamError::Forbidden(_)))
        ));

        api.fail_next("next", status(404));
        assert!(matches!(
            client.next().await,
            Err(BridgeError::Upstream(UpstreamError::NotFound(_)))
        ));

        api.fail_next("next", status(503));
        assert!(matches!(
            client.next().await,
            Err(BridgeError::Upstream(UpstreamError::Unavailable(_)))
        ));

        api.fail_next("next", status(500));
        assert!(matches!(
            client.next().await,
            Err(BridgeError::Upstream(UpstreamError::Unexpected { status: 500, .. }))
        ));

        assert_eq!(api.calls().len(), 4);
    }

    #[tokio::test]
    async fn rate_limit_carries_retry_hint() {
        let api = Arc::new(FakeSpotifyApi::default());
        let (client, _dir) = client(api.clone(), Arc::new(FakeTokenEndpoint::succeeding("new")));

        api.fail_next(
            "set_volume",
            ApiFailure::Status {
                status: 429,
                retry_after: Some(7),
                message: String::new(),
            },
        );
        assert_eq!(
            client.set_volume(30).await,
            Err(UpstreamError::RateLimited { retry_after_seconds: 7 }.into())
        );

        api.fail_next("set_volume", status(429));
        assert_eq!(
            client.set_volume(30).await,
            Err(UpstreamError::RateLimited { retry_after_seconds: 1 }.into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out_as_unavailable() {
        let api = Arc::new(FakeSpotifyApi::default().with_delay(Duration::from_secs(30)));
        let (client, _dir) = client(api, Arc::new(FakeTokenEndpoint::succeeding("new")));

        assert!(matches!(
            client.pause().await,
            Err(BridgeError::Upstream(UpstreamError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn play_resumes_on_active_device_without_transfer() {
        let api = Arc::new(FakeSpotifyApi::default());
        api.set_devices(vec![device("a", false), device("b", true)]);
        let (client, _dir) = client(api.clone(), Arc::new(FakeTokenEndpoint::succeeding("new")));

        client.play().await.unwrap();
        assert_eq!(api.calls(), vec!["devices:access", "resume:b"]);
    }

    #[tokio::test]
    async fn play_transfers_to_preferred_device() {
        let api = Arc::new(FakeSpotifyApi::default());
        let (client, _dir) = client(api.clone(), Arc::new(FakeTokenEndpoint::succeeding("new")));

        api.set_devices(vec![device("a", false), device("c", true)]);
        client.list_devices().await.unwrap();

        api.set_devices(vec![device("a", false), device("c", false)]);
        client.play().await.unwrap();
        assert_eq!(
            api.calls(),
            vec!["devices:access", "devices:access", "transfer_playback:c:true"]
        );
    }

    #[tokio::test]
    async fn play_without_devices_fails() {
        let api = Arc::new(FakeSpotifyApi::default());
        let (client, _dir) = client(api.clone(), Arc::new(FakeTokenEndpoint::succeeding("new")));

        assert_eq!(
            client.play().await,
            Err(UpstreamError::NoDeviceAvailable.into())
        );
        assert_eq!(api.calls(), vec!["devices:access"]);
    }

    #[tokio::test]
    async fn liked_status_uses_cache_after_edits() {
        let api = Arc::new(FakeSpotifyApi::default());
        api.set_saved(&["t1"]);
        let (client, _dir) = client(api.clone(), Arc::new(FakeTokenEndpoint::succeeding("new")));

        assert_eq!(client.liked_status("t1").await, LikedStatus::Liked);
        assert_eq!(client.liked_status("t1").await, LikedStatus::Liked);
        assert_eq!(api.calls().len(), 1);

        client.remove_tracks(&["t1".to_string()]).await.unwrap();
        assert_eq!(client.liked_status("t1").await, LikedStatus::NotLiked);

        api.fail_next("saved_tracks_contains", status(503));
        assert_eq!(client.liked_status("t2").await, LikedStatus::Unknown);
    }
}
