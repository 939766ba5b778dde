//! Fakes shared by the unit tests

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use futures::StreamExt;

use crate::auth::{
    Credential, CredentialStore, RefreshCoordinator, RefreshFailure, RefreshOutcome, TokenEndpoint,
};
use crate::bridge::{
    BusConnection, Metadata, PlaybackStatus, PlayerBus, PlayerControl, PlayerProperties,
};
use crate::clock::ManualClock;
use crate::error::BusError;
use crate::model::{Artwork, DeviceInfo, LikedStatus, PlaybackState, RepeatState, Track};
use crate::remote::{ApiFailure, ApiResult, SpotifyApi};

// ---------------------------------------------------------------- credentials

pub fn credential_issued_at(access: &str, issued_at_millis: i64) -> Credential {
    Credential {
        access_token: access.to_string(),
        refresh_token: "refresh-token".to_string(),
        issued_at_millis,
        ttl_seconds: 3600,
    }
}

pub fn temp_store(initial: Option<Credential>) -> (Arc<CredentialStore>, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = CredentialStore::open(dir.path().join("spotify-tokens.json")).unwrap();
    if let Some(credential) = initial {
        store.replace(credential).unwrap();
    }
    (Arc::new(store), dir)
}

/// Coordinator holding a fresh credential whose access token is `access`
pub fn coordinator_with(
    endpoint: Arc<FakeTokenEndpoint>,
) -> (RefreshCoordinator, tempfile::TempDir) {
    let (store, dir) = temp_store(Some(credential_issued_at("access", 0)));
    let clock = Arc::new(ManualClock::new(0));
    (RefreshCoordinator::new(store, endpoint, clock), dir)
}

pub struct FakeTokenEndpoint {
    default: RefreshOutcome,
    scripted: Mutex<VecDeque<RefreshOutcome>>,
    delay: Duration,
    calls: AtomicUsize,
}

impl FakeTokenEndpoint {
    fn with_default(default: RefreshOutcome) -> Self {
        Self {
            default,
            scripted: Mutex::default(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn succeeding(access: &str) -> Self {
        Self::with_default(RefreshOutcome::Success {
            new_access_token: access.to_string(),
            new_ttl: 3600,
            new_refresh_token: None,
        })
    }

    pub fn failing(reason: RefreshFailure) -> Self {
        Self::with_default(RefreshOutcome::Failure {
            reason,
            detail: format!("{reason:?}"),
        })
    }

    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }

    /// Answer the next call with `outcome` instead of the default
    pub fn push(&self, outcome: RefreshOutcome) {
        self.scripted.lock().unwrap().push_back(outcome);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenEndpoint for FakeTokenEndpoint {
    async fn refresh(&self, _refresh_token: &str) -> RefreshOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let scripted = self.scripted.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.default.clone())
    }
}

// ---------------------------------------------------------------- remote API

pub fn status(code: u16) -> ApiFailure {
    ApiFailure::Status {
        status: code,
        retry_after: None,
        message: String::new(),
    }
}

pub fn device(id: &str, active: bool) -> DeviceInfo {
    DeviceInfo {
        id: Some(id.to_string()),
        name: format!("Device {id}"),
        is_active: active,
        volume_percent: Some(50),
    }
}

/// A remote state playing `track_id` on "device-1"
pub fn playing(track_id: &str) -> PlaybackState {
    PlaybackState {
        track: Some(Track {
            id: Some(track_id.to_string()),
            name: format!("Song {track_id}"),
            artist_display: "Artist".to_string(),
            album_name: "Album".to_string(),
            artwork: Artwork::default(),
            duration_ms: 180_000,
        }),
        is_playing: true,
        progress_ms: 0,
        shuffle: false,
        repeat: RepeatState::Off,
        volume_percent: 50,
        device: Some(DeviceInfo {
            id: Some("device-1".to_string()),
            name: "Kitchen".to_string(),
            is_active: true,
            volume_percent: Some(50),
        }),
        liked: LikedStatus::Unknown,
        source_timestamp: 1_000,
    }
}

/// Records calls as `operation:argument` and fails on demand
#[derive(Default)]
pub struct FakeSpotifyApi {
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashMap<&'static str, VecDeque<ApiFailure>>>,
    playback: Mutex<Option<PlaybackState>>,
    devices: Mutex<Vec<DeviceInfo>>,
    saved: Mutex<HashSet<String>>,
    delay: Duration,
}

impl FakeSpotifyApi {
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fail_next(&self, operation: &'static str, failure: ApiFailure) {
        self.failures
            .lock()
            .unwrap()
            .entry(operation)
            .or_default()
            .push_back(failure);
    }

    pub fn set_playback(&self, state: Option<PlaybackState>) {
        *self.playback.lock().unwrap() = state;
    }

    pub fn set_devices(&self, devices: Vec<DeviceInfo>) {
        *self.devices.lock().unwrap() = devices;
    }

    pub fn set_saved(&self, ids: &[&str]) {
        *self.saved.lock().unwrap() = ids.iter().map(|id| id.to_string()).collect();
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    async fn record(&self, operation: &'static str, argument: &str) -> ApiResult<()> {
        self.calls.lock().unwrap().push(format!("{operation}:{argument}"));
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failure = self
            .failures
            .lock()
            .unwrap()
            .get_mut(operation)
            .and_then(VecDeque::pop_front);
        match failure {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SpotifyApi for FakeSpotifyApi {
    async fn playback_state(&self, token: &str) -> ApiResult<Option<PlaybackState>> {
        self.record("playback_state", token).await?;
        Ok(self.playback.lock().unwrap().clone())
    }

    async fn devices(&self, token: &str) -> ApiResult<Vec<DeviceInfo>> {
        self.record("devices", token).await?;
        Ok(self.devices.lock().unwrap().clone())
    }

    async fn resume(&self, _token: &str, device_id: Option<&str>) -> ApiResult<()> {
        self.record("resume", device_id.unwrap_or("-")).await
    }

    async fn pause(&self, token: &str) -> ApiResult<()> {
        self.record("pause", token).await
    }

    async fn next(&self, token: &str) -> ApiResult<()> {
        self.record("next", token).await
    }

    async fn previous(&self, token: &str) -> ApiResult<()> {
        self.record("previous", token).await
    }

    async fn seek(&self, _token: &str, position_ms: u64) -> ApiResult<()> {
        self.record("seek", &position_ms.to_string()).await
    }

    async fn set_volume(&self, _token: &str, volume_percent: u8) -> ApiResult<()> {
        self.record("set_volume", &volume_percent.to_string()).await
    }

    async fn set_shuffle(&self, _token: &str, shuffle: bool) -> ApiResult<()> {
        self.record("set_shuffle", &shuffle.to_string()).await
    }

    async fn set_repeat(&self, _token: &str, state: RepeatState) -> ApiResult<()> {
        self.record("set_repeat", state.as_str()).await
    }

    async fn transfer_playback(&self, _token: &str, device_id: &str, play: bool) -> ApiResult<()> {
        self.record("transfer_playback", &format!("{device_id}:{play}")).await
    }

    async fn saved_tracks_contains(&self, _token: &str, ids: &[String]) -> ApiResult<Vec<bool>> {
        self.record("saved_tracks_contains", &ids.join(",")).await?;
        let saved = self.saved.lock().unwrap();
        Ok(ids.iter().map(|id| saved.contains(id)).collect())
    }

    async fn save_tracks(&self, _token: &str, ids: &[String]) -> ApiResult<()> {
        self.record("save_tracks", &ids.join(",")).await?;
        self.saved.lock().unwrap().extend(ids.iter().cloned());
        Ok(())
    }

    async fn remove_tracks(&self, _token: &str, ids: &[String]) -> ApiResult<()> {
        self.record("remove_tracks", &ids.join(",")).await?;
        let mut saved = self.saved.lock().unwrap();
        for id in ids {
            saved.remove(id);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------- player bus

pub fn player_snapshot(track_id: &str, position_micros: i64) -> PlayerProperties {
    PlayerProperties {
        metadata: Some(Metadata {
            track_id: Some(format!("/org/spotify/track/{track_id}")),
            title: Some(format!("Song {track_id}")),
            artists: vec!["Artist".to_string()],
            album: Some("Album".to_string()),
            art_url: None,
            url: None,
            length_micros: Some(180_000_000),
        }),
        playback_status: Some(PlaybackStatus::Playing),
        volume: Some(0.5),
        shuffle: Some(false),
        loop_status: Some(RepeatState::Off),
        position_micros: Some(position_micros),
    }
}

/// Hands out queued players, one per successful connect
#[derive(Default)]
pub struct FakeBus {
    waiting: Mutex<VecDeque<Arc<FakePlayer>>>,
}

impl FakeBus {
    pub fn add_player(&self, snapshot: PlayerProperties) -> Arc<FakePlayer> {
        let player = Arc::new(FakePlayer::new(snapshot));
        self.waiting.lock().unwrap().push_back(player.clone());
        player
    }
}

#[async_trait]
impl PlayerBus for FakeBus {
    async fn connect(&self) -> Result<BusConnection, BusError> {
        let player = self
            .waiting
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(BusError::Disconnected)?;
        let changes = player
            .changes_rx
            .lock()
            .unwrap()
            .take()
            .ok_or(BusError::Disconnected)?;
        Ok(BusConnection {
            control: player,
            changes: UnboundedReceiverStream::new(changes).boxed(),
        })
    }
}

pub struct FakePlayer {
    snapshot: PlayerProperties,
    position: Mutex<i64>,
    changes_tx: Mutex<Option<mpsc::UnboundedSender<PlayerProperties>>>,
    changes_rx: Mutex<Option<mpsc::UnboundedReceiver<PlayerProperties>>>,
    commands: Mutex<Vec<String>>,
    seeks: Mutex<Vec<i64>>,
    failures: Mutex<VecDeque<BusError>>,
    hang: AtomicBool,
    property_reads: AtomicUsize,
}

impl FakePlayer {
    fn new(snapshot: PlayerProperties) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            position: Mutex::new(snapshot.position_micros.unwrap_or(0)),
            snapshot,
            changes_tx: Mutex::new(Some(tx)),
            changes_rx: Mutex::new(Some(rx)),
            commands: Mutex::default(),
            seeks: Mutex::default(),
            failures: Mutex::default(),
            hang: AtomicBool::new(false),
            property_reads: AtomicUsize::new(0),
        }
    }

    pub fn emit(&self, change: PlayerProperties) {
        if let Some(tx) = self.changes_tx.lock().unwrap().as_ref() {
            let _ = tx.send(change);
        }
    }

    /// End the change stream, as if the player left the bus
    pub fn disconnect(&self) {
        self.changes_tx.lock().unwrap().take();
    }

    pub fn set_position(&self, micros: i64) {
        *self.position.lock().unwrap() = micros;
    }

    pub fn fail_next(&self, error: BusError) {
        self.failures.lock().unwrap().push_back(error);
    }

    /// The next command never answers
    pub fn hang_next(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn seeks(&self) -> Vec<i64> {
        self.seeks.lock().unwrap().clone()
    }

    pub fn property_reads(&self) -> usize {
        self.property_reads.load(Ordering::SeqCst)
    }

    async fn command(&self, name: &str) -> Result<(), BusError> {
        self.commands.lock().unwrap().push(name.to_string());
        if self.hang.swap(false, Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        match self.failures.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PlayerControl for FakePlayer {
    async fn properties(&self) -> Result<PlayerProperties, BusError> {
        self.property_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshot.clone())
    }

    async fn position_micros(&self) -> Result<i64, BusError> {
        Ok(*self.position.lock().unwrap())
    }

    async fn play(&self) -> Result<(), BusError> {
        self.command("Play").await
    }

    async fn pause(&self) -> Result<(), BusError> {
        self.command("Pause").await
    }

    async fn next(&self) -> Result<(), BusError> {
        self.command("Next").await
    }

    async fn previous(&self) -> Result<(), BusError> {
        self.command("Previous").await
    }

    async fn seek(&self, offset_micros: i64) -> Result<(), BusError> {
        self.seeks.lock().unwrap().push(offset_micros);
        self.command("Seek").await
    }

    async fn set_volume(&self, volume: f64) -> Result<(), BusError> {
        self.command(&format!("Volume={volume}")).await
    }

    async fn set_shuffle(&self, shuffle: bool) -> Result<(), BusError> {
        self.command(&format!("Shuffle={shuffle}")).await
    }

    async fn set_loop_status(&self, status: RepeatState) -> Result<(), BusError> {
        self.command(&format!("LoopStatus={}", status.to_loop_status())).await
    }
}
