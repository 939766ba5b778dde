//! Player bus seam: what the bridge needs from an MPRIS connection

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::BusError;
use crate::model::RepeatState;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PlaybackStatus {
    Playing,
    Paused,
    #[default]
    Stopped,
}

impl FromStr for PlaybackStatus {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Playing" => Ok(Self::Playing),
            "Paused" => Ok(Self::Paused),
            "Stopped" => Ok(Self::Stopped),
            other => Err(BusError::CallFailed(format!("unknown PlaybackStatus {other}"))),
        }
    }
}

/// `xesam:*` / `mpris:*` metadata of the loaded track
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Metadata {
    pub track_id: Option<String>,
    pub title: Option<String>,
    pub artists: Vec<String>,
    pub album: Option<String>,
    pub art_url: Option<String>,
    pub url: Option<String>,
    pub length_micros: Option<i64>,
}

/// Player properties. A full snapshot has every field set; a change
/// notification only the ones that changed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlayerProperties {
    pub metadata: Option<Metadata>,
    pub playback_status: Option<PlaybackStatus>,
    /// 0.0..=1.0
    pub volume: Option<f64>,
    pub shuffle: Option<bool>,
    pub loop_status: Option<RepeatState>,
    pub position_micros: Option<i64>,
}

#[async_trait]
pub trait PlayerControl: Send + Sync {
    async fn properties(&self) -> Result<PlayerProperties, BusError>;
    async fn position_micros(&self) -> Result<i64, BusError>;
    async fn play(&self) -> Result<(), BusError>;
    async fn pause(&self) -> Result<(), BusError>;
    async fn next(&self) -> Result<(), BusError>;
    async fn previous(&self) -> Result<(), BusError>;
    /// Relative seek
    async fn seek(&self, offset_micros: i64) -> Result<(), BusError>;
    async fn set_volume(&self, volume: f64) -> Result<(), BusError>;
    async fn set_shuffle(&self, shuffle: bool) -> Result<(), BusError>;
    async fn set_loop_status(&self, status: RepeatState) -> Result<(), BusError>;
}

/// A live player connection. `changes` ends when the connection is lost.
pub struct BusConnection {
    pub control: Arc<dyn PlayerControl>,
    pub changes: BoxStream<'static, PlayerProperties>,
}

#[async_trait]
pub trait PlayerBus: Send + Sync {
    async fn connect(&self) -> Result<BusConnection, BusError>;
}
