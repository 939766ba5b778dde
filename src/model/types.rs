//! Core type definitions shared by both playback sources

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Repeat mode state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepeatState {
    #[default]
    Off,
    Track,
    Context,
}

impl RepeatState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Track => "track",
            Self::Context => "context",
        }
    }

    /// MPRIS `LoopStatus` value for this mode
    pub fn to_loop_status(self) -> &'static str {
        match self {
            Self::Off => "None",
            Self::Track => "Track",
            Self::Context => "Playlist",
        }
    }

    /// Unknown loop statuses fall back to `Off`
    pub fn from_loop_status(status: &str) -> Self {
        match status {
            "Track" => Self::Track,
            "Playlist" => Self::Context,
            _ => Self::Off,
        }
    }
}

impl FromStr for RepeatState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(Self::Off),
            "track" => Ok(Self::Track),
            "context" => Ok(Self::Context),
            other => Err(ValidationError::InvalidValue {
                field: "state",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for RepeatState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<rspotify::model::RepeatState> for RepeatState {
    fn from(state: rspotify::model::RepeatState) -> Self {
        match state {
            rspotify::model::RepeatState::Off => Self::Off,
            rspotify::model::RepeatState::Track => Self::Track,
            rspotify::model::RepeatState::Context => Self::Context,
        }
    }
}

impl From<RepeatState> for rspotify::model::RepeatState {
    fn from(state: RepeatState) -> Self {
        match state {
            RepeatState::Off => Self::Off,
            RepeatState::Track => Self::Track,
            RepeatState::Context => Self::Context,
        }
    }
}

/// Information about a Spotify playback device
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub id: Option<String>,
    pub name: String,
    pub is_active: bool,
    pub volume_percent: Option<u8>,
}

/// Whether the current track is in the user's saved tracks.
///
/// Only the remote service knows this, so anything the bridge reports on its
/// own is `Unknown` until the remote side confirms it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LikedStatus {
    Liked,
    NotLiked,
    #[default]
    Unknown,
}

impl From<bool> for LikedStatus {
    fn from(liked: bool) -> Self {
        if liked { Self::Liked } else { Self::NotLiked }
    }
}
