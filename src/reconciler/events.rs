//! Events pushed to live observers

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{PlaybackState, RepeatState, Track};

pub const AUTH_EXPIRED_CODE: &str = "REFRESH_TOKEN_REVOKED";
pub const AUTH_EXPIRED_MESSAGE: &str = "Spotify authorization expired. Please re-authenticate.";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PlaybackChange {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_playing: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shuffle: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat: Option<RepeatState>,
}

impl PlaybackChange {
    fn is_empty(&self) -> bool {
        self.is_playing.is_none() && self.shuffle.is_none() && self.repeat.is_none()
    }
}

/// Serialized as its payload only; the event name travels separately
/// (the SSE `event:` field)
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum PushEvent {
    StateUpdate(PlaybackState),
    TrackChanged {
        track: Option<Track>,
    },
    PlaybackChanged(PlaybackChange),
    VolumeChanged {
        volume: u8,
    },
    AuthExpired {
        code: &'static str,
        message: &'static str,
        timestamp: DateTime<Utc>,
    },
}

impl PushEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::StateUpdate(_) => "state-update",
            Self::TrackChanged { .. } => "track-changed",
            Self::PlaybackChanged(_) => "playback-changed",
            Self::VolumeChanged { .. } => "volume-changed",
            Self::AuthExpired { .. } => "auth-expired",
        }
    }

    pub fn auth_expired(now_millis: i64) -> Self {
        Self::AuthExpired {
            code: AUTH_EXPIRED_CODE,
            message: AUTH_EXPIRED_MESSAGE,
            timestamp: DateTime::from_timestamp_millis(now_millis).unwrap_or_default(),
        }
    }
}

/// Full state first, then one event per aspect that changed
pub(crate) fn events_for(
    previous: Option<&PlaybackState>,
    current: &PlaybackState,
) -> Vec<PushEvent> {
    let mut events = vec![PushEvent::StateUpdate(current.clone())];
    let Some(previous) = previous else {
        return events;
    };

    let same_track = match (&previous.track, &current.track) {
        (Some(a), Some(b)) => a.same_song(b),
        (None, None) => true,
        _ => false,
    };
    if !same_track {
        events.push(PushEvent::TrackChanged {
            track: current.track.clone(),
        });
    }

    let change = PlaybackChange {
        is_playing: (previous.is_playing != current.is_playing).then_some(current.is_playing),
        shuffle: (previous.shuffle != current.shuffle).then_some(current.shuffle),
        repeat: (previous.repeat != current.repeat).then_some(current.repeat),
    };
    if !change.is_empty() {
        events.push(PushEvent::PlaybackChanged(change));
    }

    if previous.volume_percent != current.volume_percent {
        events.push(PushEvent::VolumeChanged {
            volume: current.volume_percent,
        });
    }
    events
}
