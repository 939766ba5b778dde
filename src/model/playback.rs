//! Canonical playback state and its construction from Web API responses

use rspotify::model::{CurrentPlaybackContext, Device, Image, PlayableItem};
use rspotify::prelude::Id;
use serde::{Deserialize, Serialize};

use super::types::{DeviceInfo, LikedStatus, RepeatState};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artwork {
    pub large: Option<String>,
    pub medium: Option<String>,
    pub small: Option<String>,
}

impl Artwork {
    /// Same image for every size, as reported by MPRIS `mpris:artUrl`
    pub fn single(url: Option<String>) -> Self {
        Self {
            large: url.clone(),
            medium: url.clone(),
            small: url,
        }
    }

    /// Spotify lists images largest first
    fn from_images(images: &[Image]) -> Self {
        let url = |i: usize| images.get(i).map(|img| img.url.clone());
        Self {
            large: url(0),
            medium: url(1),
            small: url(2),
        }
    }
}

/// Metadata about the currently playing track
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// Spotify track id; local players may not expose one
    pub id: Option<String>,
    pub name: String,
    pub artist_display: String,
    pub album_name: String,
    pub artwork: Artwork,
    pub duration_ms: u64,
}

impl Track {
    pub fn from_item(item: &PlayableItem) -> Option<Self> {
        match item {
            PlayableItem::Track(track) => {
                let artist_display = track
                    .artists
                    .iter()
                    .map(|a| a.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");

                Some(Self {
                    id: track.id.as_ref().map(|id| id.id().to_string()),
                    name: track.name.clone(),
                    artist_display,
                    album_name: track.album.name.clone(),
                    artwork: Artwork::from_images(&track.album.images),
                    duration_ms: track.duration.num_milliseconds().max(0) as u64,
                })
            }
            PlayableItem::Episode(episode) => Some(Self {
                id: Some(episode.id.id().to_string()),
                name: episode.name.clone(),
                artist_display: episode.show.name.clone(),
                album_name: episode.show.name.clone(),
                artwork: Artwork::from_images(&episode.images),
                duration_ms: episode.duration.num_milliseconds().max(0) as u64,
            }),
            PlayableItem::Unknown(_) => None,
        }
    }

    /// Two tracks are the same song when their ids match, or, lacking ids,
    /// their display fields do
    pub fn same_song(&self, other: &Track) -> bool {
        match (&self.id, &other.id) {
            (Some(a), Some(b)) => a == b,
            _ => {
                self.name == other.name
                    && self.artist_display == other.artist_display
                    && self.album_name == other.album_name
            }
        }
    }
}

impl DeviceInfo {
    pub fn from_device(device: &Device) -> Self {
        Self {
            id: device.id.clone(),
            name: device.name.clone(),
            is_active: device.is_active,
            volume_percent: device.volume_percent.map(|v| v.min(100) as u8),
        }
    }
}

/// Complete playback snapshot as produced by either source
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybackState {
    pub track: Option<Track>,
    pub is_playing: bool,
    pub progress_ms: u64,
    pub shuffle: bool,
    pub repeat: RepeatState,
    pub volume_percent: u8,
    pub device: Option<DeviceInfo>,
    pub liked: LikedStatus,
    /// When the producing source observed this state (ms since epoch)
    pub source_timestamp: i64,
}

impl PlaybackState {
    /// Nothing loaded on any device
    pub fn idle(source_timestamp: i64) -> Self {
        Self {
            track: None,
            is_playing: false,
            progress_ms: 0,
            shuffle: false,
            repeat: RepeatState::Off,
            volume_percent: 0,
            device: None,
            liked: LikedStatus::Unknown,
            source_timestamp,
        }
    }

    pub fn from_playback(playback: &CurrentPlaybackContext) -> Self {
        let device = DeviceInfo::from_device(&playback.device);
        Self {
            track: playback.item.as_ref().and_then(Track::from_item),
            is_playing: playback.is_playing,
            progress_ms: playback
                .progress
                .map(|d| d.num_milliseconds().max(0) as u64)
                .unwrap_or(0),
            shuffle: playback.shuffle_state,
            repeat: playback.repeat_state.into(),
            volume_percent: device.volume_percent.unwrap_or(0),
            device: Some(device),
            liked: LikedStatus::Unknown,
            source_timestamp: playback.timestamp.timestamp_millis(),
        }
    }

    pub fn track_id(&self) -> Option<&str> {
        self.track.as_ref().and_then(|t| t.id.as_deref())
    }

    /// Value equality over everything a viewer can see; the observation
    /// timestamp is bookkeeping and excluded
    pub fn observably_equal(&self, other: &PlaybackState) -> bool {
        self.track == other.track
            && self.is_playing == other.is_playing
            && self.progress_ms == other.progress_ms
            && self.shuffle == other.shuffle
            && self.repeat == other.repeat
            && self.volume_percent == other.volume_percent
            && self.device == other.device
            && self.liked == other.liked
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: Option<&str>, name: &str) -> Track {
        Track {
            id: id.map(str::to_string),
            name: name.to_string(),
            artist_display: "Artist".to_string(),
            album_name: "Album".to_string(),
            artwork: Artwork::default(),
            duration_ms: 180_000,
        }
    }

    #[test]
    fn observable_equality_ignores_timestamp() {
        let a = PlaybackState::idle(1);
        let b = PlaybackState::idle(2);
        assert!(a.observably_equal(&b));
        assert_ne!(a, b);

        let mut c = PlaybackState::idle(1);
        c.volume_percent = 40;
        assert!(!a.observably_equal(&c));
    }

    #[test]
    fn same_song_prefers_ids() {
        assert!(track(Some("abc"), "One").same_song(&track(Some("abc"), "Other name")));
        assert!(!track(Some("abc"), "One").same_song(&track(Some("def"), "One")));
        assert!(track(None, "One").same_song(&track(Some("abc"), "One")));
    }
}
