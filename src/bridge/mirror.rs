//! In-memory mirror of the local player's properties

use super::bus::{Metadata, PlaybackStatus, PlayerProperties};
use crate::model::{Artwork, DeviceInfo, LikedStatus, PlaybackState, Track};

#[derive(Clone, Debug, Default)]
pub struct PlayerMirror {
    props: PlayerProperties,
}

impl PlayerMirror {
    pub fn from_snapshot(props: PlayerProperties) -> Self {
        Self { props }
    }

    /// Merge only the fields present in `change`
    pub fn apply(&mut self, change: PlayerProperties) {
        let props = &mut self.props;
        if change.metadata.is_some() {
            props.metadata = change.metadata;
        }
        if change.playback_status.is_some() {
            props.playback_status = change.playback_status;
        }
        if change.volume.is_some() {
            props.volume = change.volume;
        }
        if change.shuffle.is_some() {
            props.shuffle = change.shuffle;
        }
        if change.loop_status.is_some() {
            props.loop_status = change.loop_status;
        }
        if change.position_micros.is_some() {
            props.position_micros = change.position_micros;
        }
    }

    pub fn position_micros(&self) -> i64 {
        self.props.position_micros.unwrap_or(0)
    }

    pub fn set_position_micros(&mut self, position: i64) {
        self.props.position_micros = Some(position.max(0));
    }

    pub fn to_state(&self, device_name: &str, now_millis: i64) -> PlaybackState {
        let props = &self.props;
        let volume_percent = props
            .volume
            .map(|v| (v.clamp(0.0, 1.0) * 100.0).round() as u8)
            .unwrap_or(0);
        PlaybackState {
            track: props.metadata.as_ref().and_then(track_from_metadata),
            is_playing: props.playback_status == Some(PlaybackStatus::Playing),
            progress_ms: (self.position_micros().max(0) / 1000) as u64,
            shuffle: props.shuffle.unwrap_or(false),
            repeat: props.loop_status.unwrap_or_default(),
            volume_percent,
            device: Some(DeviceInfo {
                id: None,
                name: device_name.to_string(),
                is_active: true,
                volume_percent: Some(volume_percent),
            }),
            liked: LikedStatus::Unknown,
            source_timestamp: now_millis,
        }
    }
}

fn track_from_metadata(metadata: &Metadata) -> Option<Track> {
    let id = metadata
        .track_id
        .as_deref()
        .and_then(spotify_track_id)
        .or_else(|| metadata.url.as_deref().and_then(spotify_track_id));
    if metadata.title.is_none() && id.is_none() {
        return None;
    }
    Some(Track {
        id,
        name: metadata.title.clone().unwrap_or_default(),
        artist_display: metadata.artists.join(", "),
        album_name: metadata.album.clone().unwrap_or_default(),
        artwork: Artwork::single(metadata.art_url.clone()),
        duration_ms: (metadata.length_micros.unwrap_or(0).max(0) / 1000) as u64,
    })
}

/// Spotify id from `/org/spotify/track/ID`, `spotify:track:ID` or
/// `https://open.spotify.com/track/ID`
pub fn spotify_track_id(raw: &str) -> Option<String> {
    let (_, rest) = raw
        .rsplit_once("track/")
        .or_else(|| raw.rsplit_once("track:"))?;
    let id: String = rest
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    (!id.is_empty()).then_some(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RepeatState;

    fn snapshot() -> PlayerProperties {
        PlayerProperties {
            metadata: Some(Metadata {
                track_id: Some("/org/spotify/track/4uLU6hMCjMI75M1A2tKUQC".to_string()),
                title: Some("Song".to_string()),
                artists: vec!["A".to_string(), "B".to_string()],
                album: Some("Album".to_string()),
                art_url: Some("https://i.scdn.co/image/abc".to_string()),
                url: None,
                length_micros: Some(200_000_000),
            }),
            playback_status: Some(PlaybackStatus::Playing),
            volume: Some(0.55),
            shuffle: Some(false),
            loop_status: Some(RepeatState::Off),
            position_micros: Some(10_000_000),
        }
    }

    #[test]
    fn snapshot_maps_to_playback_state() {
        let state = PlayerMirror::from_snapshot(snapshot()).to_state("RadioStream", 7);
        let track = state.track.as_ref().unwrap();
        assert_eq!(track.id.as_deref(), Some("4uLU6hMCjMI75M1A2tKUQC"));
        assert_eq!(track.artist_display, "A, B");
        assert_eq!(track.duration_ms, 200_000);
        assert_eq!(track.artwork.small.as_deref(), Some("https://i.scdn.co/image/abc"));
        assert!(state.is_playing);
        assert_eq!(state.progress_ms, 10_000);
        assert_eq!(state.volume_percent, 55);
        assert_eq!(state.device.unwrap().name, "RadioStream");
        assert_eq!(state.source_timestamp, 7);
    }

    #[test]
    fn change_merges_only_changed_fields() {
        let mut mirror = PlayerMirror::from_snapshot(snapshot());
        mirror.apply(PlayerProperties {
            playback_status: Some(PlaybackStatus::Paused),
            loop_status: Some(RepeatState::Context),
            ..Default::default()
        });

        let state = mirror.to_state("RadioStream", 0);
        assert!(!state.is_playing);
        assert_eq!(state.repeat, RepeatState::Context);
        assert_eq!(state.volume_percent, 55);
        assert_eq!(state.track.unwrap().name, "Song");
    }

    #[test]
    fn parses_track_ids() {
        assert_eq!(spotify_track_id("spotify:track:abc123").as_deref(), Some("abc123"));
        assert_eq!(
            spotify_track_id("https://open.spotify.com/track/abc123?si=x").as_deref(),
            Some("abc123")
        );
        assert_eq!(spotify_track_id("/org/mpris/MediaPlayer2/TrackList/NoTrack"), None);
    }
}
