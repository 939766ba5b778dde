//! Model module - playback data types shared by every source
//!
//! - `types`: small enums and device info
//! - `playback`: canonical `PlaybackState` / `Track` and Web API conversions
//! - `cache`: liked-songs lookup cache

mod cache;
mod playback;
mod types;

pub use cache::LikedSongsCache;
pub use playback::{Artwork, PlaybackState, Track};
pub use types::{DeviceInfo, LikedStatus, RepeatState};
