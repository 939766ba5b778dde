//! Remote side: the Spotify Web API, device selection and the state poller

mod api;
mod client;
mod devices;
mod poller;

pub use api::{ApiFailure, ApiResult, RspotifyApi, SpotifyApi};
pub use client::{REMOTE_CALL_TIMEOUT, RemoteStateClient};
pub use devices::{DeviceChoice, DevicePreference};
pub use poller::{DEFAULT_POLL_INTERVAL, RemotePoller};
