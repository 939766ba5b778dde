//! `PlayerBus` over D-Bus with zbus

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use zbus::fdo::{DBusProxy, PropertiesProxy};
use zbus::proxy::CacheProperties;
use zbus::zvariant::{OwnedValue, Value};
use zbus::Connection;

use super::bus::{
    BusConnection, Metadata, PlaybackStatus, PlayerBus, PlayerControl, PlayerProperties,
};
use crate::error::BusError;
use crate::model::RepeatState;

pub const DEFAULT_PLAYER_PREFIX: &str = "org.mpris.MediaPlayer2.spotifyd";
const MPRIS_PATH: &str = "/org/mpris/MediaPlayer2";
const PLAYER_INTERFACE: &str = "org.mpris.MediaPlayer2.Player";

#[zbus::proxy(
    interface = "org.mpris.MediaPlayer2.Player",
    default_path = "/org/mpris/MediaPlayer2",
    gen_blocking = false
)]
trait Player {
    fn play(&self) -> zbus::Result<()>;
    fn pause(&self) -> zbus::Result<()>;
    fn next(&self) -> zbus::Result<()>;
    fn previous(&self) -> zbus::Result<()>;
    fn seek(&self, offset: i64) -> zbus::Result<()>;

    #[zbus(property)]
    fn playback_status(&self) -> zbus::Result<String>;
    #[zbus(property)]
    fn loop_status(&self) -> zbus::Result<String>;
    #[zbus(property)]
    fn set_loop_status(&self, value: &str) -> zbus::Result<()>;
    #[zbus(property)]
    fn shuffle(&self) -> zbus::Result<bool>;
    #[zbus(property)]
    fn set_shuffle(&self, value: bool) -> zbus::Result<()>;
    #[zbus(property)]
    fn volume(&self) -> zbus::Result<f64>;
    #[zbus(property)]
    fn set_volume(&self, value: f64) -> zbus::Result<()>;
    #[zbus(property)]
    fn position(&self) -> zbus::Result<i64>;
    #[zbus(property)]
    fn metadata(&self) -> zbus::Result<HashMap<String, OwnedValue>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum BusKind {
    /// spotifyd running as a system service
    #[default]
    System,
    Session,
}

/// Finds the first player whose bus name starts with `prefix`
pub struct MprisBus {
    kind: BusKind,
    prefix: String,
}

impl MprisBus {
    pub fn new(kind: BusKind, prefix: impl Into<String>) -> Self {
        Self {
            kind,
            prefix: prefix.into(),
        }
    }
}

fn call_failed(err: impl std::fmt::Display) -> BusError {
    BusError::CallFailed(err.to_string())
}

#[async_trait]
impl PlayerBus for MprisBus {
    async fn connect(&self) -> Result<BusConnection, BusError> {
        let connection = match self.kind {
            BusKind::System => Connection::system().await,
            BusKind::Session => Connection::session().await,
        }
        .map_err(call_failed)?;

        let dbus = DBusProxy::new(&connection).await.map_err(call_failed)?;
        let name = dbus
            .list_names()
            .await
            .map_err(call_failed)?
            .into_iter()
            .map(|n| n.to_string())
            .find(|n| n.starts_with(&self.prefix))
            .ok_or(BusError::Disconnected)?;
        tracing::debug!(bus_name = %name, "Found MPRIS player");

        let player = PlayerProxy::builder(&connection)
            .destination(name.clone())
            .map_err(call_failed)?
            .cache_properties(CacheProperties::No)
            .build()
            .await
            .map_err(call_failed)?;

        let properties = PropertiesProxy::builder(&connection)
            .destination(name.clone())
            .map_err(call_failed)?
            .path(MPRIS_PATH)
            .map_err(call_failed)?
            .cache_properties(CacheProperties::No)
            .build()
            .await
            .map_err(call_failed)?;
        let mut property_changes = properties
            .receive_properties_changed()
            .await
            .map_err(call_failed)?;
        let mut owner_changes = dbus
            .receive_name_owner_changed()
            .await
            .map_err(call_failed)?;

        let changes = async_stream::stream! {
            // Keep the proxies alive as long as their signal streams
            let _properties = properties;
            let _dbus = dbus;
            loop {
                let event = tokio::select! {
                    Some(signal) = property_changes.next() => match signal.args() {
                        Ok(args) if args.interface_name().as_str() == PLAYER_INTERFACE => {
                            BusEvent::Changed(decode_changes(args.changed_properties()))
                        }
                        Ok(_) => BusEvent::Ignored,
                        Err(e) => {
                            tracing::debug!(error = %e, "Malformed PropertiesChanged signal");
                            BusEvent::Ignored
                        }
                    },
                    Some(signal) = owner_changes.next() => match signal.args() {
                        Ok(args) if args.name().as_str() == name && args.new_owner().is_none() => {
                            tracing::info!(bus_name = %name, "MPRIS player left the bus");
                            BusEvent::Lost
                        }
                        _ => BusEvent::Ignored,
                    },
                    else => BusEvent::Lost,
                };
                match event {
                    BusEvent::Changed(change) => yield change,
                    BusEvent::Ignored => {}
                    BusEvent::Lost => break,
                }
            }
        };

        Ok(BusConnection {
            control: Arc::new(MprisPlayer { proxy: player }),
            changes: changes.boxed(),
        })
    }
}

enum BusEvent {
    Changed(PlayerProperties),
    Ignored,
    Lost,
}

struct MprisPlayer {
    proxy: PlayerProxy<'static>,
}

#[async_trait]
impl PlayerControl for MprisPlayer {
    async fn properties(&self) -> Result<PlayerProperties, BusError> {
        let status = self.proxy.playback_status().await.map_err(call_failed)?;
        let metadata = self.proxy.metadata().await.map_err(call_failed)?;
        Ok(PlayerProperties {
            metadata: Some(decode_metadata(
                metadata.iter().map(|(k, v)| (k.as_str(), &**v)),
            )),
            playback_status: PlaybackStatus::from_str(&status).ok(),
            // Not every player implements these
            volume: self.proxy.volume().await.ok(),
            shuffle: self.proxy.shuffle().await.ok(),
            loop_status: self
                .proxy
                .loop_status()
                .await
                .ok()
                .map(|s| RepeatState::from_loop_status(&s)),
            position_micros: self.proxy.position().await.ok(),
        })
    }

    async fn position_micros(&self) -> Result<i64, BusError> {
        self.proxy.position().await.map_err(call_failed)
    }

    async fn play(&self) -> Result<(), BusError> {
        self.proxy.play().await.map_err(call_failed)
    }

    async fn pause(&self) -> Result<(), BusError> {
        self.proxy.pause().await.map_err(call_failed)
    }

    async fn next(&self) -> Result<(), BusError> {
        self.proxy.next().await.map_err(call_failed)
    }

    async fn previous(&self) -> Result<(), BusError> {
        self.proxy.previous().await.map_err(call_failed)
    }

    async fn seek(&self, offset_micros: i64) -> Result<(), BusError> {
        self.proxy.seek(offset_micros).await.map_err(call_failed)
    }

    async fn set_volume(&self, volume: f64) -> Result<(), BusError> {
        self.proxy.set_volume(volume).await.map_err(call_failed)
    }

    async fn set_shuffle(&self, shuffle: bool) -> Result<(), BusError> {
        self.proxy.set_shuffle(shuffle).await.map_err(call_failed)
    }

    async fn set_loop_status(&self, status: RepeatState) -> Result<(), BusError> {
        self.proxy
            .set_loop_status(status.to_loop_status())
            .await
            .map_err(call_failed)
    }
}

/// Variants inside `a{sv}` dictionaries may arrive boxed
fn unboxed<'a, 'v>(value: &'a Value<'v>) -> &'a Value<'v> {
    match value {
        Value::Value(inner) => unboxed(inner),
        other => other,
    }
}

fn as_string(value: &Value<'_>) -> Option<String> {
    match unboxed(value) {
        Value::Str(s) => Some(s.as_str().to_string()),
        Value::ObjectPath(p) => Some(p.as_str().to_string()),
        _ => None,
    }
}

fn as_i64(value: &Value<'_>) -> Option<i64> {
    match unboxed(value) {
        Value::I64(n) => Some(*n),
        Value::U64(n) => i64::try_from(*n).ok(),
        Value::I32(n) => Some(i64::from(*n)),
        Value::U32(n) => Some(i64::from(*n)),
        _ => None,
    }
}

fn as_f64(value: &Value<'_>) -> Option<f64> {
    match unboxed(value) {
        Value::F64(n) => Some(*n),
        _ => None,
    }
}

fn as_bool(value: &Value<'_>) -> Option<bool> {
    match unboxed(value) {
        Value::Bool(b) => Some(*b),
        _ => None,
    }
}

fn as_strings(value: &Value<'_>) -> Vec<String> {
    let value = unboxed(value);
    if let Some(single) = as_string(value) {
        return vec![single];
    }
    value
        .try_to_owned()
        .ok()
        .and_then(|owned| Vec::<String>::try_from(owned).ok())
        .unwrap_or_default()
}

fn decode_metadata<'a, 'v: 'a>(
    entries: impl Iterator<Item = (&'a str, &'a Value<'v>)>,
) -> Metadata {
    let mut metadata = Metadata::default();
    for (key, value) in entries {
        match key {
            "mpris:trackid" => metadata.track_id = as_string(value),
            "xesam:title" => metadata.title = as_string(value),
            "xesam:artist" => metadata.artists = as_strings(value),
            "xesam:album" => metadata.album = as_string(value),
            "xesam:url" => metadata.url = as_string(value),
            "mpris:artUrl" => metadata.art_url = as_string(value),
            "mpris:length" => metadata.length_micros = as_i64(value),
            _ => {}
        }
    }
    metadata
}

fn decode_changes(changed: &HashMap<&str, Value<'_>>) -> PlayerProperties {
    let mut props = PlayerProperties::default();
    for (name, value) in changed {
        match *name {
            "Metadata" => {
                props.metadata = unboxed(value)
                    .try_to_owned()
                    .ok()
                    .and_then(|owned| HashMap::<String, OwnedValue>::try_from(owned).ok())
                    .map(|entries| {
                        decode_metadata(entries.iter().map(|(k, v)| (k.as_str(), &**v)))
                    });
            }
            "PlaybackStatus" => {
                props.playback_status = as_string(value).and_then(|s| s.parse().ok());
            }
            "Volume" => props.volume = as_f64(value),
            "Shuffle" => props.shuffle = as_bool(value),
            "LoopStatus" => {
                props.loop_status = as_string(value).map(|s| RepeatState::from_loop_status(&s));
            }
            "Position" => props.position_micros = as_i64(value),
            _ => {}
        }
    }
    props
}
