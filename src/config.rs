//! Command line and environment configuration

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::bridge::{BusKind, DEFAULT_PLAYER_PREFIX};

pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8898/login";

#[derive(Parser, Debug, Clone)]
#[command(name = "spotify-bridge", version, about = "Spotify playback state bridge")]
pub struct Cli {
    #[command(flatten)]
    pub spotify: SpotifyConfig,

    /// Credential record written by `login` and every refresh
    #[arg(long, env = "BRIDGE_TOKEN_FILE", default_value = "data/spotify-tokens.json")]
    pub token_file: PathBuf,

    #[arg(long, env = "PORT", default_value_t = 4001)]
    pub port: u16,

    /// Bus name prefix of the MPRIS player to follow
    #[arg(long, env = "MPRIS_PREFIX", default_value = DEFAULT_PLAYER_PREFIX)]
    pub mpris_prefix: String,

    #[arg(long, env = "MPRIS_BUS", value_enum, default_value_t = BusKind::System)]
    pub mpris_bus: BusKind,

    /// Name of the local Spotify Connect device, preferred when nothing is active
    #[arg(long, env = "BRIDGE_DEVICE_NAME", default_value = "RadioStream")]
    pub device_name: String,

    #[arg(
        long,
        env = "BRIDGE_POLL_INTERVAL_SECS",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub poll_interval_secs: u64,

    #[arg(long, env = "BRIDGE_LOG_DIR", default_value = ".logs")]
    pub log_dir: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the bridge and its HTTP server (default)
    Serve,
    /// Authorize with Spotify in the browser and store the credential
    Login,
}

/// Spotify application registration
#[derive(Args, Debug, Clone)]
pub struct SpotifyConfig {
    #[arg(long, env = "SPOTIFY_CLIENT_ID")]
    pub client_id: String,

    /// Only needed for applications not registered for PKCE
    #[arg(long, env = "SPOTIFY_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    #[arg(long, env = "SPOTIFY_REDIRECT_URI", default_value = DEFAULT_REDIRECT_URI)]
    pub redirect_uri: String,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::Serve)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_to_serve_with_documented_values() {
        let cli = Cli::try_parse_from(["spotify-bridge", "--client-id", "abc"]).unwrap();

        assert_eq!(cli.command(), Command::Serve);
        assert_eq!(cli.spotify.client_id, "abc");
        assert_eq!(cli.spotify.redirect_uri, DEFAULT_REDIRECT_URI);
        assert_eq!(cli.token_file, PathBuf::from("data/spotify-tokens.json"));
        assert_eq!(cli.port, 4001);
        assert_eq!(cli.mpris_prefix, DEFAULT_PLAYER_PREFIX);
        assert_eq!(cli.mpris_bus, BusKind::System);
        assert_eq!(cli.device_name, "RadioStream");
        assert_eq!(cli.poll_interval(), Duration::from_secs(5));
    }

    #[test]
    fn parses_login_and_overrides() {
        let cli = Cli::try_parse_from([
            "spotify-bridge",
            "--client-id",
            "abc",
            "--mpris-bus",
            "session",
            "--port",
            "8080",
            "--poll-interval-secs",
            "2",
            "login",
        ])
        .unwrap();

        assert_eq!(cli.command(), Command::Login);
        assert_eq!(cli.mpris_bus, BusKind::Session);
        assert_eq!(cli.port, 8080);
        assert_eq!(cli.poll_interval(), Duration::from_secs(2));
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let args = ["spotify-bridge", "--client-id", "abc", "--poll-interval-secs", "0"];
        assert!(Cli::try_parse_from(args).is_err());
    }
}
