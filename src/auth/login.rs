use std::time::Instant;

use anyhow::{Context, Result};
use chrono::Utc;

use super::store::Credential;
use crate::config::SpotifyConfig;

pub const SCOPES: &[&str] = &[
    "user-read-playback-state",
    "user-modify-playback-state",
    "user-read-currently-playing",
    "user-library-modify",
    "user-library-read",
    "streaming",
    "playlist-read-private",
    "playlist-modify-private",
    "playlist-modify-public",
];

const RESPONSE: &str = r#"
<!doctype html>
<html>
<head><title>Success</title></head>
<body>
<h1>Authentication Successful!</h1>
<p>spotify-bridge can now control playback.</p>
<script>window.close();</script>
</body>
</html>
"#;

/// Interactive authorization-code (PKCE) flow in the user's browser
pub async fn perform_browser_login(config: &SpotifyConfig) -> Result<Credential> {
    tracing::info!(redirect_uri = %config.redirect_uri, "Starting browser-based OAuth flow");
    let client = librespot_oauth::OAuthClientBuilder::new(
        &config.client_id,
        &config.redirect_uri,
        SCOPES.to_vec(),
    )
    .open_in_browser()
    .with_custom_message(RESPONSE)
    .build()
    .context("building OAuth client")?;

    let token = client
        .get_access_token_async()
        .await
        .context("obtaining access token")?;

    let ttl = token.expires_at.saturating_duration_since(Instant::now()).as_secs();
    tracing::info!(ttl_seconds = ttl, "Browser authentication completed successfully");

    Ok(Credential {
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        issued_at_millis: Utc::now().timestamp_millis(),
        ttl_seconds: i32::try_from(ttl).unwrap_or(i32::MAX),
    })
}
