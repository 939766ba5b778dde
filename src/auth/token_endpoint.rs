//! The remote token-refresh call, classified into a `RefreshOutcome`

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshFailure {
    /// Could not reach the service, or it failed on its side
    NetworkError,
    /// The refresh token itself was rejected or revoked
    InvalidGrant,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    Success {
        new_access_token: String,
        new_ttl: i32,
        /// Spotify sometimes rotates the refresh token
        new_refresh_token: Option<String>,
    },
    Failure {
        reason: RefreshFailure,
        detail: String,
    },
}

#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> RefreshOutcome;
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i32,
    refresh_token: Option<String>,
}

#[derive(Deserialize, Default)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

/// Spotify accounts service. Works for both confidential clients (with a
/// secret) and PKCE clients (client id only).
pub struct SpotifyTokenEndpoint {
    http: reqwest::Client,
    url: String,
    client_id: String,
    client_secret: Option<String>,
}

impl SpotifyTokenEndpoint {
    pub fn new(client_id: String, client_secret: Option<String>) -> reqwest::Result<Self> {
        Ok(Self {
            http: reqwest::Client::builder()
                .timeout(TOKEN_REQUEST_TIMEOUT)
                .build()?,
            url: SPOTIFY_TOKEN_URL.to_string(),
            client_id,
            client_secret,
        })
    }
}

#[async_trait]
impl TokenEndpoint for SpotifyTokenEndpoint {
    async fn refresh(&self, refresh_token: &str) -> RefreshOutcome {
        let mut form = vec![
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        let mut request = self.http.post(&self.url);
        match &self.client_secret {
            Some(secret) => request = request.basic_auth(&self.client_id, Some(secret)),
            None => form.push(("client_id", self.client_id.as_str())),
        }

        let response = match request.form(&form).send().await {
            Ok(response) => response,
            Err(e) => {
                return RefreshOutcome::Failure {
                    reason: RefreshFailure::NetworkError,
                    detail: e.to_string(),
                };
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                return RefreshOutcome::Failure {
                    reason: RefreshFailure::NetworkError,
                    detail: e.to_string(),
                };
            }
        };

        if status.is_success() {
            return match serde_json::from_str::<TokenResponse>(&body) {
                Ok(token) => RefreshOutcome::Success {
                    new_access_token: token.access_token,
                    new_ttl: token.expires_in,
                    new_refresh_token: token.refresh_token,
                },
                Err(e) => RefreshOutcome::Failure {
                    reason: RefreshFailure::Unknown,
                    detail: format!("malformed token response: {e}"),
                },
            };
        }

        let error: TokenErrorResponse = serde_json::from_str(&body).unwrap_or_default();
        RefreshOutcome::Failure {
            reason: classify_failure(status.as_u16(), &error.error, &error.error_description),
            detail: format!("{status}: {} {}", error.error, error.error_description),
        }
    }
}

pub(crate) fn classify_failure(status: u16, error: &str, description: &str) -> RefreshFailure {
    if error == "invalid_grant" || description.contains("Refresh token revoked") {
        RefreshFailure::InvalidGrant
    } else if status >= 500 || status == 429 {
        RefreshFailure::NetworkError
    } else {
        RefreshFailure::Unknown
    }
}
