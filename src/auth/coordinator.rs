//! Single-flight credential refresh shared by every outbound Spotify call

use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::watch;

use super::store::{Credential, CredentialStore};
use super::token_endpoint::{RefreshFailure, RefreshOutcome, TokenEndpoint};
use crate::clock::Clock;
use crate::error::AuthError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthStatus {
    Authorized,
    Unauthorized,
}

type PendingRefresh = Shared<BoxFuture<'static, Result<Credential, AuthError>>>;

/// Hands out valid credentials, refreshing at most once at a time.
///
/// The first caller that finds the credential near expiry starts the refresh
/// on its own task and parks the pending result in `in_flight`; everyone
/// arriving before it completes awaits that same result. The slot is emptied
/// when the refresh finishes, whatever the outcome and whether or not anyone
/// is still waiting.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<CredentialStore>,
    endpoint: Arc<dyn TokenEndpoint>,
    clock: Arc<dyn Clock>,
    in_flight: Mutex<Option<PendingRefresh>>,
    status: watch::Sender<AuthStatus>,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        endpoint: Arc<dyn TokenEndpoint>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let initial = if store.current().is_some() {
            AuthStatus::Authorized
        } else {
            AuthStatus::Unauthorized
        };
        let (status, _) = watch::channel(initial);
        Self {
            inner: Arc::new(Inner {
                store,
                endpoint,
                clock,
                in_flight: Mutex::new(None),
                status,
            }),
        }
    }

    /// Observe authorization transitions
    pub fn subscribe_status(&self) -> watch::Receiver<AuthStatus> {
        self.inner.status.subscribe()
    }

    pub fn status(&self) -> AuthStatus {
        *self.inner.status.borrow()
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub async fn ensure_valid_credential(&self) -> Result<Credential, AuthError> {
        let credential = self.usable_credential()?;
        let now = self.inner.clock.now_millis();
        if !credential.is_near_expiry(now) {
            return Ok(credential);
        }

        tracing::info!(
            remaining_secs = credential.remaining_millis(now) / 1000,
            "Credential near expiry, refreshing"
        );
        self.refresh_single_flight().await
    }

    /// Refresh after the remote service rejected `stale_access_token`.
    ///
    /// If another caller already replaced that token, the stored credential is
    /// returned without contacting the token endpoint again.
    pub async fn force_refresh(&self, stale_access_token: &str) -> Result<Credential, AuthError> {
        let credential = self.usable_credential()?;
        if credential.access_token != stale_access_token {
            tracing::debug!("Access token already replaced, skipping refresh");
            return Ok(credential);
        }
        self.refresh_single_flight().await
    }

    /// Install a credential obtained from a fresh login
    pub fn complete_login(&self, credential: Credential) -> anyhow::Result<()> {
        self.inner.store.replace(credential)?;
        self.inner.set_status(AuthStatus::Authorized);
        tracing::info!("Login completed, authorization restored");
        Ok(())
    }

    /// Pick up a credential written by a login elsewhere (e.g. the `login`
    /// subcommand). Returns true when a new credential was adopted.
    pub fn adopt_stored_login(&self) -> bool {
        match self.inner.store.reload() {
            Ok(Some(_)) => {
                self.inner.store.clear_unauthorized();
                self.inner.set_status(AuthStatus::Authorized);
                tracing::info!(
                    path = %self.inner.store.path().display(),
                    "Adopted new credential from disk"
                );
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(error = %e, "Could not re-read credential file");
                false
            }
        }
    }

    fn usable_credential(&self) -> Result<Credential, AuthError> {
        let store = &self.inner.store;
        if (store.is_unauthorized() || store.current().is_none()) && !self.adopt_stored_login() {
            return Err(AuthError::Unauthorized);
        }
        store.current().ok_or(AuthError::Unauthorized)
    }

    async fn refresh_single_flight(&self) -> Result<Credential, AuthError> {
        let pending = {
            let mut slot = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some(pending) => {
                    tracing::debug!("Joining in-flight credential refresh");
                    pending.clone()
                }
                None => {
                    let inner = self.inner.clone();
                    // Runs to completion even if every waiter goes away
                    let task = tokio::spawn(async move {
                        let result = inner.refresh_once().await;
                        inner
                            .in_flight
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .take();
                        result
                    });
                    let pending = async move {
                        task.await.unwrap_or_else(|e| {
                            Err(AuthError::Transient(format!("refresh task failed: {e}")))
                        })
                    }
                    .boxed()
                    .shared();
                    *slot = Some(pending.clone());
                    pending
                }
            }
        };
        pending.await
    }
}

impl Inner {
    async fn refresh_once(&self) -> Result<Credential, AuthError> {
        let current = self.store.current().ok_or(AuthError::Unauthorized)?;

        match self.endpoint.refresh(&current.refresh_token).await {
            RefreshOutcome::Success {
                new_access_token,
                new_ttl,
                new_refresh_token,
            } => {
                let refreshed = Credential {
                    access_token: new_access_token,
                    refresh_token: new_refresh_token.unwrap_or(current.refresh_token),
                    issued_at_millis: self.clock.now_millis(),
                    ttl_seconds: new_ttl,
                };
                if let Err(e) = self.store.replace(refreshed.clone()) {
                    tracing::error!(error = %e, "Failed to persist refreshed credential");
                }
                self.set_status(AuthStatus::Authorized);
                tracing::info!(ttl_seconds = new_ttl, "Credential refreshed successfully");
                Ok(refreshed)
            }
            RefreshOutcome::Failure {
                reason: RefreshFailure::InvalidGrant,
                detail,
            } => {
                tracing::error!(%detail, "Refresh token revoked, re-authentication required");
                if self.store.mark_unauthorized() {
                    self.set_status(AuthStatus::Unauthorized);
                }
                Err(AuthError::Unauthorized)
            }
            RefreshOutcome::Failure { reason, detail } => {
                tracing::warn!(?reason, %detail, "Credential refresh failed");
                Err(AuthError::Transient(detail))
            }
        }
    }

    fn set_status(&self, status: AuthStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}
