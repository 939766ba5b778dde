//! Durable credential record with an in-memory cache for synchronous reads

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Refresh proactively once less than this remains
pub const EXPIRY_THRESHOLD_MS: i64 = 15 * 60 * 1000;

#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
    pub issued_at_millis: i64,
    pub ttl_seconds: i32,
}

impl Credential {
    pub fn expires_at_millis(&self) -> i64 {
        self.issued_at_millis + i64::from(self.ttl_seconds) * 1000
    }

    pub fn remaining_millis(&self, now_millis: i64) -> i64 {
        self.expires_at_millis() - now_millis
    }

    pub fn is_near_expiry(&self, now_millis: i64) -> bool {
        self.remaining_millis(now_millis) < EXPIRY_THRESHOLD_MS
    }
}

// Tokens never end up in logs
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("issued_at_millis", &self.issued_at_millis)
            .field("ttl_seconds", &self.ttl_seconds)
            .finish_non_exhaustive()
    }
}

/// On-disk layout
#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredCredential {
    access_token: String,
    refresh_token: String,
    expires_in: i32,
    token_timestamp: i64,
    updated_at: DateTime<Utc>,
}

impl From<&Credential> for StoredCredential {
    fn from(c: &Credential) -> Self {
        Self {
            access_token: c.access_token.clone(),
            refresh_token: c.refresh_token.clone(),
            expires_in: c.ttl_seconds,
            token_timestamp: c.issued_at_millis,
            updated_at: Utc::now(),
        }
    }
}

impl From<StoredCredential> for Credential {
    fn from(s: StoredCredential) -> Self {
        Self {
            access_token: s.access_token,
            refresh_token: s.refresh_token,
            issued_at_millis: s.token_timestamp,
            ttl_seconds: s.expires_in,
        }
    }
}

pub struct CredentialStore {
    path: PathBuf,
    cached: RwLock<Option<Credential>>,
    unauthorized: AtomicBool,
}

impl CredentialStore {
    /// Open the store at `path`, loading an existing record if there is one
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let cached = read_record(&path)?;
        match &cached {
            Some(c) => tracing::info!(
                path = %path.display(),
                issued_at = c.issued_at_millis,
                "Loaded stored credential"
            ),
            None => tracing::warn!(
                path = %path.display(),
                "No stored credential, run `spotify-bridge login`"
            ),
        }
        Ok(Self {
            path,
            cached: RwLock::new(cached),
            unauthorized: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn current(&self) -> Option<Credential> {
        self.cached
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Persist `credential` and make it current. Clears the unauthorized mark.
    /// The in-memory copy is updated even if writing the file fails.
    pub fn replace(&self, credential: Credential) -> Result<()> {
        *self.cached.write().unwrap_or_else(PoisonError::into_inner) = Some(credential.clone());
        self.unauthorized.store(false, Ordering::SeqCst);
        write_record(&self.path, &credential)
    }

    /// Returns true only for the call that performed the transition
    pub fn mark_unauthorized(&self) -> bool {
        !self.unauthorized.swap(true, Ordering::SeqCst)
    }

    pub fn is_unauthorized(&self) -> bool {
        self.unauthorized.load(Ordering::SeqCst)
    }

    /// Re-read the record from disk. Returns the new credential when the file
    /// holds something other than what is cached (e.g. a fresh login).
    pub fn reload(&self) -> Result<Option<Credential>> {
        let on_disk = read_record(&self.path)?;
        let mut cached = self.cached.write().unwrap_or_else(PoisonError::into_inner);
        if on_disk.is_none() || on_disk == *cached {
            return Ok(None);
        }
        *cached = on_disk.clone();
        Ok(on_disk)
    }

    pub fn clear_unauthorized(&self) {
        self.unauthorized.store(false, Ordering::SeqCst);
    }
}

fn read_record(path: &Path) -> Result<Option<Credential>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading credential file {}", path.display()))?;
    let stored: StoredCredential = serde_json::from_str(&content)
        .with_context(|| format!("parsing credential file {}", path.display()))?;
    Ok(Some(stored.into()))
}

/// Write to a sibling temp file and rename over the target so readers never
/// see a partial record
fn write_record(path: &Path, credential: &Credential) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating credential directory {}", dir.display()))?;
    }

    let content = serde_json::to_string_pretty(&StoredCredential::from(credential))?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp)
            .with_context(|| format!("creating {}", tmp.display()))?;
        file.write_all(content.as_bytes())?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(access: &str, issued_at: i64) -> Credential {
        Credential {
            access_token: access.to_string(),
            refresh_token: "refresh".to_string(),
            issued_at_millis: issued_at,
            ttl_seconds: 3600,
        }
    }

    #[test]
    fn near_expiry_threshold() {
        let c = credential("a", 0);
        assert!(!c.is_near_expiry(0));
        // 15 minutes and one millisecond left
        assert!(!c.is_near_expiry(3600 * 1000 - EXPIRY_THRESHOLD_MS - 1));
        assert!(c.is_near_expiry(3600 * 1000 - EXPIRY_THRESHOLD_MS + 1));
        assert!(c.is_near_expiry(4000 * 1000));
    }

    #[test]
    fn replace_persists_and_survives_reopen() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("data/spotify-tokens.json");

        let store = CredentialStore::open(&path)?;
        assert!(store.current().is_none());

        store.replace(credential("first", 1_000))?;
        assert_eq!(store.current().map(|c| c.access_token), Some("first".to_string()));
        assert!(!path.with_extension("json.tmp").exists());

        let reopened = CredentialStore::open(&path)?;
        assert_eq!(reopened.current(), Some(credential("first", 1_000)));

        let raw: serde_json::Value = serde_json::from_str(&fs::read_to_string(&path)?)?;
        assert_eq!(raw["accessToken"], "first");
        assert_eq!(raw["expiresIn"], 3600);
        assert_eq!(raw["tokenTimestamp"], 1_000);
        Ok(())
    }

    #[test]
    fn unauthorized_transition_reported_once() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let store = CredentialStore::open(dir.path().join("tokens.json"))?;

        assert!(store.mark_unauthorized());
        assert!(!store.mark_unauthorized());
        assert!(store.is_unauthorized());

        store.replace(credential("new", 5))?;
        assert!(!store.is_unauthorized());
        assert!(store.mark_unauthorized());
        Ok(())
    }

    #[test]
    fn reload_picks_up_external_login() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("tokens.json");
        let store = CredentialStore::open(&path)?;
        store.replace(credential("old", 1))?;

        assert!(store.reload()?.is_none());

        let other = CredentialStore::open(&path)?;
        other.replace(credential("fresh", 2))?;

        let adopted = store.reload()?;
        assert_eq!(adopted.map(|c| c.access_token), Some("fresh".to_string()));
        assert_eq!(store.current().map(|c| c.access_token), Some("fresh".to_string()));
        Ok(())
    }
}
