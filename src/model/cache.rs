//! Cache of liked-song lookups to avoid an API round trip per poll

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::types::LikedStatus;

/// Known saved/not-saved answers keyed by track id. Anything absent is
/// `Unknown` rather than assumed not liked.
#[derive(Clone, Default)]
pub struct LikedSongsCache {
    entries: Arc<RwLock<HashMap<String, bool>>>,
}

impl LikedSongsCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn status(&self, track_id: &str) -> LikedStatus {
        match self.entries.read().await.get(track_id) {
            Some(&liked) => liked.into(),
            None => LikedStatus::Unknown,
        }
    }

    pub async fn record<'a>(&self, answers: impl IntoIterator<Item = (&'a str, bool)>) {
        let mut entries = self.entries.write().await;
        for (id, liked) in answers {
            entries.insert(id.to_string(), liked);
        }
    }
}
