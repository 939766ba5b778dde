//! Reconciles the local and remote playback sources into one canonical
//! state and fans it out to live subscribers.
//!
//! Both sources send `SourceUpdate`s into a single channel consumed by
//! [`StateReconciler::run`]. The local player is authoritative while it is
//! connected; the remote service fills in what only it knows (liked status,
//! device id) when both agree on the track.

mod events;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::ReceiverStream;

pub use events::{AUTH_EXPIRED_CODE, AUTH_EXPIRED_MESSAGE, PlaybackChange, PushEvent};

use crate::auth::AuthStatus;
use crate::clock::Clock;
use crate::model::{LikedStatus, PlaybackState};

pub const SUBSCRIBER_CAPACITY: usize = 32;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SourceId {
    Local,
    Remote,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceUpdate {
    Connected(SourceId),
    Disconnected(SourceId),
    State(SourceId, PlaybackState),
}

#[derive(Default)]
struct Slot {
    state: Option<PlaybackState>,
    connected: bool,
    /// Set on (re)connect; the next state from this source is broadcast
    /// even if it looks unchanged
    fresh: bool,
}

#[derive(Default)]
struct Sources {
    local: Slot,
    remote: Slot,
    last: Option<PlaybackState>,
    /// Replayed to new subscribers until authorization is restored
    auth_expired: Option<PushEvent>,
}

impl Sources {
    fn slot_mut(&mut self, source: SourceId) -> &mut Slot {
        match source {
            SourceId::Local => &mut self.local,
            SourceId::Remote => &mut self.remote,
        }
    }

    fn canonical(&self) -> Option<PlaybackState> {
        let remote = self.remote.state.as_ref();
        match (&self.local.state, remote) {
            (Some(local), _) if self.local.connected => Some(merge_local(local, remote)),
            (_, Some(remote)) => Some(remote.clone()),
            (Some(local), None) => Some(merge_local(local, None)),
            (None, None) => None,
        }
    }
}

/// Local state enriched with what only the remote service knows, when both
/// describe the same track
fn merge_local(local: &PlaybackState, remote: Option<&PlaybackState>) -> PlaybackState {
    let mut merged = local.clone();
    merged.liked = LikedStatus::Unknown;

    let Some(remote) = remote else {
        return merged;
    };
    let same_track = matches!(
        (local.track_id(), remote.track_id()),
        (Some(a), Some(b)) if a == b
    );
    if same_track {
        merged.liked = remote.liked;
        let remote_id = remote.device.as_ref().and_then(|d| d.id.clone());
        if let Some(device) = merged.device.as_mut().filter(|d| d.id.is_none()) {
            device.id = remote_id;
        }
    }
    merged
}

struct Subscriber {
    id: u64,
    sender: mpsc::Sender<PushEvent>,
}

/// Receiving end handed to an observer. Ends when the subscriber is dropped
/// for falling behind.
pub struct Subscription {
    pub id: u64,
    receiver: mpsc::Receiver<PushEvent>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<PushEvent> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<PushEvent> {
        self.receiver.try_recv().ok()
    }

    pub fn into_stream(self) -> ReceiverStream<PushEvent> {
        ReceiverStream::new(self.receiver)
    }
}

#[derive(Clone)]
pub struct StateReconciler {
    inner: Arc<Inner>,
}

struct Inner {
    sources: Mutex<Sources>,
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    capacity: usize,
}

impl Default for StateReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl StateReconciler {
    pub fn new() -> Self {
        Self::with_capacity(SUBSCRIBER_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                sources: Mutex::default(),
                subscribers: Mutex::default(),
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Consume source updates until every sender is gone
    pub async fn run(self, mut updates: mpsc::Receiver<SourceUpdate>) {
        tracing::info!("State reconciler started");
        while let Some(update) = updates.recv().await {
            self.apply(update);
        }
        tracing::info!("State reconciler stopped");
    }

    pub fn apply(&self, update: SourceUpdate) {
        match update {
            SourceUpdate::Connected(source) => self.connected(source),
            SourceUpdate::Disconnected(source) => self.disconnected(source),
            SourceUpdate::State(source, state) => {
                self.publish(source, state);
            }
        }
    }

    pub fn connected(&self, source: SourceId) {
        tracing::info!(?source, "Playback source connected");
        let mut sources = self.sources();
        let slot = sources.slot_mut(source);
        slot.connected = true;
        slot.fresh = true;
    }

    /// A disconnect can change which source is canonical
    pub fn disconnected(&self, source: SourceId) {
        tracing::info!(?source, "Playback source disconnected");
        let mut sources = self.sources();
        let slot = sources.slot_mut(source);
        slot.connected = false;
        slot.fresh = false;
        let events = Self::advance(&mut sources, false);
        self.deliver(&events);
    }

    /// Record `state` for `source` and broadcast the canonical state if it
    /// changed. Returns whether anything was broadcast.
    ///
    /// Events are delivered while the sources lock is held, so subscribers
    /// see canonical states in the order they were accepted no matter how
    /// many tasks publish.
    pub fn publish(&self, source: SourceId, state: PlaybackState) -> bool {
        let mut sources = self.sources();
        let slot = sources.slot_mut(source);
        let forced = std::mem::take(&mut slot.fresh);
        slot.state = Some(state);
        let events = Self::advance(&mut sources, forced);
        self.deliver(&events);
        !events.is_empty()
    }

    /// Apply a like/unlike of the remote track right away instead of waiting
    /// for the next poll
    pub fn update_liked(&self, track_ids: &[String], liked: LikedStatus) {
        let mut sources = self.sources();
        let Some(remote) = sources.remote.state.as_mut() else {
            return;
        };
        let matches = remote
            .track_id()
            .is_some_and(|id| track_ids.iter().any(|t| t == id));
        if !matches {
            return;
        }
        remote.liked = liked;
        let events = Self::advance(&mut sources, false);
        self.deliver(&events);
    }

    fn advance(sources: &mut Sources, forced: bool) -> Vec<PushEvent> {
        let Some(canonical) = sources.canonical() else {
            return Vec::new();
        };
        let changed = sources
            .last
            .as_ref()
            .is_none_or(|last| !last.observably_equal(&canonical));
        if !changed && !forced {
            return Vec::new();
        }
        let events = events::events_for(sources.last.as_ref(), &canonical);
        sources.last = Some(canonical);
        events
    }

    /// Last canonical state, if any source has published
    pub fn get_last(&self) -> Option<PlaybackState> {
        self.sources().last.clone()
    }

    /// Register an observer seeded with the current state (and the pending
    /// authorization expiry, if any). Seeding and registration happen under
    /// the sources lock so no broadcast can fall between them.
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.inner.capacity);
        let sources = self.sources();
        if let Some(state) = &sources.last {
            let _ = sender.try_send(PushEvent::StateUpdate(state.clone()));
        }
        if let Some(event) = &sources.auth_expired {
            let _ = sender.try_send(event.clone());
        }
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.push(Subscriber { id, sender });
        tracing::debug!(subscriber = id, total = subscribers.len(), "Subscriber added");
        Subscription { id, receiver }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Send to every subscriber without blocking. Full subscribers are
    /// dropped, closed ones pruned.
    pub fn broadcast(&self, events: &[PushEvent]) {
        let _order = self.sources();
        self.deliver(events);
    }

    /// Caller holds the sources lock. Lock order is sources, then subscribers.
    fn deliver(&self, events: &[PushEvent]) {
        if events.is_empty() {
            return;
        }
        let snapshot: Vec<(u64, mpsc::Sender<PushEvent>)> = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|s| (s.id, s.sender.clone()))
            .collect();

        let mut removed = Vec::new();
        for (id, sender) in snapshot {
            for event in events {
                match sender.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        tracing::warn!(subscriber = id, "Subscriber too slow, dropping it");
                        removed.push(id);
                        break;
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        tracing::debug!(subscriber = id, "Subscriber gone, pruning");
                        removed.push(id);
                        break;
                    }
                }
            }
        }

        if !removed.is_empty() {
            self.inner
                .subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|s| !removed.contains(&s.id));
        }
    }

    /// Broadcast one `auth-expired` event per transition to unauthorized,
    /// including a status that is already unauthorized when watching starts
    pub async fn watch_auth(self, mut status: watch::Receiver<AuthStatus>, clock: Arc<dyn Clock>) {
        loop {
            let current = *status.borrow_and_update();
            self.auth_changed(current, clock.now_millis());
            if status.changed().await.is_err() {
                return;
            }
        }
    }

    fn auth_changed(&self, status: AuthStatus, now_millis: i64) {
        let mut sources = self.sources();
        match status {
            AuthStatus::Unauthorized => {
                tracing::warn!("Broadcasting authorization expiry to subscribers");
                let event = PushEvent::auth_expired(now_millis);
                sources.auth_expired = Some(event.clone());
                self.deliver(&[event]);
            }
            AuthStatus::Authorized => sources.auth_expired = None,
        }
    }

    fn sources(&self) -> std::sync::MutexGuard<'_, Sources> {
        self.inner
            .sources
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
