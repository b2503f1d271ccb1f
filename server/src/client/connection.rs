use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashSet;
use uuid::Uuid;

use crate::player::PlayerAdapter;

/// Per-connection state of one player. Owned by the [`ClientRegistry`](super::ClientRegistry).
pub struct ClientConnection {
    player: Arc<dyn PlayerAdapter>,
    stream_key: String,
    topics: DashSet<String>,
    voice_unlocked: AtomicBool,
    microphone_muted: AtomicBool,
    // held while this connection's join or leave is being announced
    announce: Mutex<()>,
}

impl ClientConnection {
    pub(crate) fn new(player: Arc<dyn PlayerAdapter>) -> Self {
        Self {
            player,
            stream_key: generate_stream_key(),
            topics: DashSet::new(),
            voice_unlocked: AtomicBool::new(false),
            microphone_muted: AtomicBool::new(false),
            announce: Mutex::new(()),
        }
    }

    /// Serializes join and leave notifications for this connection.
    pub(crate) fn announce_guard(&self) -> MutexGuard<'_, ()> {
        self.announce.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.player.uuid()
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.player.name()
    }

    #[must_use]
    pub fn player(&self) -> &Arc<dyn PlayerAdapter> {
        &self.player
    }

    #[must_use]
    pub fn stream_key(&self) -> &str {
        &self.stream_key
    }

    /// Returns `false` if already subscribed.
    pub fn subscribe_topic(&self, topic: impl Into<String>) -> bool {
        self.topics.insert(topic.into())
    }

    pub fn unsubscribe_topic(&self, topic: &str) -> bool {
        self.topics.remove(topic).is_some()
    }

    #[must_use]
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.topics.contains(topic)
    }

    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.topics.iter().map(|t| t.key().clone()).collect()
    }

    #[must_use]
    pub fn is_voice_unlocked(&self) -> bool {
        self.voice_unlocked.load(Ordering::SeqCst)
    }

    /// Returns the previous value.
    pub fn set_voice_unlocked(&self, unlocked: bool) -> bool {
        self.voice_unlocked.swap(unlocked, Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_microphone_muted(&self) -> bool {
        self.microphone_muted.load(Ordering::SeqCst)
    }

    /// Returns the previous value.
    pub(crate) fn set_microphone_muted(&self, muted: bool) -> bool {
        self.microphone_muted.swap(muted, Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConnection")
            .field("uuid", &self.uuid())
            .field("name", &self.name())
            .field("voice_unlocked", &self.is_voice_unlocked())
            .finish_non_exhaustive()
    }
}

/// 32 lowercase hex characters.
fn generate_stream_key() -> String {
    let bytes: [u8; 16] = rand::random();
    bytes.iter().fold(String::with_capacity(32), |mut key, byte| {
        let _ = write!(key, "{:02x}", byte);
        key
    })
}
