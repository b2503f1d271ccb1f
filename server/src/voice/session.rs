use std::sync::Mutex;

use crate::client::{ClientRegistry, SubscriptionId};

/// One login at the voice authority.
#[derive(Debug)]
pub struct VoiceSession {
    host: String,
    password: String,
    allowed_slots: usize,
    block_radius: i32,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl VoiceSession {
    #[must_use]
    pub fn new(host: impl Into<String>, password: impl Into<String>, allowed_slots: usize, block_radius: i32) -> Self {
        Self {
            host: host.into(),
            password: password.into(),
            allowed_slots,
            block_radius,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }

    #[must_use]
    pub fn allowed_slots(&self) -> usize {
        self.allowed_slots
    }

    #[must_use]
    pub fn block_radius(&self) -> i32 {
        self.block_radius
    }

    /// Clients currently holding a voice slot.
    #[must_use]
    pub fn used_slots(&self, registry: &ClientRegistry) -> usize {
        registry.unlocked_count()
    }

    #[must_use]
    pub fn has_free_slot(&self, registry: &ClientRegistry) -> bool {
        self.used_slots(registry) < self.allowed_slots
    }

    pub(crate) fn track_subscription(&self, id: SubscriptionId) {
        if let Ok(mut subscriptions) = self.subscriptions.lock() {
            subscriptions.push(id);
        }
    }

    pub(crate) fn take_subscriptions(&self) -> Vec<SubscriptionId> {
        self.subscriptions
            .lock()
            .map(|mut subscriptions| std::mem::take(&mut *subscriptions))
            .unwrap_or_default()
    }
}
