use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::client::ClientConnection;
use crate::error::ServerError;
use crate::event::{ClientConnect, ClientDisconnect, EventBus, MicrophoneMute, MicrophoneUnmute};
use crate::player::PlayerAdapter;

pub type SubscriptionId = Uuid;

pub type ConnectionHandler = Arc<dyn Fn(&Arc<ClientConnection>) + Send + Sync>;

/// The single owner of connection membership.
pub struct ClientRegistry {
    clients: DashMap<Uuid, Arc<ClientConnection>>,
    on_connect: DashMap<SubscriptionId, ConnectionHandler>,
    on_disconnect: DashMap<SubscriptionId, ConnectionHandler>,
    bus: Arc<EventBus>,
}

impl ClientRegistry {
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            clients: DashMap::new(),
            on_connect: DashMap::new(),
            on_disconnect: DashMap::new(),
            bus,
        }
    }

    /// Returns the canonical connection for `player`, creating it on first sight.
    /// Connect handlers only run when the connection is created. A concurrent
    /// [`ClientRegistry::remove`] of the same id waits until they are done.
    pub fn register(&self, player: Arc<dyn PlayerAdapter>) -> Arc<ClientConnection> {
        let uuid = player.uuid();
        let connection = Arc::new(ClientConnection::new(player));
        {
            let _announce = connection.announce_guard();
            match self.clients.entry(uuid) {
                Entry::Occupied(existing) => return existing.get().clone(),
                Entry::Vacant(slot) => {
                    slot.insert(connection.clone());
                }
            }

            info!("[{}] {} connected", uuid, connection.name());
            notify(&self.on_connect, &connection);
            self.bus.publish(ClientConnect { client: uuid });
        }
        connection
    }

    /// Drops the connection of `uuid`. Unknown ids are ignored.
    pub fn remove(&self, uuid: Uuid) -> Option<Arc<ClientConnection>> {
        let (_, connection) = self.clients.remove(&uuid)?;
        {
            let _announce = connection.announce_guard();
            info!("[{}] {} disconnected", uuid, connection.name());
            notify(&self.on_disconnect, &connection);
            self.bus.publish(ClientDisconnect { client: uuid });
        }
        Some(connection)
    }

    #[must_use]
    pub fn get(&self, uuid: Uuid) -> Option<Arc<ClientConnection>> {
        self.clients.get(&uuid).map(|c| c.value().clone())
    }

    /// Snapshot of the current connections.
    #[must_use]
    pub fn clients(&self) -> Vec<Arc<ClientConnection>> {
        self.clients.iter().map(|c| c.value().clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Number of connections with voice chat unlocked.
    #[must_use]
    pub fn unlocked_count(&self) -> usize {
        self.clients
            .iter()
            .filter(|c| c.value().is_voice_unlocked())
            .count()
    }

    pub fn subscribe_to_connections(&self, handler: ConnectionHandler) -> SubscriptionId {
        let id = Uuid::new_v4();
        self.on_connect.insert(id, handler);
        id
    }

    pub fn subscribe_to_disconnections(&self, handler: ConnectionHandler) -> SubscriptionId {
        let id = Uuid::new_v4();
        self.on_disconnect.insert(id, handler);
        id
    }

    /// Releases a subscription. Returns `false` for ids that are not (or no longer) registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.on_connect.remove(&id).is_some() | self.on_disconnect.remove(&id).is_some();
        if !removed {
            debug!("Ignoring unsubscribe for unknown handler {}", id);
        }
        removed
    }

    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.on_connect.len() + self.on_disconnect.len()
    }

    /// Records a microphone state change reported by the client.
    ///
    /// # Errors
    /// Returns [`ServerError::ClientNotFound`] for unknown clients.
    pub fn set_microphone_muted(&self, uuid: Uuid, muted: bool) -> Result<(), ServerError> {
        let connection = self.get(uuid).ok_or(ServerError::ClientNotFound(uuid))?;
        if connection.set_microphone_muted(muted) == muted {
            return Ok(());
        }
        if muted {
            self.bus.publish(MicrophoneMute { client: uuid });
        } else {
            self.bus.publish(MicrophoneUnmute { client: uuid });
        }
        Ok(())
    }
}

/// Handlers are copied out first so they may touch the registry themselves.
fn notify(handlers: &DashMap<SubscriptionId, ConnectionHandler>, connection: &Arc<ClientConnection>) {
    let snapshot: Vec<ConnectionHandler> = handlers.iter().map(|h| h.value().clone()).collect();
    for handler in snapshot {
        handler(connection);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    use crate::event::EventKind;

    struct TestPlayer {
        uuid: Uuid,
        name: String,
    }

    impl TestPlayer {
        fn new(name: &str) -> Arc<dyn PlayerAdapter> {
            Arc::new(Self {
                uuid: Uuid::new_v4(),
                name: name.to_string(),
            })
        }
    }

    impl PlayerAdapter for TestPlayer {
        fn uuid(&self) -> Uuid {
            self.uuid
        }
        fn name(&self) -> &str {
            &self.name
        }
        fn send_message(&self, _message: &str) {}
        fn kick(&self, _reason: &str) {}
    }

    fn registry() -> ClientRegistry {
        ClientRegistry::new(Arc::new(EventBus::new()))
    }

    #[test]
    fn register_returns_the_canonical_connection() {
        let registry = registry();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        registry.subscribe_to_connections(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        let alice = TestPlayer::new("Alice");
        let first = registry.register(alice.clone());
        let second = registry.register(alice);

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn add_is_announced_before_remove() {
        let registry = registry();
        let log = Arc::new(Mutex::new(Vec::new()));

        let joined = log.clone();
        registry.subscribe_to_connections(Arc::new(move |c| {
            joined.lock().unwrap().push(format!("add {}", c.name()));
        }));
        let left = log.clone();
        registry.subscribe_to_disconnections(Arc::new(move |c| {
            left.lock().unwrap().push(format!("remove {}", c.name()));
        }));

        let bob = TestPlayer::new("Bob");
        registry.register(bob.clone());
        registry.remove(bob.uuid());
        assert!(registry.remove(bob.uuid()).is_none());

        assert_eq!(*log.lock().unwrap(), vec!["add Bob", "remove Bob"]);
    }

    #[test]
    fn remove_waits_for_the_connect_announcement() {
        let registry = Arc::new(registry());
        let log = Arc::new(Mutex::new(Vec::new()));
        let (entered, announcing) = std::sync::mpsc::channel();

        let joined = log.clone();
        registry.subscribe_to_connections(Arc::new(move |c| {
            entered.send(()).unwrap();
            thread::sleep(Duration::from_millis(50));
            joined.lock().unwrap().push(format!("add {}", c.name()));
        }));
        let left = log.clone();
        registry.subscribe_to_disconnections(Arc::new(move |c| {
            left.lock().unwrap().push(format!("remove {}", c.name()));
        }));

        let erin = TestPlayer::new("Erin");
        let uuid = erin.uuid();
        let joining = {
            let registry = registry.clone();
            thread::spawn(move || {
                registry.register(erin);
            })
        };

        announcing.recv().unwrap();
        assert!(registry.remove(uuid).is_some());
        joining.join().unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["add Erin", "remove Erin"]);
    }

    #[test]
    fn handlers_may_reenter_the_registry() {
        let registry = Arc::new(registry());
        let inner = registry.clone();
        registry.subscribe_to_connections(Arc::new(move |c| {
            assert!(inner.get(c.uuid()).is_some());
            inner.subscribe_to_disconnections(Arc::new(|_| {}));
        }));

        registry.register(TestPlayer::new("Carol"));
        assert_eq!(registry.subscription_count(), 2);
    }

    #[test]
    fn unsubscribe_is_idempotent() {
        let registry = registry();
        let id = registry.subscribe_to_connections(Arc::new(|_| {}));

        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        assert!(!registry.unsubscribe(Uuid::new_v4()));
        assert_eq!(registry.subscription_count(), 0);
    }

    #[test]
    fn unlocked_count_follows_flags() {
        let registry = registry();
        let a = registry.register(TestPlayer::new("A"));
        registry.register(TestPlayer::new("B"));

        assert_eq!(registry.unlocked_count(), 0);
        a.set_voice_unlocked(true);
        assert_eq!(registry.unlocked_count(), 1);
    }

    #[test]
    fn mute_changes_are_published() {
        let bus = Arc::new(EventBus::new());
        let registry = ClientRegistry::new(bus.clone());
        let mutes = Arc::new(AtomicUsize::new(0));
        let counter = mutes.clone();
        bus.on::<MicrophoneMute>()
            .set_handler(move |_: &mut MicrophoneMute| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();

        let dave = registry.register(TestPlayer::new("Dave"));
        registry.set_microphone_muted(dave.uuid(), true).unwrap();
        registry.set_microphone_muted(dave.uuid(), true).unwrap();

        assert_eq!(mutes.load(Ordering::SeqCst), 1);
        assert!(dave.is_microphone_muted());
        assert_eq!(bus.subscriber_count(EventKind::MicrophoneUnmute), 0);
        assert!(matches!(
            registry.set_microphone_muted(Uuid::new_v4(), false),
            Err(ServerError::ClientNotFound(_))
        ));
    }
}
