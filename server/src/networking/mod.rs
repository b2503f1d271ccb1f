//! Client-facing send surface, independent of where the client's socket lives.

mod direct;
mod forwarding;

pub use direct::{ChannelClientSink, ClientSink, DirectNetworking};
pub use forwarding::ForwardingNetworking;

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;
use voicelink_protocol::{Destination, Packet};

use crate::client::{ClientConnection, ClientRegistry, ConnectionHandler, SubscriptionId};
use crate::error::ServerError;
use crate::player::PlayerAdapter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topology {
    /// This process owns the client sockets.
    Direct,
    /// Client packets travel through the proxy.
    ProxyForwarding,
}

#[derive(Clone)]
pub enum NetworkingService {
    Direct(Arc<DirectNetworking>),
    Forwarding(Arc<ForwardingNetworking>),
}

impl NetworkingService {
    #[must_use]
    pub fn topology(&self) -> Topology {
        match self {
            Self::Direct(_) => Topology::Direct,
            Self::Forwarding(_) => Topology::ProxyForwarding,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        match self {
            Self::Direct(direct) => direct.registry(),
            Self::Forwarding(forwarding) => forwarding.registry(),
        }
    }

    pub fn register(&self, player: Arc<dyn PlayerAdapter>) -> Arc<ClientConnection> {
        self.registry().register(player)
    }

    pub fn remove(&self, client: Uuid) -> Option<Arc<ClientConnection>> {
        self.registry().remove(client)
    }

    #[must_use]
    pub fn get_client(&self, client: Uuid) -> Option<Arc<ClientConnection>> {
        self.registry().get(client)
    }

    #[must_use]
    pub fn clients(&self) -> Vec<Arc<ClientConnection>> {
        self.registry().clients()
    }

    pub fn subscribe_to_connections(&self, handler: ConnectionHandler) -> SubscriptionId {
        self.registry().subscribe_to_connections(handler)
    }

    pub fn subscribe_to_disconnections(&self, handler: ConnectionHandler) -> SubscriptionId {
        self.registry().subscribe_to_disconnections(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.registry().unsubscribe(id)
    }

    /// # Errors
    /// Returns [`ServerError::ClientNotFound`] for unknown clients or a transport error.
    pub fn send(&self, client: Uuid, packet: Packet) -> Result<(), ServerError> {
        match self {
            Self::Direct(direct) => direct.send(client, &packet),
            Self::Forwarding(forwarding) => forwarding.send(client, packet),
        }
    }

    pub fn broadcast(&self, packet: &Packet) {
        match self {
            Self::Direct(direct) => direct.broadcast(packet),
            Self::Forwarding(forwarding) => forwarding.broadcast(packet),
        }
    }

    /// Sends to an addressed client.
    ///
    /// # Errors
    /// Returns [`ServerError::NotAClient`] when `destination` does not name a client.
    pub fn dispatch(&self, destination: &Destination, packet: Packet) -> Result<(), ServerError> {
        match destination {
            Destination::ClientOwner(client) => self.send(*client, packet),
            other => Err(ServerError::NotAClient(format!("{:?}", other))),
        }
    }

    /// Disconnects the client's voice connection, revokes its voice capability
    /// and tells the host through [`PlayerAdapter::kick`].
    ///
    /// # Errors
    /// Returns the send error; the capability is revoked and the host told regardless.
    pub fn kick(&self, client: Uuid, reason: &str) -> Result<(), ServerError> {
        let connection = self.get_client(client);
        if let Some(connection) = &connection {
            connection.set_voice_unlocked(false);
        }
        info!("[{}] Kicking voice connection: {}", client, reason);
        let sent = self.send(
            client,
            Packet::ClientDisconnect {
                reason: reason.to_string(),
            },
        );
        if let Some(connection) = connection {
            connection.player().kick(reason);
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    use crate::event::EventBus;
    use crate::transport::PacketManager;

    struct Dummy(Uuid);

    impl PlayerAdapter for Dummy {
        fn uuid(&self) -> Uuid {
            self.0
        }
        fn name(&self) -> &str {
            "dummy"
        }
        fn send_message(&self, _message: &str) {}
        fn kick(&self, _reason: &str) {}
    }

    fn direct() -> (NetworkingService, UnboundedReceiver<(Uuid, Packet)>) {
        let (sink, rx) = ChannelClientSink::new();
        let registry = Arc::new(ClientRegistry::new(Arc::new(EventBus::new())));
        let service = NetworkingService::Direct(Arc::new(DirectNetworking::new(registry, Arc::new(sink))));
        (service, rx)
    }

    #[test]
    fn direct_send_reaches_the_sink() {
        let (networking, mut rx) = direct();
        let id = Uuid::new_v4();
        networking.register(Arc::new(Dummy(id)));

        let packet = Packet::ClientDisconnect { reason: "bye".to_string() };
        networking.send(id, packet.clone()).unwrap();

        assert_eq!(rx.try_recv().unwrap(), (id, packet));
        assert!(matches!(
            networking.send(Uuid::new_v4(), Packet::ClientDisconnect { reason: String::new() }),
            Err(ServerError::ClientNotFound(_))
        ));
    }

    #[test]
    fn dispatch_to_a_node_fails_fast() {
        let (networking, mut rx) = direct();
        let packet = Packet::ClientDisconnect { reason: "x".to_string() };

        for destination in [Destination::Proxy, Destination::Node("lobby".to_string()), Destination::AllNodes] {
            let err = networking.dispatch(&destination, packet.clone()).unwrap_err();
            assert!(matches!(err, ServerError::NotAClient(_)));
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn kick_revokes_voice() {
        let (networking, mut rx) = direct();
        let id = Uuid::new_v4();
        let connection = networking.register(Arc::new(Dummy(id)));
        connection.set_voice_unlocked(true);

        networking.kick(id, "voice server went away").unwrap();

        assert!(!connection.is_voice_unlocked());
        let (_, packet) = rx.try_recv().unwrap();
        assert!(matches!(packet, Packet::ClientDisconnect { .. }));
    }

    #[test]
    fn forwarding_drops_control_packets() {
        let registry = Arc::new(ClientRegistry::new(Arc::new(EventBus::new())));
        let packets = Arc::new(PacketManager::node());
        let networking = NetworkingService::Forwarding(Arc::new(ForwardingNetworking::new(registry, packets)));
        let id = Uuid::new_v4();
        networking.register(Arc::new(Dummy(id)));

        assert_eq!(networking.topology(), Topology::ProxyForwarding);
        networking
            .send(id, Packet::NodeHello { node: "n".to_string() })
            .expect("dropped silently");
        // no uplink attached yet
        assert!(matches!(
            networking.send(id, Packet::ClientDisconnect { reason: String::new() }),
            Err(ServerError::LinkClosed)
        ));
    }
}
