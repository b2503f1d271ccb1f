use std::sync::Arc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::warn;
use uuid::Uuid;
use voicelink_protocol::Packet;

use crate::client::{ClientConnection, ClientRegistry};
use crate::error::ServerError;

/// Whatever owns the client sockets in this process.
pub trait ClientSink: Send + Sync {
    /// # Errors
    /// Returns an error when the packet cannot be handed to the client's transport.
    fn deliver(&self, client: &ClientConnection, packet: &Packet) -> Result<(), ServerError>;
}

/// [`ClientSink`] that queues `(client, packet)` pairs on an unbounded channel.
pub struct ChannelClientSink {
    tx: UnboundedSender<(Uuid, Packet)>,
}

impl ChannelClientSink {
    #[must_use]
    pub fn new() -> (Self, UnboundedReceiver<(Uuid, Packet)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ClientSink for ChannelClientSink {
    fn deliver(&self, client: &ClientConnection, packet: &Packet) -> Result<(), ServerError> {
        self.tx
            .send((client.uuid(), packet.clone()))
            .map_err(|_| ServerError::LinkClosed)
    }
}

/// Networking for processes that own their clients' sockets.
pub struct DirectNetworking {
    registry: Arc<ClientRegistry>,
    sink: Arc<dyn ClientSink>,
}

impl DirectNetworking {
    #[must_use]
    pub fn new(registry: Arc<ClientRegistry>, sink: Arc<dyn ClientSink>) -> Self {
        Self { registry, sink }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// # Errors
    /// Returns [`ServerError::ClientNotFound`] for unknown clients, or the sink's error.
    pub fn send(&self, client: Uuid, packet: &Packet) -> Result<(), ServerError> {
        let connection = self
            .registry
            .get(client)
            .ok_or(ServerError::ClientNotFound(client))?;
        self.sink.deliver(&connection, packet)
    }

    /// Best effort: a failing client does not stop the rest.
    pub fn broadcast(&self, packet: &Packet) {
        for connection in self.registry.clients() {
            if let Err(e) = self.sink.deliver(&connection, packet) {
                warn!("[{}] Failed to deliver {}: {}", connection.uuid(), packet.kind(), e);
            }
        }
    }
}
