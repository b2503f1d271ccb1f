use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;
use voicelink_protocol::{Destination, Packet};

use crate::client::ClientRegistry;
use crate::error::ServerError;
use crate::transport::PacketManager;

/// Networking for nodes: the proxy owns the client sockets, so client packets
/// are wrapped and handed to the proxy instead of being written locally.
pub struct ForwardingNetworking {
    registry: Arc<ClientRegistry>,
    packets: Arc<PacketManager>,
}

impl ForwardingNetworking {
    #[must_use]
    pub fn new(registry: Arc<ClientRegistry>, packets: Arc<PacketManager>) -> Self {
        Self { registry, packets }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn packets(&self) -> &Arc<PacketManager> {
        &self.packets
    }

    /// # Errors
    /// Returns [`ServerError::ClientNotFound`] for clients not hosted here, or a
    /// transport error when the proxy link is down.
    pub fn send(&self, client: Uuid, packet: Packet) -> Result<(), ServerError> {
        if !packet.is_client_bound() {
            warn!("[{}] Dropping {}: only client packets can be forwarded", client, packet.kind());
            return Ok(());
        }
        if self.registry.get(client).is_none() {
            return Err(ServerError::ClientNotFound(client));
        }

        debug!("[{}] Forwarding {} through the proxy", client, packet.kind());
        let envelope = Packet::forward(client, packet)?;
        self.packets.send_packet(Destination::Proxy, envelope)
    }

    pub fn broadcast(&self, packet: &Packet) {
        for connection in self.registry.clients() {
            if let Err(e) = self.send(connection.uuid(), packet.clone()) {
                warn!("[{}] Failed to forward {}: {}", connection.uuid(), packet.kind(), e);
            }
        }
    }
}
