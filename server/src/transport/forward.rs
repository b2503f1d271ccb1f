use tracing::{debug, warn};
use voicelink_protocol::{Packet, PacketKind};

use crate::networking::NetworkingService;
use crate::transport::{Origin, PacketListener};

/// Proxy-side: unwraps client packets forwarded by nodes and delivers them to
/// the local client socket.
pub struct ForwardListener {
    networking: NetworkingService,
}

impl ForwardListener {
    #[must_use]
    pub fn new(networking: NetworkingService) -> Self {
        Self { networking }
    }
}

impl PacketListener for ForwardListener {
    fn kinds(&self) -> &[PacketKind] {
        &[PacketKind::ForwardToClient]
    }

    fn on_packet(&self, origin: &Origin, packet: Packet) {
        let Packet::ForwardToClient { client, packet } = packet else {
            return;
        };

        debug!("[{}] {} forwarded from {:?}", client, packet.kind(), origin);
        if let Err(e) = self.networking.send(client, *packet) {
            warn!("[{}] Dropping forwarded packet: {}", client, e);
        }
    }
}
