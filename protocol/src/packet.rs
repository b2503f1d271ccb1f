use uuid::Uuid;

use crate::error::ProtocolError;
use crate::io::{Reader, Writer};
use crate::packet_kind::PacketKind;

/// Packets exchanged between proxy and node processes, and delivered to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Packet {
    // Node <-> proxy control
    NodeHello {
        node: String,
    },
    ForwardToClient {
        client: Uuid,
        packet: Box<Packet>,
    },

    // Client-bound
    ClientUnlockVoiceChat {
        stream_key: String,
        host: String,
        block_radius: i32,
    },
    ClientDisconnect {
        reason: String,
    },
}

impl Packet {
    /// Wraps a client-bound packet in a forwarding envelope addressed to `client`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::NotClientBound`] when `packet` is not a client packet.
    pub fn forward(client: Uuid, packet: Packet) -> Result<Self, ProtocolError> {
        if !packet.is_client_bound() {
            return Err(ProtocolError::NotClientBound(packet.kind().name().to_string()));
        }
        Ok(Self::ForwardToClient {
            client,
            packet: Box::new(packet),
        })
    }

    /// Encode packet to wire format.
    ///
    /// Format: `[kind_name: string][payload_len: u16][payload...]`
    ///
    /// # Errors
    /// Returns [`ProtocolError::PayloadTooLarge`] if a string or the payload exceeds 65535 bytes.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut w = Writer::new();
        w.write_string(self.kind().name())?;

        let len_pos = w.reserve_u16();
        let payload_start = w.position();

        match self {
            Self::NodeHello { node } => {
                w.write_string(node)?;
            }
            Self::ForwardToClient { client, packet } => {
                w.write_uuid(client);
                w.write_bytes(&packet.encode()?);
            }
            Self::ClientUnlockVoiceChat {
                stream_key,
                host,
                block_radius,
            } => {
                w.write_string(stream_key)?;
                w.write_string(host)?;
                w.write_i32(*block_radius);
            }
            Self::ClientDisconnect { reason } => {
                w.write_string(reason)?;
            }
        }

        let payload_len = w.position() - payload_start;
        w.patch_len_at(len_pos, payload_len)?;
        Ok(w.into_vec())
    }

    /// Decode packet from wire format.
    ///
    /// Returns decoded packet and number of bytes consumed from the buffer.
    ///
    /// # Errors
    /// Returns error if buffer is incomplete or contains invalid data.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), ProtocolError> {
        let mut header = Reader::new(buf);
        let name = header.read_string()?;
        let payload_len = header.read_u16()? as usize;
        let remaining = header.remaining();

        if remaining.len() < payload_len {
            return Err(ProtocolError::IncompletePayload {
                expected: payload_len,
                got: remaining.len(),
            });
        }

        let kind = PacketKind::from_name(&name)?;
        let consumed = header.position() + payload_len;
        let packet = Self::decode_payload(kind, &remaining[..payload_len]).map_err(|e| {
            if e.is_incomplete() {
                ProtocolError::MalformedPayload { kind: name, consumed }
            } else {
                e
            }
        })?;

        Ok((packet, consumed))
    }

    fn decode_payload(kind: PacketKind, payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = Reader::new(payload);
        let packet = match kind {
            PacketKind::NodeHello => Self::NodeHello {
                node: r.read_string()?,
            },
            PacketKind::ForwardToClient => {
                let client = r.read_uuid()?;
                let (inner, _) = Self::decode(r.remaining())?;
                Self::forward(client, inner)?
            }
            PacketKind::ClientUnlockVoiceChat => Self::ClientUnlockVoiceChat {
                stream_key: r.read_string()?,
                host: r.read_string()?,
                block_radius: r.read_i32()?,
            },
            PacketKind::ClientDisconnect => Self::ClientDisconnect {
                reason: r.read_string()?,
            },
        };
        Ok(packet)
    }

    /// Returns the packet type.
    #[must_use]
    pub fn kind(&self) -> PacketKind {
        match self {
            Self::NodeHello { .. } => PacketKind::NodeHello,
            Self::ForwardToClient { .. } => PacketKind::ForwardToClient,
            Self::ClientUnlockVoiceChat { .. } => PacketKind::ClientUnlockVoiceChat,
            Self::ClientDisconnect { .. } => PacketKind::ClientDisconnect,
        }
    }

    #[must_use]
    pub fn is_client_bound(&self) -> bool {
        self.kind().is_client_bound()
    }
}
