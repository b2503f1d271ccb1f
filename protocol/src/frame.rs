use uuid::Uuid;

use crate::error::ProtocolError;
use crate::io::{Reader, Writer};
use crate::packet::Packet;

/// Where a frame on a node/proxy link should end up.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Destination {
    /// The proxy process itself.
    Proxy,
    /// A specific node, by id.
    Node(String),
    /// Whichever node currently hosts the given client.
    ClientOwner(Uuid),
    /// Every connected node.
    AllNodes,
}

impl Destination {
    const PROXY: u8 = 0x00;
    const NODE: u8 = 0x01;
    const CLIENT_OWNER: u8 = 0x02;
    const ALL_NODES: u8 = 0x03;

    fn write(&self, w: &mut Writer) -> Result<(), ProtocolError> {
        match self {
            Self::Proxy => w.write_u8(Self::PROXY),
            Self::Node(id) => {
                w.write_u8(Self::NODE);
                w.write_string(id)?;
            }
            Self::ClientOwner(client) => {
                w.write_u8(Self::CLIENT_OWNER);
                w.write_uuid(client);
            }
            Self::AllNodes => w.write_u8(Self::ALL_NODES),
        }
        Ok(())
    }

    fn read(r: &mut Reader) -> Result<Self, ProtocolError> {
        match r.read_u8()? {
            Self::PROXY => Ok(Self::Proxy),
            Self::NODE => Ok(Self::Node(r.read_string()?)),
            Self::CLIENT_OWNER => Ok(Self::ClientOwner(r.read_uuid()?)),
            Self::ALL_NODES => Ok(Self::AllNodes),
            other => Err(ProtocolError::UnknownDestination(other)),
        }
    }
}

/// Addressed packet as it travels over a node/proxy link.
///
/// Format: `[destination_tag: u8][destination...][packet...]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub destination: Destination,
    pub packet: Packet,
}

impl Frame {
    #[must_use]
    pub fn new(destination: Destination, packet: Packet) -> Self {
        Self { destination, packet }
    }

    /// # Errors
    /// Propagates packet encoding errors.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        let mut w = Writer::new();
        self.destination.write(&mut w)?;
        w.write_bytes(&self.packet.encode()?);
        Ok(w.into_vec())
    }

    /// Decode one frame, returning it and the number of bytes consumed.
    ///
    /// # Errors
    /// Returns an incomplete error (see [`ProtocolError::is_incomplete`]) when the
    /// buffer holds only part of a frame. A [`ProtocolError::MalformedPayload`]
    /// counts the destination header in `consumed`.
    pub fn decode(buf: &[u8]) -> Result<(Self, usize), ProtocolError> {
        let mut r = Reader::new(buf);
        let destination = Destination::read(&mut r)?;
        let header = r.position();
        let (packet, size) = Packet::decode(r.remaining()).map_err(|e| match e {
            ProtocolError::MalformedPayload { kind, consumed } => ProtocolError::MalformedPayload {
                kind,
                consumed: header + consumed,
            },
            other => other,
        })?;
        Ok((Self { destination, packet }, header + size))
    }
}
