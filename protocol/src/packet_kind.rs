use crate::error::ProtocolError;

/// Wire-name prefix shared by every packet that is ultimately delivered to a client.
const CLIENT_BOUND_PREFIX: &str = "client_";

macro_rules! packet_kinds {
    ($($name:ident => $wire:literal),* $(,)?) => {
        /// Packet type, identified on the wire by its stable name.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum PacketKind { $($name,)* }

        impl PacketKind {
            pub const ALL: &'static [PacketKind] = &[$(PacketKind::$name,)*];

            /// Stable wire name of this packet type.
            #[must_use]
            pub const fn name(self) -> &'static str {
                match self {
                    $(Self::$name => $wire,)*
                }
            }

            /// Resolves a wire name back to its packet type.
            ///
            /// # Errors
            /// Returns [`ProtocolError::UnknownPacket`] for names this build does not know.
            pub fn from_name(name: &str) -> Result<Self, ProtocolError> {
                match name {
                    $($wire => Ok(Self::$name),)*
                    other => Err(ProtocolError::UnknownPacket(other.to_string())),
                }
            }
        }
    };
}

packet_kinds! {
    // Node <-> proxy control
    NodeHello => "node_hello",
    ForwardToClient => "forward_to_client",

    // Client-bound
    ClientUnlockVoiceChat => "client_unlock_voice_chat",
    ClientDisconnect => "client_disconnect",
}

impl PacketKind {
    /// Whether packets of this kind are addressed to a client and may be forwarded
    /// through the proxy on behalf of a node.
    #[must_use]
    pub fn is_client_bound(self) -> bool {
        self.name().starts_with(CLIENT_BOUND_PREFIX)
    }
}

impl std::fmt::Display for PacketKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
