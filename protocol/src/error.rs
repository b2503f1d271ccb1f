use std::fmt;

/// Protocol encoding and decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    PacketTooShort { expected: usize, got: usize },
    IncompletePayload { expected: usize, got: usize },
    /// The payload arrived in full but its fields do not fit in it. `consumed`
    /// covers the whole packet so a stream reader can skip past it.
    MalformedPayload { kind: String, consumed: usize },
    UnknownPacket(String),
    UnknownDestination(u8),
    InvalidUtf8,
    NotClientBound(String),
    PayloadTooLarge(usize),
    InvalidVoiceEvent(String),
}

impl ProtocolError {
    /// True when more bytes could turn this error into a successful decode.
    #[must_use]
    pub fn is_incomplete(&self) -> bool {
        matches!(
            self,
            ProtocolError::PacketTooShort { .. } | ProtocolError::IncompletePayload { .. }
        )
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::PacketTooShort { expected, got } => {
                write!(f, "packet too short: expected at least {} bytes, got {}", expected, got)
            }
            ProtocolError::IncompletePayload { expected, got } => {
                write!(f, "incomplete payload: expected {} bytes, got {}", expected, got)
            }
            ProtocolError::MalformedPayload { kind, consumed } => {
                write!(f, "malformed {} payload ({} bytes skipped)", kind, consumed)
            }
            ProtocolError::UnknownPacket(name) => {
                write!(f, "unknown packet kind: {:?}", name)
            }
            ProtocolError::UnknownDestination(tag) => {
                write!(f, "unknown destination tag: 0x{:02x}", tag)
            }
            ProtocolError::InvalidUtf8 => {
                write!(f, "invalid UTF-8 encoding")
            }
            ProtocolError::NotClientBound(name) => {
                write!(f, "packet {} is not client-bound and cannot be forwarded", name)
            }
            ProtocolError::PayloadTooLarge(len) => {
                write!(f, "payload too large: {} bytes", len)
            }
            ProtocolError::InvalidVoiceEvent(line) => {
                write!(f, "invalid voice event: {:?}", line)
            }
        }
    }
}

impl std::error::Error for ProtocolError {}
