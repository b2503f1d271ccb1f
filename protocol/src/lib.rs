pub mod error;
pub mod frame;
pub mod io;
pub mod packet;
pub mod packet_kind;
pub mod voice_event;

pub use error::ProtocolError;
pub use frame::{Destination, Frame};
pub use packet::Packet;
pub use packet_kind::PacketKind;
pub use voice_event::{VoiceEvent, VoiceEventType};
