//! Node/proxy links.
//!
//! Frames are length-prefixed packets with a destination header. Both sides
//! accumulate socket reads in a buffer and decode as many complete frames as
//! are available, waiting for more bytes on a partial one.

mod forward;
mod manager;
mod node;
mod proxy;

pub use forward::ForwardListener;
pub use manager::{LinkRole, Origin, PacketListener, PacketManager};
pub use node::NodeLink;
pub use proxy::ProxyServer;

use std::fmt::Display;

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tracing::warn;
use voicelink_protocol::{Frame, ProtocolError};

use crate::config::MAX_FRAME_BUFFER;
use crate::error::ServerError;

/// Decodes every complete frame at the front of `buffer`.
///
/// # Errors
/// Returns [`ServerError::Remote`] when the peer leaves more than
/// [`MAX_FRAME_BUFFER`] undecoded bytes behind.
fn drain_frames(buffer: &mut Vec<u8>, peer: impl Display) -> Result<Vec<Frame>, ServerError> {
    let mut frames = Vec::new();
    loop {
        match Frame::decode(buffer) {
            Ok((frame, size)) => {
                frames.push(frame);
                buffer.drain(..size);
            }
            Err(e) if e.is_incomplete() => break,
            Err(ProtocolError::MalformedPayload { kind, consumed }) => {
                warn!("[{}] Skipping malformed {} frame ({} bytes)", peer, kind, consumed);
                buffer.drain(..consumed);
            }
            Err(e) => {
                warn!("[{}] Protocol error: {}", peer, e);
                buffer.clear();
                break;
            }
        }
    }

    if buffer.len() > MAX_FRAME_BUFFER {
        return Err(ServerError::Remote(format!("[{}] frame buffer overflow", peer)));
    }
    Ok(frames)
}

async fn write_frame(socket: &mut OwnedWriteHalf, frame: &Frame) -> Result<(), ServerError> {
    socket.write_all(&frame.encode()?).await?;
    socket.flush().await?;
    Ok(())
}
