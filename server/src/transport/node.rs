use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use voicelink_protocol::{Destination, Frame, Packet};

use crate::config::PACKET_BUFFER_SIZE;
use crate::error::ServerError;
use crate::transport::{drain_frames, write_frame, PacketManager};

/// A node's uplink to its proxy.
pub struct NodeLink {
    node_id: String,
    packets: Arc<PacketManager>,
    tx: mpsc::UnboundedSender<Frame>,
    task: JoinHandle<()>,
}

impl NodeLink {
    /// Dials the proxy at `addr`, announces `node_id` and installs the link as
    /// the uplink of `packets`.
    ///
    /// # Errors
    /// Returns the connect or handshake write error.
    pub async fn connect(addr: &str, node_id: &str, packets: Arc<PacketManager>) -> Result<Self, ServerError> {
        let socket = TcpStream::connect(addr).await?;
        let (mut reader, mut writer) = socket.into_split();

        let hello = Frame::new(
            Destination::Proxy,
            Packet::NodeHello {
                node: node_id.to_string(),
            },
        );
        write_frame(&mut writer, &hello).await?;
        info!("[{}] Linked to proxy as '{}'", addr, node_id);

        let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
        packets.attach_uplink(tx.clone());

        let peer = addr.to_string();
        let link_packets = packets.clone();
        let link_tx = tx.clone();
        let task = tokio::spawn(async move {
            let packets = link_packets;
            let mut read_buf = vec![0u8; PACKET_BUFFER_SIZE];
            let mut buffer = Vec::new();

            loop {
                tokio::select! {
                    read_result = reader.read(&mut read_buf) => {
                        match read_result {
                            Ok(0) => {
                                info!("[{}] Proxy closed the link", peer);
                                break;
                            }
                            Ok(n) => {
                                buffer.extend_from_slice(&read_buf[..n]);
                                match drain_frames(&mut buffer, &peer) {
                                    Ok(frames) => {
                                        for frame in frames {
                                            packets.handle_uplink_frame(frame);
                                        }
                                    }
                                    Err(e) => {
                                        error!("[{}] {}", peer, e);
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                warn!("[{}] TCP receive error: {}", peer, e);
                                break;
                            }
                        }
                    }

                    outbound = rx.recv() => {
                        let Some(frame) = outbound else { break };
                        if let Err(e) = write_frame(&mut writer, &frame).await {
                            error!("[{}] Failed to send frame: {}", peer, e);
                            break;
                        }
                    }
                }
            }

            packets.detach_uplink(&link_tx);
        });

        Ok(Self {
            node_id: node_id.to_string(),
            packets,
            tx,
            task,
        })
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits until the link goes down.
    pub async fn closed(self) {
        let _ = self.task.await;
    }

    pub fn shutdown(&self) {
        self.task.abort();
        self.packets.detach_uplink(&self.tx);
    }
}
