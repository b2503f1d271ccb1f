use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use voicelink_protocol::{Destination, Frame, Packet};

use crate::config::PACKET_BUFFER_SIZE;
use crate::error::ServerError;
use crate::transport::{drain_frames, write_frame, PacketManager};

/// Accepts node links for a proxy-role [`PacketManager`].
pub struct ProxyServer {
    packets: Arc<PacketManager>,
}

impl ProxyServer {
    #[must_use]
    pub fn new(packets: Arc<PacketManager>) -> Self {
        Self { packets }
    }

    /// Listens for nodes on `port` until the listener fails.
    ///
    /// # Errors
    /// Returns the bind or accept error.
    pub async fn run(&self, port: u16) -> Result<(), ServerError> {
        let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
        info!("ProxyServer listening on {}", listener.local_addr()?);

        loop {
            let (socket, peer_addr) = listener.accept().await?;
            self.spawn_link(socket, peer_addr);
        }
    }

    /// Binds `addr` and accepts nodes in the background, returning the bound address.
    ///
    /// # Errors
    /// Returns the bind error.
    pub async fn bind(&self, addr: &str) -> Result<SocketAddr, ServerError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!("ProxyServer listening on {}", local_addr);

        let packets = self.packets.clone();
        tokio::spawn(async move {
            let server = ProxyServer::new(packets);
            loop {
                match listener.accept().await {
                    Ok((socket, peer_addr)) => server.spawn_link(socket, peer_addr),
                    Err(e) => {
                        error!("Accept error: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(local_addr)
    }

    fn spawn_link(&self, socket: TcpStream, peer_addr: SocketAddr) {
        info!("[{}] New node connection", peer_addr);
        let packets = self.packets.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_node(packets, socket, peer_addr).await {
                error!("[{}] Error: {}", peer_addr, e);
            }
        });
    }
}

/// What arrived on a node link up to and including its `NodeHello`.
struct Hello {
    node: String,
    early: Vec<Frame>,
    buffer: Vec<u8>,
}

/// Waits for the node's `NodeHello`. Frames and partial bytes read past it are kept.
async fn read_hello(reader: &mut OwnedReadHalf, peer_addr: SocketAddr) -> Result<Option<Hello>, ServerError> {
    let mut read_buf = vec![0u8; PACKET_BUFFER_SIZE];
    let mut buffer = Vec::new();

    loop {
        let n = reader.read(&mut read_buf).await?;
        if n == 0 {
            debug!("[{}] Disconnected before hello", peer_addr);
            return Ok(None);
        }
        buffer.extend_from_slice(&read_buf[..n]);

        let mut frames = drain_frames(&mut buffer, peer_addr)?.into_iter();
        let Some(first) = frames.next() else {
            continue;
        };

        return match first {
            Frame {
                destination: Destination::Proxy,
                packet: Packet::NodeHello { node },
            } => Ok(Some(Hello {
                node,
                early: frames.collect(),
                buffer,
            })),
            other => Err(ServerError::Remote(format!(
                "expected node_hello, got {}",
                other.packet.kind()
            ))),
        };
    }
}

async fn handle_node(packets: Arc<PacketManager>, socket: TcpStream, peer_addr: SocketAddr) -> Result<(), ServerError> {
    let (mut reader, mut writer) = socket.into_split();

    let Some(Hello { node, early, buffer }) = read_hello(&mut reader, peer_addr).await? else {
        return Ok(());
    };
    info!("[{}] Node '{}' linked", peer_addr, node);

    let (tx, mut rx) = mpsc::unbounded_channel::<Frame>();
    packets.attach_node(&node, tx.clone());
    for frame in early {
        packets.handle_node_frame(&node, frame);
    }

    let result = pump(&packets, &node, buffer, &mut reader, &mut writer, &mut rx).await;

    packets.detach_node(&node, &tx);
    info!("[{}] Node '{}' unlinked", peer_addr, node);
    result
}

async fn pump(
    packets: &PacketManager,
    node: &str,
    mut buffer: Vec<u8>,
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    rx: &mut mpsc::UnboundedReceiver<Frame>,
) -> Result<(), ServerError> {
    let mut read_buf = vec![0u8; PACKET_BUFFER_SIZE];

    loop {
        tokio::select! {
            read_result = reader.read(&mut read_buf) => {
                match read_result {
                    Ok(0) => return Ok(()),
                    Ok(n) => {
                        buffer.extend_from_slice(&read_buf[..n]);
                        for frame in drain_frames(&mut buffer, node)? {
                            packets.handle_node_frame(node, frame);
                        }
                    }
                    Err(e) => {
                        warn!("[{}] TCP receive error: {}", node, e);
                        return Ok(());
                    }
                }
            }

            outbound = rx.recv() => {
                match outbound {
                    Some(frame) => write_frame(writer, &frame).await?,
                    None => return Ok(()),
                }
            }
        }
    }
}
