use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time;
use tracing::{debug, info, warn};
use voicelink_protocol::VoiceEvent;

use crate::error::ServerError;

/// An open control channel to the voice authority.
///
/// Events pushed on `outbound` are written in order. `failure` resolves with
/// the cause when the link breaks; it is dropped without a value when the
/// link is closed on purpose (by dropping `outbound`).
pub struct AuthorityLink {
    pub outbound: mpsc::UnboundedSender<VoiceEvent>,
    pub failure: oneshot::Receiver<ServerError>,
}

#[async_trait]
pub trait AuthorityConnector: Send + Sync {
    /// Logs into the authority at `host`.
    ///
    /// # Errors
    /// Returns [`ServerError::LoginRejected`] when the authority refuses the
    /// password, or the transport error when it cannot be reached.
    async fn open(&self, host: &str, password: &str) -> Result<AuthorityLink, ServerError>;
}

/// Speaks the line protocol over plain TCP. `host` is a `address:port` pair.
pub struct TcpAuthorityConnector {
    login_timeout: Duration,
}

impl TcpAuthorityConnector {
    #[must_use]
    pub fn new(login_timeout: Duration) -> Self {
        Self { login_timeout }
    }
}

#[async_trait]
impl AuthorityConnector for TcpAuthorityConnector {
    async fn open(&self, host: &str, password: &str) -> Result<AuthorityLink, ServerError> {
        let login = async {
            let mut socket = TcpStream::connect(host).await?;
            socket
                .write_all(format!("LOGIN~password={}\n", password).as_bytes())
                .await?;

            let mut reader = BufReader::new(socket);
            let mut reply = String::new();
            reader.read_line(&mut reply).await?;
            if reply.trim() != "OK" {
                return Err(ServerError::LoginRejected(reply.trim().to_string()));
            }
            Ok::<_, ServerError>(reader.into_inner())
        };

        let socket = time::timeout(self.login_timeout, login)
            .await
            .map_err(|_| ServerError::LoginRejected(format!("{} did not answer in time", host)))??;
        info!("[{}] Logged into voice authority", host);

        let (outbound, mut rx) = mpsc::unbounded_channel::<VoiceEvent>();
        let (failure_tx, failure) = oneshot::channel();
        let host = host.to_string();

        tokio::spawn(async move {
            let (reader, mut writer) = socket.into_split();
            let mut lines = BufReader::new(reader).lines();

            let cause = loop {
                tokio::select! {
                    event = rx.recv() => {
                        let Some(event) = event else {
                            debug!("[{}] Voice link closed locally", host);
                            let _ = writer.shutdown().await;
                            return;
                        };
                        let line = format!("{}\n", event);
                        if let Err(e) = writer.write_all(line.as_bytes()).await {
                            break ServerError::Io(e);
                        }
                    }

                    line = lines.next_line() => {
                        match line {
                            Ok(Some(line)) => debug!("[{}] Authority says: {}", host, line),
                            Ok(None) => break ServerError::LinkClosed,
                            Err(e) => break ServerError::Io(e),
                        }
                    }
                }
            };

            warn!("[{}] Voice link failed: {}", host, cause);
            let _ = failure_tx.send(cause);
        });

        Ok(AuthorityLink { outbound, failure })
    }
}
