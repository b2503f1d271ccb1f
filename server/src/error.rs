//! Error types for the voicelink server.

use thiserror::Error;
use uuid::Uuid;

use crate::event::EventKind;

/// Errors that can occur in the server.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] voicelink_protocol::ProtocolError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Client not found: {0}")]
    ClientNotFound(Uuid),

    #[error("Destination {0} is not a client")]
    NotAClient(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Link closed")]
    LinkClosed,

    #[error("Login rejected: {0}")]
    LoginRejected(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Handler already set for {0:?}")]
    HandlerAlreadySet(EventKind),

    #[error("Handler for {expected:?} cannot take {got:?} events")]
    HandlerKindMismatch { expected: EventKind, got: EventKind },
}
