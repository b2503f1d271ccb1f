//! Voice session control plane: account sync, the voice authority session and
//! packet forwarding between a proxy and its nodes.

pub mod account;
pub mod client;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod networking;
pub mod player;
pub mod scheduler;
pub mod state;
pub mod transport;
pub mod voice;

pub use account::AccountService;
pub use client::{ClientConnection, ClientRegistry};
pub use config::{Role, Settings};
pub use context::Context;
pub use error::ServerError;
pub use event::EventBus;
pub use networking::NetworkingService;
pub use player::{PlayerAdapter, ProximitySource};
pub use scheduler::{TaskProvider, TokioTaskProvider};
pub use voice::VoiceService;
