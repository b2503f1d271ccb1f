mod connection;
mod registry;

pub use connection::ClientConnection;
pub use registry::{ClientRegistry, ConnectionHandler, SubscriptionId};
