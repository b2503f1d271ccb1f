use std::sync::{Arc, RwLock};

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};
use uuid::Uuid;
use voicelink_protocol::{Destination, Frame, Packet, PacketKind};

use crate::error::ServerError;

/// Where an inbound packet came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// Sent by this process.
    Local,
    Proxy,
    Node(String),
}

/// Receives inbound packets of the kinds it declares.
pub trait PacketListener: Send + Sync {
    fn kinds(&self) -> &[PacketKind];

    fn on_packet(&self, origin: &Origin, packet: Packet);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRole {
    Proxy,
    Node,
}

/// Addressed packet routing between a proxy and its nodes.
pub struct PacketManager {
    role: LinkRole,
    listeners: RwLock<Vec<Arc<dyn PacketListener>>>,
    // proxy role
    nodes: DashMap<String, UnboundedSender<Frame>>,
    owners: DashMap<Uuid, String>,
    // node role
    uplink: ArcSwapOption<UnboundedSender<Frame>>,
}

impl PacketManager {
    fn with_role(role: LinkRole) -> Self {
        Self {
            role,
            listeners: RwLock::new(Vec::new()),
            nodes: DashMap::new(),
            owners: DashMap::new(),
            uplink: ArcSwapOption::empty(),
        }
    }

    #[must_use]
    pub fn proxy() -> Self {
        Self::with_role(LinkRole::Proxy)
    }

    #[must_use]
    pub fn node() -> Self {
        Self::with_role(LinkRole::Node)
    }

    #[must_use]
    pub fn role(&self) -> LinkRole {
        self.role
    }

    pub fn register_listener(&self, listener: Arc<dyn PacketListener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(listener);
        }
    }

    /// Sends `packet` towards `destination`. Best effort, no acknowledgement.
    ///
    /// # Errors
    /// Returns [`ServerError::LinkClosed`] when the next hop is gone, or
    /// [`ServerError::NodeNotFound`] / [`ServerError::ClientNotFound`] when the
    /// proxy cannot resolve the destination.
    pub fn send_packet(&self, destination: Destination, packet: Packet) -> Result<(), ServerError> {
        match self.role {
            LinkRole::Node => {
                let uplink = self.uplink.load();
                let tx = uplink.as_ref().ok_or(ServerError::LinkClosed)?;
                tx.send(Frame::new(destination, packet))
                    .map_err(|_| ServerError::LinkClosed)
            }
            LinkRole::Proxy => self.route(&Origin::Local, Frame::new(destination, packet)),
        }
    }

    fn route(&self, origin: &Origin, frame: Frame) -> Result<(), ServerError> {
        match &frame.destination {
            Destination::Proxy => {
                self.deliver_local(origin, frame.packet);
                Ok(())
            }
            Destination::Node(id) => {
                let id = id.clone();
                self.send_to_node(&id, frame)
            }
            Destination::ClientOwner(client) => {
                let owner = self
                    .owner_of(*client)
                    .ok_or(ServerError::ClientNotFound(*client))?;
                self.send_to_node(&owner, frame)
            }
            Destination::AllNodes => {
                let targets: Vec<(String, UnboundedSender<Frame>)> = self
                    .nodes
                    .iter()
                    .filter(|n| !matches!(origin, Origin::Node(from) if from == n.key()))
                    .map(|n| (n.key().clone(), n.value().clone()))
                    .collect();
                for (id, tx) in targets {
                    if tx.send(frame.clone()).is_err() {
                        debug!("[{}] Node link closed while broadcasting", id);
                    }
                }
                Ok(())
            }
        }
    }

    fn send_to_node(&self, id: &str, frame: Frame) -> Result<(), ServerError> {
        let tx = self
            .nodes
            .get(id)
            .map(|n| n.value().clone())
            .ok_or_else(|| ServerError::NodeNotFound(id.to_string()))?;
        tx.send(frame).map_err(|_| ServerError::LinkClosed)
    }

    fn deliver_local(&self, origin: &Origin, packet: Packet) {
        let kind = packet.kind();
        let listeners: Vec<Arc<dyn PacketListener>> = match self.listeners.read() {
            Ok(listeners) => listeners
                .iter()
                .filter(|l| l.kinds().contains(&kind))
                .cloned()
                .collect(),
            Err(_) => return,
        };

        if listeners.is_empty() {
            debug!("No listener for {} from {:?}", kind, origin);
            return;
        }
        for listener in listeners {
            listener.on_packet(origin, packet.clone());
        }
    }

    /// Handles a frame read from node `node`'s link (proxy role).
    pub fn handle_node_frame(&self, node: &str, frame: Frame) {
        let origin = Origin::Node(node.to_string());
        if let Err(e) = self.route(&origin, frame) {
            warn!("[{}] Failed to relay frame: {}", node, e);
        }
    }

    /// Handles a frame read from the proxy link (node role). Everything the proxy
    /// sends us is addressed to this process.
    pub fn handle_uplink_frame(&self, frame: Frame) {
        self.deliver_local(&Origin::Proxy, frame.packet);
    }

    pub(crate) fn attach_node(&self, id: &str, tx: UnboundedSender<Frame>) {
        if self.nodes.insert(id.to_string(), tx).is_some() {
            warn!("[{}] Node reconnected, replacing previous link", id);
        }
    }

    /// Only removes the link if it is still the one registered under `id`.
    pub(crate) fn detach_node(&self, id: &str, tx: &UnboundedSender<Frame>) {
        self.nodes.remove_if(id, |_, current| current.same_channel(tx));
    }

    pub(crate) fn attach_uplink(&self, tx: UnboundedSender<Frame>) {
        self.uplink.store(Some(Arc::new(tx)));
    }

    pub(crate) fn detach_uplink(&self, tx: &UnboundedSender<Frame>) {
        self.uplink
            .rcu(|current| match current {
                Some(current) if current.same_channel(tx) => None,
                other => other.clone(),
            });
    }

    #[must_use]
    pub fn is_linked(&self) -> bool {
        match self.role {
            LinkRole::Node => self.uplink.load().is_some(),
            LinkRole::Proxy => !self.nodes.is_empty(),
        }
    }

    #[must_use]
    pub fn nodes(&self) -> Vec<String> {
        self.nodes.iter().map(|n| n.key().clone()).collect()
    }

    /// Records that `client` is currently hosted by `node`.
    pub fn assign_client(&self, client: Uuid, node: impl Into<String>) {
        self.owners.insert(client, node.into());
    }

    pub fn release_client(&self, client: Uuid) {
        self.owners.remove(&client);
    }

    #[must_use]
    pub fn owner_of(&self, client: Uuid) -> Option<String> {
        self.owners.get(&client).map(|o| o.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(Origin, Packet)>>,
    }

    impl PacketListener for Recorder {
        fn kinds(&self) -> &[PacketKind] {
            &[PacketKind::NodeHello]
        }

        fn on_packet(&self, origin: &Origin, packet: Packet) {
            self.seen.lock().unwrap().push((origin.clone(), packet));
        }
    }

    fn hello(node: &str) -> Packet {
        Packet::NodeHello { node: node.to_string() }
    }

    #[test]
    fn proxy_routes_by_client_owner() {
        let manager = PacketManager::proxy();
        let (lobby_tx, mut lobby_rx) = mpsc::unbounded_channel();
        let (survival_tx, mut survival_rx) = mpsc::unbounded_channel();
        manager.attach_node("lobby", lobby_tx);
        manager.attach_node("survival", survival_tx);

        let client = Uuid::new_v4();
        assert!(matches!(
            manager.send_packet(Destination::ClientOwner(client), hello("p")),
            Err(ServerError::ClientNotFound(_))
        ));

        manager.assign_client(client, "survival");
        manager
            .send_packet(Destination::ClientOwner(client), hello("p"))
            .unwrap();

        assert!(lobby_rx.try_recv().is_err());
        assert_eq!(survival_rx.try_recv().unwrap().packet, hello("p"));

        manager.release_client(client);
        assert_eq!(manager.owner_of(client), None);
    }

    #[test]
    fn relayed_broadcast_skips_the_sender() {
        let manager = PacketManager::proxy();
        let (a_tx, mut a_rx) = mpsc::unbounded_channel();
        let (b_tx, mut b_rx) = mpsc::unbounded_channel();
        manager.attach_node("a", a_tx);
        manager.attach_node("b", b_tx);

        manager.handle_node_frame("a", Frame::new(Destination::AllNodes, hello("a")));

        assert!(a_rx.try_recv().is_err());
        assert_eq!(b_rx.try_recv().unwrap().packet, hello("a"));
    }

    #[test]
    fn frames_for_the_proxy_reach_listeners() {
        let manager = PacketManager::proxy();
        let recorder = Arc::new(Recorder::default());
        manager.register_listener(recorder.clone());

        manager.handle_node_frame("a", Frame::new(Destination::Proxy, hello("a")));
        manager.handle_node_frame(
            "a",
            Frame::new(Destination::Proxy, Packet::ClientDisconnect { reason: String::new() }),
        );

        assert_eq!(
            *recorder.seen.lock().unwrap(),
            vec![(Origin::Node("a".to_string()), hello("a"))]
        );
    }

    #[test]
    fn stale_detach_keeps_the_new_link() {
        let manager = PacketManager::proxy();
        let (old_tx, _old_rx) = mpsc::unbounded_channel();
        let (new_tx, mut new_rx) = mpsc::unbounded_channel();
        manager.attach_node("a", old_tx.clone());
        manager.attach_node("a", new_tx);
        manager.detach_node("a", &old_tx);

        manager
            .send_packet(Destination::Node("a".to_string()), hello("x"))
            .unwrap();
        assert!(new_rx.try_recv().is_ok());
    }

    #[test]
    fn node_without_uplink_reports_closed_link() {
        let manager = PacketManager::node();
        assert!(!manager.is_linked());
        assert!(matches!(
            manager.send_packet(Destination::Proxy, hello("n")),
            Err(ServerError::LinkClosed)
        ));

        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.attach_uplink(tx.clone());
        manager
            .send_packet(Destination::Node("other".to_string()), hello("n"))
            .unwrap();
        assert_eq!(rx.try_recv().unwrap().destination, Destination::Node("other".to_string()));

        manager.detach_uplink(&tx);
        assert!(!manager.is_linked());
    }
}
