use std::sync::Arc;

use crate::client::ClientRegistry;
use crate::config::Settings;
use crate::event::EventBus;
use crate::networking::{ClientSink, DirectNetworking, ForwardingNetworking, NetworkingService};
use crate::scheduler::TaskProvider;
use crate::state::StateService;
use crate::transport::PacketManager;

/// Services shared by everything in one process.
#[derive(Clone)]
pub struct Context {
    pub settings: Arc<Settings>,
    pub bus: Arc<EventBus>,
    pub tasks: Arc<dyn TaskProvider>,
    pub state: Arc<StateService>,
    pub networking: NetworkingService,
}

impl Context {
    fn build(settings: Settings, tasks: Arc<dyn TaskProvider>, networking: impl FnOnce(Arc<ClientRegistry>) -> NetworkingService) -> Self {
        let bus = Arc::new(EventBus::new());
        let registry = Arc::new(ClientRegistry::new(bus.clone()));
        Self {
            settings: Arc::new(settings),
            state: Arc::new(StateService::new(bus.clone())),
            networking: networking(registry),
            bus,
            tasks,
        }
    }

    /// Context for a process that owns its clients' sockets.
    #[must_use]
    pub fn direct(settings: Settings, tasks: Arc<dyn TaskProvider>, sink: Arc<dyn ClientSink>) -> Self {
        Self::build(settings, tasks, |registry| {
            NetworkingService::Direct(Arc::new(DirectNetworking::new(registry, sink)))
        })
    }

    /// Context for a node whose client packets go out through the proxy.
    #[must_use]
    pub fn forwarding(settings: Settings, tasks: Arc<dyn TaskProvider>, packets: Arc<PacketManager>) -> Self {
        Self::build(settings, tasks, |registry| {
            NetworkingService::Forwarding(Arc::new(ForwardingNetworking::new(registry, packets)))
        })
    }
}
