use std::sync::Arc;

use tracing::{debug, error, info};
use voicelink_server::account::{AccountService, HttpRestClient};
use voicelink_server::config::{Role, Settings};
use voicelink_server::context::Context;
use voicelink_server::error::ServerError;
use voicelink_server::networking::ChannelClientSink;
use voicelink_server::scheduler::TokioTaskProvider;
use voicelink_server::transport::{ForwardListener, NodeLink, PacketManager, ProxyServer};
use voicelink_server::voice::{TcpAuthorityConnector, VoiceService};

const DEFAULT_CONFIG_PATH: &str = "voicelink.toml";

#[tokio::main]
async fn main() {
    #[cfg(debug_assertions)]
    {
        use tracing::Level;
        tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .init();
    }

    #[cfg(not(debug_assertions))]
    {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    }

    let path = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let settings = match Settings::load(&path) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load {}: {}", path, e);
            return;
        }
    };

    if let Err(e) = run(settings).await {
        error!("Server error: {}", e);
    }
}

async fn run(settings: Settings) -> Result<(), ServerError> {
    info!("Starting voicelink as {:?}", settings.role);
    let tasks = Arc::new(TokioTaskProvider::current());

    if settings.role == Role::Node {
        let packets = Arc::new(PacketManager::node());
        let link = NodeLink::connect(&settings.proxy_address, &settings.node_id, packets.clone()).await?;
        let _ctx = Context::forwarding(settings, tasks, packets);

        tokio::select! {
            () = link.closed() => info!("Proxy link closed, stopping"),
            _ = tokio::signal::ctrl_c() => info!("Shutting down"),
        }
        return Ok(());
    }

    // this process owns the client sockets; the embedding host drains the queue
    let (sink, mut outbound) = ChannelClientSink::new();
    tokio::spawn(async move {
        while let Some((client, packet)) = outbound.recv().await {
            debug!("[{}] -> {}", client, packet.kind());
        }
    });
    let ctx = Context::direct(settings, tasks, Arc::new(sink));

    if ctx.settings.role == Role::Proxy {
        let packets = Arc::new(PacketManager::proxy());
        packets.register_listener(Arc::new(ForwardListener::new(ctx.networking.clone())));
        let addr = ProxyServer::new(packets)
            .bind(&format!("0.0.0.0:{}", ctx.settings.proxy_port))
            .await?;
        info!("Accepting nodes on {}", addr);
    }

    let account = &ctx.settings.account;
    let rest = Arc::new(HttpRestClient::new(account.api_base_url.clone(), account.key.clone())?);
    let connector = Arc::new(TcpAuthorityConnector::new(ctx.settings.voice.login_timeout()));
    let voice = VoiceService::new(ctx.clone(), connector, rest.clone());
    let accounts = AccountService::new(ctx.clone(), rest, voice);
    accounts.start().await;

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    accounts.shutdown().await;
    Ok(())
}
