//! viewgate: session & presence gateway runtime binary.
//! Single process wiring the registry, command router, and bus server.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use viewgate_registry::commands::CommandContext;
use viewgate_registry::registry::{Registry, run_event_loop};
use viewgate_registry::sessions::SessionStore;
use viewgate_registry::traits::{ActionDispatcher, AuthService, ClientTransport};
use viewgate_router::router::Router;
use viewgate_router::traits::{ContentSource, SmsGateway};

mod bus;
mod cli;
mod collaborators;
mod config;
mod server;

use collaborators::{BusAuthService, BusDispatcher, BusTransport, HttpContentSource, HttpSmsGateway};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    let filter = std::env::var("VIEWGATE_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let mut config = match &args.config {
        Some(path) => config::RuntimeConfig::load(path)?,
        None => config::RuntimeConfig::default(),
    };
    if let Some(socket_path) = args.socket_path {
        config.socket_path = socket_path;
    }

    info!("viewgate starting");

    let bus = Arc::new(bus::Bus::new());
    let http = reqwest::Client::new();

    let auth: Arc<dyn AuthService> = Arc::new(BusAuthService::new(
        Arc::clone(&bus),
        config.auth_address.clone(),
        Duration::from_millis(config.collaborator_timeout_ms),
    ));
    let sessions = Arc::new(SessionStore::new(Arc::clone(&auth)));
    let transport: Arc<dyn ClientTransport> = Arc::new(BusTransport::new(Arc::clone(&bus)));
    let (registry, events) = Registry::new(
        transport,
        Arc::clone(&sessions),
        config.heartbeat.clone(),
        config.device_class.clone(),
    );
    tokio::spawn(run_event_loop(Arc::clone(&registry), events));

    let content: Arc<dyn ContentSource> =
        Arc::new(HttpContentSource::new(http.clone(), &config.content_base_url));
    let sms: Option<Arc<dyn SmsGateway>> = config.sms.as_ref().map(|sms| {
        Arc::new(HttpSmsGateway::new(
            http.clone(),
            sms.endpoint.clone(),
            sms.sender.clone(),
        )) as Arc<dyn SmsGateway>
    });
    if sms.is_some() {
        info!("SMS notification forwarding enabled");
    }
    let dispatcher: Arc<dyn ActionDispatcher> =
        Arc::new(BusDispatcher::new(Arc::clone(&bus), http));

    let router = Router::new(
        Arc::clone(&registry),
        Arc::clone(&sessions),
        content,
        sms,
    );
    let state = Arc::new(server::GatewayState {
        commands: CommandContext {
            registry,
            sessions,
            auth,
            dispatcher,
            fix_locations: config.fix_locations.clone(),
        },
        router,
    });

    tokio::select! {
        result = server::run_server(&config.socket_path, bus, state) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("viewgate shutting down");
            Ok(())
        }
    }
}
