//! UDS bus server: persistent connections, newline-delimited JSON frames.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tracing::{debug, info};

use viewgate_core::error::GatewayError;
use viewgate_registry::commands::{self, CommandContext};
use viewgate_router::router::Router;

use crate::bus::{Bus, Frame, PendingReplies, lock_pending};

/// Handlers behind the bus addresses the gateway itself serves.
pub struct GatewayState {
    pub commands: CommandContext,
    pub router: Router,
}

/// Run the UDS bus server.
pub async fn run_server(
    socket_path: &str,
    bus: Arc<Bus>,
    state: Arc<GatewayState>,
) -> anyhow::Result<()> {
    // Create socket directory with mode 0700
    let socket_dir = std::path::Path::new(socket_path)
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid socket path"))?;

    std::fs::create_dir_all(socket_dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_dir, std::fs::Permissions::from_mode(0o700))?;
    }

    // Check for stale socket
    if std::path::Path::new(socket_path).exists() {
        if tokio::net::UnixStream::connect(socket_path).await.is_err() {
            std::fs::remove_file(socket_path)?;
            tracing::info!("removed stale socket at {socket_path}");
        } else {
            anyhow::bail!("another gateway is already running at {socket_path}");
        }
    }

    let listener = UnixListener::bind(socket_path)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
    }

    info!("bus server listening on {socket_path}");

    let connection_ids = AtomicU64::new(1);
    loop {
        let (stream, _) = listener.accept().await?;
        let connection = connection_ids.fetch_add(1, Ordering::Relaxed);
        let bus = Arc::clone(&bus);
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(connection, stream, bus, state).await {
                debug!(connection, "connection error: {e}");
            }
        });
    }
}

async fn handle_connection(
    connection: u64,
    stream: tokio::net::UnixStream,
    bus: Arc<Bus>,
    state: Arc<GatewayState>,
) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let (tx, mut outgoing) = mpsc::unbounded_channel::<Frame>();
    let pending: PendingReplies = Arc::default();

    let write_task = tokio::spawn(async move {
        while let Some(frame) = outgoing.recv().await {
            let Ok(mut line) = serde_json::to_string(&frame) else {
                continue;
            };
            line.push('\n');
            if writer.write_all(line.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            break;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let frame: Frame = match serde_json::from_str(trimmed) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(connection, "dropping unparseable frame: {e}");
                continue;
            }
        };
        match frame {
            Frame::Hello { address } => {
                bus.bind(&address, connection, tx.clone(), Arc::clone(&pending));
            }
            Frame::Request { id, address, body } => {
                let reply = match address.as_deref() {
                    Some(address) => dispatch(&state, address, &body).await,
                    None => GatewayError::Validation("Missing target address.".into())
                        .to_envelope(),
                };
                let _ = tx.send(Frame::Reply { id, body: reply });
            }
            Frame::Reply { id, body } => {
                if let Some(waiter) = lock_pending(&pending).remove(&id) {
                    let _ = waiter.send(body);
                }
            }
            // Peers receive events and messages; they never submit them
            // directly (performAction covers that path).
            Frame::Event { .. } | Frame::Message { .. } => {}
        }
    }

    bus.drop_connection(connection);
    write_task.abort();
    Ok(())
}

/// Route a request frame to the gateway surface it addresses: device
/// registration, a view's command channel, or the backend service interface.
async fn dispatch(state: &GatewayState, address: &str, body: &Value) -> Value {
    match address {
        "register" => commands::handle_register(&state.commands, body).await,
        "service" => state.router.handle(body).await,
        _ => match address.strip_prefix("view:") {
            Some(view_id) => commands::handle_command(&state.commands, view_id, body).await,
            None => {
                GatewayError::NotFound(format!("No handler for address {address}.")).to_envelope()
            }
        },
    }
}

// ─── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use viewgate_core::connection::HeartbeatPolicy;
    use viewgate_registry::registry::Registry;
    use viewgate_registry::sessions::SessionStore;
    use viewgate_registry::traits::{ActionDispatcher, AuthService, ClientTransport};
    use viewgate_router::traits::ContentSource;

    use crate::collaborators::{BusAuthService, BusDispatcher, BusTransport, HttpContentSource};

    fn state(bus: &Arc<Bus>) -> Arc<GatewayState> {
        let http = reqwest::Client::new();
        let auth: Arc<dyn AuthService> = Arc::new(BusAuthService::new(
            Arc::clone(bus),
            "service:auth".to_string(),
            Duration::from_millis(200),
        ));
        let sessions = Arc::new(SessionStore::new(Arc::clone(&auth)));
        let transport: Arc<dyn ClientTransport> = Arc::new(BusTransport::new(Arc::clone(bus)));
        let policy = HeartbeatPolicy {
            heartbeat_interval_ms: 60_000,
            ..HeartbeatPolicy::default()
        };
        let (registry, _events) =
            Registry::new(transport, Arc::clone(&sessions), policy, "tablet");
        let content: Arc<dyn ContentSource> =
            Arc::new(HttpContentSource::new(http.clone(), "http://cds.local"));
        let dispatcher: Arc<dyn ActionDispatcher> =
            Arc::new(BusDispatcher::new(Arc::clone(bus), http));
        let router = Router::new(
            Arc::clone(&registry),
            Arc::clone(&sessions),
            content,
            None,
        );
        Arc::new(GatewayState {
            commands: CommandContext {
                registry,
                sessions,
                auth,
                dispatcher,
                fix_locations: Vec::new(),
            },
            router,
        })
    }

    #[tokio::test]
    async fn register_dispatches_to_registration_handler() {
        let bus = Arc::new(Bus::new());
        let state = state(&bus);
        let reply = dispatch(&state, "register", &json!({"deviceId": "d1"})).await;
        assert_eq!(reply["status"], "ok");
        assert!(reply["view"]["id"].as_str().is_some());
    }

    #[tokio::test]
    async fn service_address_reaches_the_router() {
        let bus = Arc::new(Bus::new());
        let state = state(&bus);
        let reply = dispatch(&state, "service", &json!({"action": "teleport"})).await;
        assert_eq!(reply["message"], "Invalid action command.");
    }

    #[tokio::test]
    async fn view_address_reaches_the_command_channel() {
        let bus = Arc::new(Bus::new());
        let state = state(&bus);
        let reply = dispatch(&state, "view:ghost", &json!({"action": "logout"})).await;
        assert_eq!(reply["code"], 404);
        assert_eq!(reply["message"], "No view with id ghost.");
    }

    #[tokio::test]
    async fn unknown_address_is_not_found() {
        let bus = Arc::new(Bus::new());
        let state = state(&bus);
        let reply = dispatch(&state, "warp", &json!({})).await;
        assert_eq!(reply["code"], 404);
    }
}
