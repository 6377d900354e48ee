//! In-process service bus over newline-delimited JSON frames.
//!
//! Peers connect over the UDS socket, announce the addresses they listen on
//! with `hello` frames, and exchange correlated request/reply pairs. The
//! [`Bus`] tracks one peer entry per announced address; all addresses of a
//! connection share its write channel and pending-reply table, so a closed
//! connection fails every outstanding request at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use viewgate_core::error::GatewayError;

/// One line on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Frame {
    /// Peer announces an address it will answer requests on.
    Hello { address: String },
    /// Correlated request. Peer→server frames carry the target `address`;
    /// server→peer frames omit it (the connection is the target).
    Request {
        id: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        address: Option<String>,
        body: Value,
    },
    /// Reply to a request with the same `id`.
    Reply { id: u64, body: Value },
    /// Broadcast domain event, fire-and-forget.
    Event { model: String, body: Value },
    /// Targeted fire-and-forget message.
    Message { body: Value },
}

pub(crate) type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<Value>>>>;

/// Lock a pending table, tolerating a poisoned mutex. A panicked holder can
/// only have left the map mid-insert/remove, which is safe to continue from.
pub(crate) fn lock_pending(
    pending: &PendingReplies,
) -> std::sync::MutexGuard<'_, HashMap<u64, oneshot::Sender<Value>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Peer {
    connection: u64,
    tx: mpsc::UnboundedSender<Frame>,
    pending: PendingReplies,
}

#[derive(Default)]
pub struct Bus {
    peers: Mutex<HashMap<String, Peer>>,
    next_id: AtomicU64,
}

impl Bus {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_peers(&self) -> std::sync::MutexGuard<'_, HashMap<String, Peer>> {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Bind an address to a connection. A later binding for the same address
    /// replaces the earlier one (reconnect case).
    pub(crate) fn bind(
        &self,
        address: &str,
        connection: u64,
        tx: mpsc::UnboundedSender<Frame>,
        pending: PendingReplies,
    ) {
        debug!(address, connection, "bus address bound");
        self.lock_peers().insert(
            address.to_string(),
            Peer {
                connection,
                tx,
                pending,
            },
        );
    }

    /// Remove every address bound by a closed connection and drain its
    /// pending table, failing the outstanding requests of those addresses.
    pub(crate) fn drop_connection(&self, connection: u64) {
        let mut dropped = Vec::new();
        let mut peers = self.lock_peers();
        peers.retain(|address, peer| {
            if peer.connection == connection {
                debug!(address, connection, "bus address unbound");
                dropped.push(Arc::clone(&peer.pending));
                false
            } else {
                true
            }
        });
        drop(peers);
        // In-flight `request` calls hold their own handle on the pending
        // table, so the waiters only resolve once the senders are dropped
        // here.
        for pending in dropped {
            lock_pending(&pending).clear();
        }
    }

    /// Request/reply to one address with a bounded timeout.
    pub async fn request(
        &self,
        address: &str,
        body: Value,
        timeout: Duration,
    ) -> Result<Value, GatewayError> {
        let (tx, pending) = {
            let peers = self.lock_peers();
            let peer = peers.get(address).ok_or_else(|| {
                GatewayError::operation(format!("No client listening on {address}."))
            })?;
            (peer.tx.clone(), Arc::clone(&peer.pending))
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        lock_pending(&pending).insert(id, reply_tx);

        let frame = Frame::Request {
            id,
            address: None,
            body,
        };
        if tx.send(frame).is_err() {
            lock_pending(&pending).remove(&id);
            return Err(GatewayError::operation(format!(
                "Client on {address} is gone."
            )));
        }

        match tokio::time::timeout(timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(GatewayError::operation(format!(
                "Client on {address} is gone."
            ))),
            Err(_) => {
                lock_pending(&pending).remove(&id);
                Err(GatewayError::operation("Message timed out."))
            }
        }
    }

    /// Fire-and-forget send to one address.
    pub fn send(&self, address: &str, body: Value) -> Result<(), GatewayError> {
        let peers = self.lock_peers();
        let peer = peers
            .get(address)
            .ok_or_else(|| GatewayError::operation(format!("No client listening on {address}.")))?;
        peer.tx
            .send(Frame::Message { body })
            .map_err(|_| GatewayError::operation(format!("Client on {address} is gone.")))
    }

    /// Broadcast a domain event to every connected peer, once per connection.
    pub fn publish(&self, model: &str, body: Value) {
        let peers = self.lock_peers();
        let mut delivered: Vec<u64> = Vec::new();
        for peer in peers.values() {
            if delivered.contains(&peer.connection) {
                continue;
            }
            delivered.push(peer.connection);
            let _ = peer.tx.send(Frame::Event {
                model: model.to_string(),
                body: body.clone(),
            });
        }
    }
}

// ─── Tests ────────────────────────────────────────────────────────
