use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{RwLock, mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use orbit_types::events::{Acknowledgement, ServerEnvelope, SocketEvent};

/// Default time a client has to acknowledge an event.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(5);

/// Realtime notifier: tracks every open gateway connection per user and
/// pushes events to them, collecting acknowledgements.
///
/// Delivery is at-most-once per emit. Nothing is queued for users with no
/// open connection.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// user_id -> (conn_id -> outbound frames)
    connections: RwLock<HashMap<Uuid, HashMap<Uuid, mpsc::UnboundedSender<ServerEnvelope>>>>,

    /// ack_id -> waiting emitter
    pending_acks: Mutex<HashMap<u64, PendingAck>>,

    next_ack_id: AtomicU64,
    ack_timeout: Duration,
}

struct PendingAck {
    conn_id: Uuid,
    tx: oneshot::Sender<Acknowledgement>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_ACK_TIMEOUT)
    }
}

impl Dispatcher {
    pub fn new(ack_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                connections: RwLock::new(HashMap::new()),
                pending_acks: Mutex::new(HashMap::new()),
                next_ack_id: AtomicU64::new(1),
                ack_timeout,
            }),
        }
    }

    pub fn ack_timeout(&self) -> Duration {
        self.inner.ack_timeout
    }

    /// Register a connection for `user_id`. Returns (conn_id, receiver of frames to write).
    pub async fn register(&self, user_id: Uuid) -> (Uuid, mpsc::UnboundedReceiver<ServerEnvelope>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .connections
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Drop a connection and fail every ack still waiting on it.
    pub async fn unregister(&self, user_id: Uuid, conn_id: Uuid) {
        {
            let mut connections = self.inner.connections.write().await;
            if let Some(conns) = connections.get_mut(&user_id) {
                conns.remove(&conn_id);
                if conns.is_empty() {
                    connections.remove(&user_id);
                }
            }
        }

        let orphaned: Vec<PendingAck> = {
            let mut pending = self.lock_pending();
            let ids: Vec<u64> = pending
                .iter()
                .filter(|(_, p)| p.conn_id == conn_id)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| pending.remove(&id)).collect()
        };
        for p in orphaned {
            let _ = p.tx.send(Acknowledgement::disconnected());
        }
    }

    pub async fn connection_count(&self, user_id: Uuid) -> usize {
        self.inner
            .connections
            .read()
            .await
            .get(&user_id)
            .map_or(0, |conns| conns.len())
    }

    /// Push `event` to every connection of `user_id`.
    ///
    /// The returned handle resolves to one acknowledgement per connection the
    /// event was written to. Events that do not take acks resolve immediately.
    pub async fn emit(&self, user_id: Uuid, event: SocketEvent) -> AckHandle {
        let connections = self.inner.connections.read().await;
        let mut waiting = Vec::new();
        let mut settled = Vec::new();

        if let Some(conns) = connections.get(&user_id) {
            for (&conn_id, tx) in conns {
                if !event.wants_ack() {
                    let _ = tx.send(ServerEnvelope {
                        ack_id: None,
                        event: event.clone(),
                    });
                    continue;
                }

                let ack_id = self.inner.next_ack_id.fetch_add(1, Ordering::Relaxed);
                let (ack_tx, ack_rx) = oneshot::channel();
                self.lock_pending()
                    .insert(ack_id, PendingAck { conn_id, tx: ack_tx });

                let envelope = ServerEnvelope {
                    ack_id: Some(ack_id),
                    event: event.clone(),
                };
                if tx.send(envelope).is_err() {
                    self.lock_pending().remove(&ack_id);
                    settled.push(Acknowledgement::disconnected());
                    continue;
                }
                waiting.push((ack_id, ack_rx));
            }
        }

        debug!(
            "emitted {} to {} ({} awaiting ack)",
            event.name(),
            user_id,
            waiting.len()
        );

        AckHandle {
            dispatcher: self.clone(),
            waiting,
            settled,
        }
    }

    /// Fire-and-forget emit: acknowledgements are awaited in the background
    /// and failures only logged. Used for token streaming, where a retry
    /// would duplicate content on the client.
    pub async fn notify(&self, user_id: Uuid, event: SocketEvent) {
        let name = event.name();
        let handle = self.emit(user_id, event).await;
        if handle.is_empty() {
            return;
        }
        tokio::spawn(async move {
            for ack in handle.wait().await {
                if !ack.success {
                    warn!("{} to {} not acknowledged: {}", name, user_id, ack.message);
                }
            }
        });
    }

    /// Deliver a client's acknowledgement. Unknown or already-expired ids are ignored.
    pub fn resolve_ack(&self, conn_id: Uuid, ack_id: u64, ack: Acknowledgement) {
        let mut pending = self.lock_pending();
        let owner = pending.get(&ack_id).map(|p| p.conn_id);
        match owner {
            Some(owner) if owner == conn_id => {
                if let Some(p) = pending.remove(&ack_id) {
                    let _ = p.tx.send(ack);
                }
            }
            Some(_) => warn!("connection {} acked foreign ack id {}", conn_id, ack_id),
            None => debug!("late or unknown ack {} from {}", ack_id, conn_id),
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<u64, PendingAck>> {
        // The map is only touched in short non-panicking sections; recover if poisoned anyway.
        self.inner
            .pending_acks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Acknowledgements owed for one `emit`.
pub struct AckHandle {
    dispatcher: Dispatcher,
    waiting: Vec<(u64, oneshot::Receiver<Acknowledgement>)>,
    settled: Vec<Acknowledgement>,
}

impl AckHandle {
    /// True when the event reached no connection that owes an ack.
    pub fn is_empty(&self) -> bool {
        self.waiting.is_empty() && self.settled.is_empty()
    }

    /// Wait up to the dispatcher's ack timeout.
    pub async fn wait(self) -> Vec<Acknowledgement> {
        let timeout = self.dispatcher.ack_timeout();
        self.wait_for(timeout).await
    }

    /// Wait up to `timeout` in total. Connections that have not answered by
    /// then yield `{success: false, message: "Timeout"}`.
    pub async fn wait_for(self, timeout: Duration) -> Vec<Acknowledgement> {
        let deadline = Instant::now() + timeout;
        let mut acks = self.settled;

        for (ack_id, rx) in self.waiting {
            let ack = match tokio::time::timeout_at(deadline, rx).await {
                Ok(Ok(ack)) => ack,
                Ok(Err(_)) => Acknowledgement::disconnected(),
                Err(_) => {
                    self.dispatcher.lock_pending().remove(&ack_id);
                    Acknowledgement::timeout()
                }
            };
            acks.push(ack);
        }

        acks
    }
}
