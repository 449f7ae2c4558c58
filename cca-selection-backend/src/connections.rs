use core::fmt::{self, Display};
use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::ServerMessage;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug)]
struct ConnectionHandle {
    user_id: String,
    department: String,
    cancel: CancellationToken,
    outbound: mpsc::Sender<ServerMessage>,
}

/// Every live real-time connection, keyed by a per-process id.
///
/// The registry does not own the connections. It holds the sending half of each
/// connection's outbound queue and its cancellation token, which is all that is
/// needed to broadcast phase changes and to force-disconnect everybody.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, ConnectionHandle>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connection. It stays registered until the returned guard is dropped
    /// or the registry cancels it.
    pub fn register(
        self: &Arc<Self>,
        user_id: &str,
        department: &str,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> ConnectionGuard {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationToken::new();
        self.connections.insert(
            id,
            ConnectionHandle {
                user_id: user_id.to_owned(),
                department: department.to_owned(),
                cancel: cancel.clone(),
                outbound,
            },
        );
        debug!(connection = %id, user = user_id, department, "registered connection");
        ConnectionGuard {
            id,
            cancel,
            registry: Arc::clone(self),
        }
    }

    /// Removes a connection. Unknown or already removed ids are ignored.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.connections.remove(&id);
        if let Some((_, handle)) = &removed {
            debug!(connection = %id, user = %handle.user_id, "unregistered connection");
        }
        removed.is_some()
    }

    /// Queues `message` on every connection without waiting for any of them.
    ///
    /// A connection whose queue is full or already closed is cancelled and removed.
    /// Returns the number of connections the message was queued on.
    pub fn broadcast(&self, message: &ServerMessage) -> usize {
        let mut delivered = 0;
        let mut failed = Vec::new();
        for entry in &self.connections {
            match entry.outbound.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        connection = %entry.key(),
                        user = %entry.user_id,
                        "dropping slow connection during broadcast"
                    );
                    failed.push(*entry.key());
                }
                Err(TrySendError::Closed(_)) => failed.push(*entry.key()),
            }
        }
        // removal needs the shard write lock, which the iteration above holds for reading
        for id in failed {
            if let Some((_, handle)) = self.connections.remove(&id) {
                handle.cancel.cancel();
            }
        }
        delivered
    }

    /// Cancels every registered connection exactly once and empties the registry.
    pub fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        self.connections.retain(|id, handle| {
            debug!(
                connection = %id,
                user = %handle.user_id,
                department = %handle.department,
                "force-disconnecting"
            );
            handle.cancel.cancel();
            cancelled += 1;
            false
        });
        info!(cancelled, "cancelled all connections");
        cancelled
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

/// Registration of one connection. Dropping it unregisters the connection, so every
/// way a connection task can end (close, error, cancellation, panic) cleans up.
#[derive(Debug)]
pub struct ConnectionGuard {
    id: ConnectionId,
    cancel: CancellationToken,
    registry: Arc<ConnectionRegistry>,
}

impl ConnectionGuard {
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        self.registry.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> Arc<ConnectionRegistry> {
        Arc::new(ConnectionRegistry::new())
    }

    #[tokio::test]
    async fn broadcast_reaches_everybody() {
        let registry = registry();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        let _a = registry.register("a", "Y9", tx_a);
        let _b = registry.register("b", "Y10", tx_b);

        assert_eq!(registry.broadcast(&ServerMessage::Stop), 2);
        assert_eq!(rx_a.recv().await, Some(ServerMessage::Stop));
        assert_eq!(rx_b.recv().await, Some(ServerMessage::Stop));
    }

    #[tokio::test]
    async fn slow_connection_is_dropped_without_blocking_others() {
        let registry = registry();
        let (tx_slow, _rx_slow) = mpsc::channel(1);
        let (tx_fast, mut rx_fast) = mpsc::channel(4);
        let slow = registry.register("slow", "Y9", tx_slow);
        let _fast = registry.register("fast", "Y9", tx_fast);

        assert_eq!(registry.broadcast(&ServerMessage::Stop), 2);
        assert_eq!(registry.broadcast(&ServerMessage::Start), 1);

        assert!(slow.cancellation().is_cancelled());
        assert_eq!(registry.len(), 1);
        assert_eq!(rx_fast.recv().await, Some(ServerMessage::Stop));
        assert_eq!(rx_fast.recv().await, Some(ServerMessage::Start));
    }

    #[tokio::test]
    async fn closed_connection_is_removed() {
        let registry = registry();
        let (tx, rx) = mpsc::channel(1);
        let guard = registry.register("gone", "Y9", tx);
        drop(rx);

        assert_eq!(registry.broadcast(&ServerMessage::Start), 0);
        assert!(guard.cancellation().is_cancelled());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn cancel_all_visits_every_connection() {
        let registry = registry();
        let guards: Vec<_> = (0..10)
            .map(|i| {
                let (tx, _rx) = mpsc::channel(1);
                registry.register(&format!("user{i}"), "Y9", tx)
            })
            .collect();

        assert_eq!(registry.cancel_all(), 10);
        assert!(registry.is_empty());
        assert!(guards.iter().all(|guard| guard.cancellation().is_cancelled()));
        assert_eq!(registry.cancel_all(), 0);
    }

    #[tokio::test]
    async fn dropping_the_guard_unregisters() {
        let registry = registry();
        let (tx, _rx) = mpsc::channel(1);
        let guard = registry.register("a", "Y9", tx);
        let id = guard.id();
        assert_eq!(registry.len(), 1);

        drop(guard);
        assert!(registry.is_empty());
        assert!(!registry.unregister(id));
    }
}
