use super::channel::{Channel, ConnectionId};
use crate::metrics;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;
use uuid::Uuid;

/// Serialized outbound frames for one connection
pub type OutboundSender = UnboundedSender<String>;

/// What remained of a connection after it was deregistered
#[derive(Debug, Clone)]
pub struct Departure {
    pub user_id: Uuid,
    /// Channels the connection had joined, private channel included
    pub channels: Vec<Channel>,
    /// True when this was the user's last connection
    pub went_offline: bool,
}

/// Run-time view of live connections and their channel memberships.
///
/// Components only talk to presence through this trait, so a multi-process
/// deployment can swap in a registry backed by a shared store.
#[async_trait]
pub trait PresenceRegistry: Send + Sync {
    /// Add a connection for an already verified user. Returns true when this is
    /// the user's first live connection.
    async fn register(&self, connection: ConnectionId, user_id: Uuid, sender: OutboundSender)
        -> bool;

    async fn deregister(&self, connection: ConnectionId) -> Option<Departure>;

    /// Idempotent. Returns true if the membership was newly added.
    async fn join_channel(&self, connection: ConnectionId, channel: Channel) -> bool;

    /// Idempotent. Returns true if the membership existed.
    async fn leave_channel(&self, connection: ConnectionId, channel: Channel) -> bool;

    async fn is_online(&self, user_id: Uuid) -> bool;

    async fn connections_for(&self, user_id: Uuid) -> HashSet<ConnectionId>;

    async fn user_of(&self, connection: ConnectionId) -> Option<Uuid>;

    async fn send_to_connection(&self, connection: ConnectionId, payload: &str) -> bool;

    /// Returns the number of connections the payload was handed to.
    async fn send_to_channel(
        &self,
        channel: Channel,
        payload: &str,
        except: Option<ConnectionId>,
    ) -> usize;

    /// Every live connection, optionally skipping one.
    async fn broadcast(&self, payload: &str, except: Option<ConnectionId>) -> usize;

    fn connection_count(&self) -> usize;

    fn online_user_count(&self) -> usize;
}

struct ConnectionEntry {
    user_id: Uuid,
    channels: HashSet<Channel>,
    sender: OutboundSender,
}

impl ConnectionEntry {
    fn push(&self, connection: ConnectionId, payload: &str) -> bool {
        let ok = self.sender.send(payload.to_string()).is_ok();
        if !ok {
            debug!(connection_id = %connection, "outbound channel closed, frame dropped");
        }
        ok
    }
}

/// Single-process registry on sharded concurrent maps.
///
/// Lock order: a `connections` guard may be held while touching `channels` or
/// `users`, never the reverse.
#[derive(Default)]
pub struct InMemoryPresenceRegistry {
    connections: DashMap<ConnectionId, ConnectionEntry>,
    users: DashMap<Uuid, HashSet<ConnectionId>>,
    channels: DashMap<Channel, HashSet<ConnectionId>>,
}

impl InMemoryPresenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn members_of(&self, channel: &Channel) -> Vec<ConnectionId> {
        self.channels
            .get(channel)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl PresenceRegistry for InMemoryPresenceRegistry {
    async fn register(
        &self,
        connection: ConnectionId,
        user_id: Uuid,
        sender: OutboundSender,
    ) -> bool {
        let private = Channel::User(user_id);
        let mut channels = HashSet::new();
        channels.insert(private);

        if self.connections.contains_key(&connection) {
            return false;
        }
        self.connections.insert(
            connection,
            ConnectionEntry {
                user_id,
                channels,
                sender,
            },
        );
        self.channels.entry(private).or_default().insert(connection);

        let first = {
            let mut conns = self.users.entry(user_id).or_default();
            let first = conns.is_empty();
            conns.insert(connection);
            first
        };

        metrics::WS_CONNECTIONS.inc();
        if first {
            metrics::ONLINE_USERS.inc();
        }
        debug!(
            connection_id = %connection,
            user_id = %user_id,
            first_connection = first,
            "connection registered"
        );
        first
    }

    async fn deregister(&self, connection: ConnectionId) -> Option<Departure> {
        let (_, entry) = self.connections.remove(&connection)?;

        for channel in &entry.channels {
            if let Some(mut members) = self.channels.get_mut(channel) {
                members.remove(&connection);
            }
            self.channels.remove_if(channel, |_, members| members.is_empty());
        }

        // Removal and the emptiness check share one entry guard so a concurrent
        // register cannot observe the set in between.
        let went_offline = match self.users.entry(entry.user_id) {
            Entry::Occupied(mut slot) => {
                slot.get_mut().remove(&connection);
                if slot.get().is_empty() {
                    slot.remove();
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => false,
        };

        metrics::WS_CONNECTIONS.dec();
        if went_offline {
            metrics::ONLINE_USERS.dec();
        }
        debug!(
            connection_id = %connection,
            user_id = %entry.user_id,
            went_offline,
            "connection deregistered"
        );

        Some(Departure {
            user_id: entry.user_id,
            channels: entry.channels.into_iter().collect(),
            went_offline,
        })
    }

    async fn join_channel(&self, connection: ConnectionId, channel: Channel) -> bool {
        let Some(mut entry) = self.connections.get_mut(&connection) else {
            return false;
        };
        if !entry.channels.insert(channel) {
            return false;
        }
        self.channels.entry(channel).or_default().insert(connection);
        true
    }

    async fn leave_channel(&self, connection: ConnectionId, channel: Channel) -> bool {
        let Some(mut entry) = self.connections.get_mut(&connection) else {
            return false;
        };
        // The private channel lives as long as the connection.
        if channel == Channel::User(entry.user_id) || !entry.channels.remove(&channel) {
            return false;
        }
        if let Some(mut members) = self.channels.get_mut(&channel) {
            members.remove(&connection);
        }
        self.channels.remove_if(&channel, |_, members| members.is_empty());
        true
    }

    async fn is_online(&self, user_id: Uuid) -> bool {
        self.users
            .get(&user_id)
            .map(|conns| !conns.is_empty())
            .unwrap_or(false)
    }

    async fn connections_for(&self, user_id: Uuid) -> HashSet<ConnectionId> {
        self.users
            .get(&user_id)
            .map(|conns| conns.clone())
            .unwrap_or_default()
    }

    async fn user_of(&self, connection: ConnectionId) -> Option<Uuid> {
        self.connections.get(&connection).map(|e| e.user_id)
    }

    async fn send_to_connection(&self, connection: ConnectionId, payload: &str) -> bool {
        self.connections
            .get(&connection)
            .map(|entry| entry.push(connection, payload))
            .unwrap_or(false)
    }

    async fn send_to_channel(
        &self,
        channel: Channel,
        payload: &str,
        except: Option<ConnectionId>,
    ) -> usize {
        let mut delivered = 0;
        for connection in self.members_of(&channel) {
            if Some(connection) == except {
                continue;
            }
            if let Some(entry) = self.connections.get(&connection) {
                if entry.push(connection, payload) {
                    delivered += 1;
                }
            }
        }
        delivered
    }

    async fn broadcast(&self, payload: &str, except: Option<ConnectionId>) -> usize {
        self.connections
            .iter()
            .filter(|entry| Some(*entry.key()) != except)
            .filter(|entry| entry.value().push(*entry.key(), payload))
            .count()
    }

    fn connection_count(&self) -> usize {
        self.connections.len()
    }

    fn online_user_count(&self) -> usize {
        self.users.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

    async fn connect(
        registry: &InMemoryPresenceRegistry,
        user_id: Uuid,
    ) -> (ConnectionId, UnboundedReceiver<String>, bool) {
        let (tx, rx) = unbounded_channel();
        let conn = ConnectionId::new();
        let first = registry.register(conn, user_id, tx).await;
        (conn, rx, first)
    }

    #[tokio::test]
    async fn test_online_is_union_of_connections() {
        let registry = InMemoryPresenceRegistry::new();
        let user = Uuid::new_v4();

        let (c1, _rx1, first1) = connect(&registry, user).await;
        let (c2, _rx2, first2) = connect(&registry, user).await;
        assert!(first1);
        assert!(!first2);
        assert!(registry.is_online(user).await);
        assert_eq!(registry.connections_for(user).await.len(), 2);

        let d1 = registry.deregister(c1).await.unwrap();
        assert!(!d1.went_offline);
        assert!(registry.is_online(user).await);

        let d2 = registry.deregister(c2).await.unwrap();
        assert!(d2.went_offline);
        assert!(!registry.is_online(user).await);
        assert!(registry.deregister(c2).await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_online_gauge_balances_under_reconnect_churn() {
        let registry = std::sync::Arc::new(InMemoryPresenceRegistry::new());
        let user = Uuid::new_v4();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let mut firsts = 0i32;
                    let mut lasts = 0i32;
                    for _ in 0..200 {
                        let (tx, _rx) = unbounded_channel();
                        let conn = ConnectionId::new();
                        if registry.register(conn, user, tx).await {
                            firsts += 1;
                        }
                        if registry.deregister(conn).await.unwrap().went_offline {
                            lasts += 1;
                        }
                    }
                    (firsts, lasts)
                })
            })
            .collect();

        let (mut firsts, mut lasts) = (0, 0);
        for handle in handles {
            let (f, l) = handle.await.unwrap();
            firsts += f;
            lasts += l;
        }
        assert_eq!(firsts, lasts, "every first connection pairs with a last one");
        assert!(!registry.is_online(user).await);
        assert_eq!(registry.online_user_count(), 0);
    }

    #[tokio::test]
    async fn test_join_and_leave_are_idempotent() {
        let registry = InMemoryPresenceRegistry::new();
        let (conn, _rx, _) = connect(&registry, Uuid::new_v4()).await;
        let channel = Channel::Conversation(Uuid::new_v4());

        assert!(registry.join_channel(conn, channel).await);
        assert!(!registry.join_channel(conn, channel).await);
        assert!(registry.leave_channel(conn, channel).await);
        assert!(!registry.leave_channel(conn, channel).await);
    }

    #[tokio::test]
    async fn test_cannot_leave_private_channel() {
        let registry = InMemoryPresenceRegistry::new();
        let user = Uuid::new_v4();
        let (conn, mut rx, _) = connect(&registry, user).await;

        assert!(!registry.leave_channel(conn, Channel::User(user)).await);
        assert_eq!(
            registry
                .send_to_channel(Channel::User(user), "hello", None)
                .await,
            1
        );
        assert_eq!(rx.recv().await.as_deref(), Some("hello"));
    }

    #[tokio::test]
    async fn test_channel_send_skips_excluded_connection() {
        let registry = InMemoryPresenceRegistry::new();
        let channel = Channel::Conversation(Uuid::new_v4());
        let (a, mut rx_a, _) = connect(&registry, Uuid::new_v4()).await;
        let (b, mut rx_b, _) = connect(&registry, Uuid::new_v4()).await;
        registry.join_channel(a, channel).await;
        registry.join_channel(b, channel).await;

        assert_eq!(registry.send_to_channel(channel, "typing", Some(a)).await, 1);
        assert_eq!(rx_b.recv().await.as_deref(), Some("typing"));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_deregister_cleans_channel_membership() {
        let registry = InMemoryPresenceRegistry::new();
        let channel = Channel::Conversation(Uuid::new_v4());
        let (conn, _rx, _) = connect(&registry, Uuid::new_v4()).await;
        registry.join_channel(conn, channel).await;

        let departure = registry.deregister(conn).await.unwrap();
        assert!(departure.channels.contains(&channel));
        assert_eq!(registry.send_to_channel(channel, "x", None).await, 0);
        assert_eq!(registry.connection_count(), 0);
        assert_eq!(registry.online_user_count(), 0);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_everyone_but_origin() {
        let registry = InMemoryPresenceRegistry::new();
        let (a, mut rx_a, _) = connect(&registry, Uuid::new_v4()).await;
        let (_b, mut rx_b, _) = connect(&registry, Uuid::new_v4()).await;
        let (_c, mut rx_c, _) = connect(&registry, Uuid::new_v4()).await;

        assert_eq!(registry.broadcast("online", Some(a)).await, 2);
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.recv().await.as_deref(), Some("online"));
        assert_eq!(rx_c.recv().await.as_deref(), Some("online"));
    }
}
