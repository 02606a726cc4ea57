//! The manager's two in-memory registries, guarded by a single process-wide mutex.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::wire::Id;

/// Stable key for a control connection. Doubles as the wire-level `owner_control_sock` /
/// `mgr_sockfd` value: a monotonically allocated index standing in for a raw socket fd, so
/// identity stays stable across table growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    pub fn to_wire(self) -> i32 {
        self.0 as i32
    }

    pub fn from_wire(value: i32) -> Self {
        Self(value as u64)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct ConnectionRecord {
    pub id: Id,
    pub peer_addr: std::net::SocketAddr,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct BufferedMessage {
    pub sender_id: Id,
    pub user_type: i32,
    pub payload: Vec<u8>,
}

pub struct ChannelRecord {
    pub name: String,
    pub owner: ConnectionId,
    pub owner_id: Id,
    pub owner_addr: Ipv4Addr,
    pub owner_port: u16,
    pub max_buffered: i32,
    pub buffered_queue: VecDeque<BufferedMessage>,
    pub clients: Vec<ConnectionId>,
    pub notify_on_death: bool,
    pub created_at: DateTime<Utc>,
    /// Signalled every time a message is enqueued; wakes the lazily spawned buffered worker.
    pub work_notify: Arc<Notify>,
    /// Signalled every time the worker drains a message; wakes producers blocked at depth N.
    pub space_notify: Arc<Notify>,
    pub worker: Option<JoinHandle<()>>,
}

impl ChannelRecord {
    pub fn client_count(&self) -> i32 {
        self.clients.len() as i32
    }
}

/// Holds both tables; callers take the manager's one `tokio::sync::Mutex<Registry>` for the
/// duration of any structural change.
#[derive(Default)]
pub struct Registry {
    pub connections: HashMap<ConnectionId, ConnectionRecord>,
    pub channels: HashMap<String, ChannelRecord>,
    next_connection_id: u64,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_connection_id(&mut self) -> ConnectionId {
        let id = ConnectionId(self.next_connection_id);
        self.next_connection_id += 1;
        id
    }

    /// Channels owned by `owner`, most useful for DEATH_NOTIFY fan-out scoping and connection
    /// teardown.
    pub fn channels_owned_by(&self, owner: ConnectionId) -> Vec<String> {
        self.channels
            .values()
            .filter(|c| c.owner == owner)
            .map(|c| c.name.clone())
            .collect()
    }
}
