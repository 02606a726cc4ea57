//! Shared manager state and the teardown/cleanup routines that operate across both registries.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use super::channel::manager_id;
use super::notify;
use super::registry::{ConnectionId, Registry};
use crate::wire::Flag;

pub struct ManagerState {
    pub registry: Mutex<Registry>,
}

impl ManagerState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            registry: Mutex::new(Registry::new()),
        })
    }
}

/// Destroys a channel: cancels its buffered worker, drops its queued payloads, removes it from
/// the registry. Caller must already hold the registry lock.
pub fn destroy_channel_locked(registry: &mut Registry, name: &str) {
    if let Some(channel) = registry.channels.remove(name) {
        if let Some(handle) = channel.worker {
            handle.abort();
        }
        info!(channel = %name, "channel destroyed");
    }
}

/// Full connection-teardown sequence. Determines, for every channel owner with something to
/// hear about this connection's death, which flags (DISMISSED, DEATH_PROCESS, or both) they're
/// due and in what order, then destroys every channel this connection owned.
///
/// A channel's owner address is only ever reachable through that channel's own listener, so
/// grouping by channel during the single registry scan below is enough to guarantee DISMISSED
/// and DEATH_PROCESS for the same owner land in one `notify_owner_many` call — and therefore
/// over one connection, read by one task on the owner's side — rather than two independently
/// scheduled connections whose relative arrival order isn't guaranteed.
pub async fn teardown_connection(state: &Arc<ManagerState>, connection: ConnectionId) {
    let (dying_id, notifications, owned) = {
        let mut registry = state.registry.lock().await;
        let dying_id = match registry.connections.remove(&connection) {
            Some(record) => record.id,
            None => manager_id(),
        };

        let mut notifications: Vec<(Ipv4Addr, u16, Vec<Flag>)> = Vec::new();
        for channel in registry.channels.values_mut() {
            let before = channel.clients.len();
            channel.clients.retain(|c| *c != connection);
            let dismissed = channel.clients.len() != before;
            let death = channel.notify_on_death && channel.owner != connection;

            let mut flags = Vec::new();
            if dismissed {
                flags.push(Flag::Dismissed);
            }
            if death {
                flags.push(Flag::DeathProcess);
            }
            if !flags.is_empty() {
                notifications.push((channel.owner_addr, channel.owner_port, flags));
            }
        }

        let owned = registry.channels_owned_by(connection);

        (dying_id, notifications, owned)
    };

    for (addr, port, flags) in notifications {
        notify::notify_owner_many(addr, port, &flags, dying_id).await;
    }

    let mut registry = state.registry.lock().await;
    for name in owned {
        destroy_channel_locked(&mut registry, &name);
    }
}
