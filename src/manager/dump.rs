//! Diagnostic dump triggered by SIGUSR1. Renders the same information as the HTTP page, but
//! to the manager's own structured log stream rather than a client socket.

use std::sync::Arc;

use tracing::info;

use super::state::ManagerState;

pub async fn dump_registries(state: &Arc<ManagerState>) {
    let registry = state.registry.lock().await;

    info!(count = registry.connections.len(), "-- connections --");
    for (id, record) in &registry.connections {
        info!(
            connection = %id,
            process_id = %record.id,
            peer = %record.peer_addr,
            since = %record.created_at.to_rfc3339(),
            "connection"
        );
    }

    info!(count = registry.channels.len(), "-- channels --");
    for channel in registry.channels.values() {
        info!(
            name = %channel.name,
            owner = %channel.owner,
            owner_addr = %channel.owner_addr,
            owner_port = channel.owner_port,
            clients = channel.clients.len(),
            queued = channel.buffered_queue.len(),
            max_buffered = channel.max_buffered,
            notify_on_death = channel.notify_on_death,
            since = %channel.created_at.to_rfc3339(),
            "channel"
        );
    }
}
