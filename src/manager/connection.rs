//! The manager's per-connection handler task: reads opcodes off one control link until
//! end-of-stream, dispatches each to the registry, and runs the teardown sequence on exit.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use chrono::Utc;
use tokio::net::TcpStream;
use tracing::{debug, info, info_span, warn, Instrument};

use super::channel::{ensure_worker, manager_id};
use super::registry::{BufferedMessage, ChannelRecord, ConnectionRecord};
use super::state::{destroy_channel_locked, teardown_connection, ManagerState};
use crate::error::Result;
use crate::wire::manager_proto::{
    BufferedSendReply,
    BufferedSendRequest,
    ChannelConnectReply,
    ChannelConnectRequest,
    ChannelCreateReply,
    ChannelCreateRequest,
    ChannelDeleteReply,
    ChannelDeleteRequest,
    ChannelDisconnectReply,
    ChannelDisconnectRequest,
    ChannelPingReply,
    ChannelPingRequest,
    ConnectReply,
    ConnectRequest,
    DeathNotifyReply,
    DeathNotifyRequest,
};
use crate::wire::{read_opcode, Id, Opcode};

pub async fn handle_connection(state: Arc<ManagerState>, mut stream: TcpStream, peer_addr: SocketAddr) {
    let connection_id = {
        let mut registry = state.registry.lock().await;
        registry.allocate_connection_id()
    };

    let span = info_span!("control_connection", %peer_addr, connection = %connection_id);
    async {
        loop {
            let opcode = match read_opcode(&mut stream).await {
                Ok(opcode) => opcode,
                Err(err) => {
                    debug!(error = %err, "control link closed");
                    break;
                },
            };
            if let Err(err) = dispatch(&state, &mut stream, connection_id, peer_addr, opcode).await {
                warn!(error = %err, ?opcode, "error handling request, closing control link");
                break;
            }
        }
        teardown_connection(&state, connection_id).await;
        info!("connection torn down");
    }
    .instrument(span)
    .await;
}

async fn dispatch(
    state: &Arc<ManagerState>,
    stream: &mut TcpStream,
    connection_id: super::registry::ConnectionId,
    peer_addr: SocketAddr,
    opcode: Opcode,
) -> Result<()> {
    match opcode {
        Opcode::Connect => handle_connect(state, stream, connection_id, peer_addr).await,
        Opcode::ChannelCreate => handle_channel_create(state, stream, connection_id).await,
        Opcode::ChannelDelete => handle_channel_delete(state, stream).await,
        Opcode::ChannelConnect => handle_channel_connect(state, stream, connection_id).await,
        Opcode::ChannelDisconnect => handle_channel_disconnect(state, stream, connection_id).await,
        Opcode::ChannelPing => handle_channel_ping(stream).await,
        Opcode::BufferedSend => handle_buffered_send(state, stream).await,
        Opcode::DeathNotify => handle_death_notify(state, stream, connection_id).await,
        Opcode::Sin => handle_sin(state, stream).await,
    }
}

async fn handle_connect(
    state: &Arc<ManagerState>,
    stream: &mut TcpStream,
    connection_id: super::registry::ConnectionId,
    peer_addr: SocketAddr,
) -> Result<()> {
    let request = ConnectRequest::read(stream).await?;
    {
        let mut registry = state.registry.lock().await;
        registry.connections.insert(
            connection_id,
            ConnectionRecord {
                id: request.id,
                peer_addr,
                created_at: Utc::now(),
            },
        );
    }
    ConnectReply { ok: true }.write(stream).await
}

fn parse_owner_addr(addr_str: &str, fallback_peer: SocketAddr) -> Ipv4Addr {
    addr_str.parse().unwrap_or_else(|_| match fallback_peer.ip() {
        std::net::IpAddr::V4(v4) => v4,
        std::net::IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
    })
}

async fn handle_channel_create(
    state: &Arc<ManagerState>,
    stream: &mut TcpStream,
    connection_id: super::registry::ConnectionId,
) -> Result<()> {
    let request = ChannelCreateRequest::read(stream).await?;
    let name = request.name.as_str();

    let mut registry = state.registry.lock().await;
    if registry.channels.contains_key(&name) {
        drop(registry);
        return ChannelCreateReply {
            ok: false,
            port: 0,
            addr: Ipv4Addr::UNSPECIFIED,
            addr_str: String::new(),
        }
        .write(stream)
        .await;
    }

    let peer_addr = registry
        .connections
        .get(&connection_id)
        .map(|c| c.peer_addr)
        .unwrap_or_else(|| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)));
    let owner_addr = parse_owner_addr(&request.owner_addr_str, peer_addr);
    let owner_id = registry
        .connections
        .get(&connection_id)
        .map(|c| c.id)
        .unwrap_or_else(|| Id::new("").expect("empty id fits"));

    registry.channels.insert(
        name.clone(),
        ChannelRecord {
            name: name.clone(),
            owner: connection_id,
            owner_id,
            owner_addr,
            owner_port: request.owner_port,
            max_buffered: request.max_buffered,
            buffered_queue: Default::default(),
            clients: Vec::new(),
            notify_on_death: false,
            created_at: Utc::now(),
            work_notify: Arc::new(tokio::sync::Notify::new()),
            space_notify: Arc::new(tokio::sync::Notify::new()),
            worker: None,
        },
    );
    drop(registry);

    info!(channel = %name, "channel created");
    ChannelCreateReply {
        ok: true,
        port: request.owner_port,
        addr: owner_addr,
        addr_str: request.owner_addr_str,
    }
    .write(stream)
    .await
}

async fn handle_channel_delete(state: &Arc<ManagerState>, stream: &mut TcpStream) -> Result<()> {
    let request = ChannelDeleteRequest::read(stream).await?;
    let name = request.name.as_str();

    let mut registry = state.registry.lock().await;
    let n_clients = match registry.channels.get(&name) {
        None => -1,
        Some(channel) if channel.clients.is_empty() => {
            destroy_channel_locked(&mut registry, &name);
            0
        },
        Some(channel) => channel.client_count(),
    };
    drop(registry);

    ChannelDeleteReply { n_clients }.write(stream).await
}

async fn handle_channel_connect(
    state: &Arc<ManagerState>,
    stream: &mut TcpStream,
    connection_id: super::registry::ConnectionId,
) -> Result<()> {
    let request = ChannelConnectRequest::read(stream).await?;
    let name = request.name.as_str();

    let mut registry = state.registry.lock().await;
    let reply = match registry.channels.get_mut(&name) {
        None => ChannelConnectReply {
            ok: false,
            already_connected: false,
            owner_id: Id::new("").expect("empty id fits"),
            port: 0,
            addr: Ipv4Addr::UNSPECIFIED,
            addr_str: String::new(),
            owner_control_sock: -1,
        },
        Some(channel) => {
            let already_connected = channel.clients.contains(&connection_id);
            if !already_connected {
                channel.clients.push(connection_id);
            }
            ChannelConnectReply {
                ok: true,
                already_connected,
                owner_id: channel.owner_id,
                port: channel.owner_port,
                addr: channel.owner_addr,
                addr_str: channel.owner_addr.to_string(),
                owner_control_sock: channel.owner.to_wire(),
            }
        },
    };
    drop(registry);

    reply.write(stream).await
}

async fn handle_channel_disconnect(
    state: &Arc<ManagerState>,
    stream: &mut TcpStream,
    connection_id: super::registry::ConnectionId,
) -> Result<()> {
    let request = ChannelDisconnectRequest::read(stream).await?;
    let name = request.name.as_str();

    let mut registry = state.registry.lock().await;
    let ok = registry.channels.contains_key(&name);
    for channel in registry.channels.values_mut() {
        channel.clients.retain(|c| *c != connection_id);
    }
    drop(registry);

    ChannelDisconnectReply { ok }.write(stream).await
}

async fn handle_channel_ping(stream: &mut TcpStream) -> Result<()> {
    let _request = ChannelPingRequest::read(stream).await?;
    ChannelPingReply { ok: true }.write(stream).await
}

async fn handle_buffered_send(state: &Arc<ManagerState>, stream: &mut TcpStream) -> Result<()> {
    let request = BufferedSendRequest::read(stream).await?;
    let payload = crate::wire::manager_proto::read_payload(stream, request.datalen as usize).await?;
    let owner = super::registry::ConnectionId::from_wire(request.owner_control_sock);

    // max_buffered == 0 means buffered send is forbidden on this channel: reject up front
    // rather than let the producer block on space_notify forever.
    {
        let registry = state.registry.lock().await;
        let channel = registry
            .channels
            .values()
            .find(|c| c.owner == owner)
            .ok_or_else(|| crate::error::Error::NameMissing("<by-control-sock>".to_string()))?;
        if channel.max_buffered <= 0 {
            drop(registry);
            return BufferedSendReply { ok: false, nb_buffered: 0 }.write(stream).await;
        }
    }

    // The space check and the push must happen under the same lock acquisition: splitting
    // them (check, drop lock, re-acquire, push) would let two concurrent BUFFERED_SENDs both
    // observe room for one more message and both push, overrunning `max_buffered`.
    let mut payload = Some(payload);
    let (channel_name, position) = loop {
        let mut registry = state.registry.lock().await;
        let channel = registry
            .channels
            .values_mut()
            .find(|c| c.owner == owner)
            .ok_or_else(|| crate::error::Error::NameMissing("<by-control-sock>".to_string()))?;

        if (channel.buffered_queue.len() as i32) < channel.max_buffered {
            let position = channel.buffered_queue.len() as i32;
            channel.buffered_queue.push_back(BufferedMessage {
                sender_id: request.id_from,
                user_type: request.user_type,
                payload: payload.take().expect("payload consumed exactly once, on the success path"),
            });
            channel.work_notify.notify_waiters();
            break (channel.name.clone(), position);
        }

        // Arm the `Notified` future before dropping the registry lock, not after: the
        // worker also needs this same lock to drain a message and call
        // `notify_waiters()`, so creating the future any later would leave a window
        // where a drain's wakeup lands before we start listening for it and is lost.
        let space_notify = channel.space_notify.clone();
        let notified = space_notify.notified();
        drop(registry);
        notified.await;
    };

    ensure_worker(state.clone(), channel_name).await;

    BufferedSendReply {
        ok: true,
        nb_buffered: position,
    }
    .write(stream)
    .await
}

async fn handle_death_notify(
    state: &Arc<ManagerState>,
    stream: &mut TcpStream,
    connection_id: super::registry::ConnectionId,
) -> Result<()> {
    let request = DeathNotifyRequest::read(stream).await?;
    let enable = request.status != 0;

    let mut registry = state.registry.lock().await;
    for channel in registry.channels.values_mut() {
        if channel.owner == connection_id {
            channel.notify_on_death = enable;
        }
    }
    drop(registry);

    DeathNotifyReply { ok: true }.write(stream).await
}

async fn handle_sin(state: &Arc<ManagerState>, _stream: &mut TcpStream) -> Result<()> {
    super::dump::dump_registries(state).await;
    Ok(())
}

#[allow(dead_code)]
fn manager_marker_id() -> Id {
    manager_id()
}
