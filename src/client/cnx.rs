//! The control link: one TCP connection from this process to the manager, carrying every
//! CONNECT / CHANNEL_* / BUFFERED_SEND / DEATH_NOTIFY opcode.

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::{lookup_host, TcpStream};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::{bound, Timeout};
use crate::config::resolve_client_host;
use crate::error::{Error, Result};
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
    ConnectReply,
    ConnectRequest,
    DeathNotifyReply,
    DeathNotifyRequest,
};
use crate::wire::{write_opcode, ChannelName, Id, Opcode};

/// The control-link handle a process holds after [`super::connect`]. All requests over this
/// link are serialised through `stream`'s mutex, since the control link is a single socket
/// shared by every channel lifecycle operation and by `BufferedSend`.
pub struct Cnx {
    stream: Mutex<TcpStream>,
    id: Id,
    local_ip: Ipv4Addr,
    /// Process-unique, used only to key [`super::process_table`]'s per-connection reuse table;
    /// avoids keying on this struct's address, which a later allocation could reuse once this
    /// `Cnx` drops.
    instance_id: u64,
}

static NEXT_CNX_INSTANCE: AtomicU64 = AtomicU64::new(0);

async fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    let mut addrs = lookup_host((host, port))
        .await
        .map_err(|_| Error::HostUnknown(host.to_string()))?;
    addrs.next().ok_or_else(|| Error::HostUnknown(host.to_string()))
}

fn map_connect_err(err: std::io::Error) -> Error {
    match err.kind() {
        std::io::ErrorKind::ConnectionRefused => Error::Refused,
        _ => Error::Io(err),
    }
}

impl Cnx {
    #[instrument(skip(id, timeout), fields(host = host.unwrap_or("<default>")))]
    pub(crate) async fn connect(host: Option<&str>, port: u16, id: &str, timeout: Timeout) -> Result<Self> {
        let host = resolve_client_host(host);
        let addr = resolve(&host, port).await?;

        let stream = bound(timeout, async {
            TcpStream::connect(addr).await.map_err(map_connect_err)
        })
        .await?;
        let mut stream = stream;

        let local_ip = match stream.local_addr()?.ip() {
            std::net::IpAddr::V4(v4) => v4,
            std::net::IpAddr::V6(_) => Ipv4Addr::UNSPECIFIED,
        };

        let id = Id::new(id)?;
        bound(timeout, async {
            write_opcode(&mut stream, Opcode::Connect).await?;
            ConnectRequest { id }.write(&mut stream).await?;
            let reply = ConnectReply::read(&mut stream).await?;
            if !reply.ok {
                return Err(Error::Refused);
            }
            Ok(())
        })
        .await?;

        debug!(%id, %local_ip, "control link established");
        Ok(Self {
            stream: Mutex::new(stream),
            id,
            local_ip,
            instance_id: NEXT_CNX_INSTANCE.fetch_add(1, Ordering::Relaxed),
        })
    }

    pub fn id(&self) -> Id {
        self.id
    }

    pub fn local_ip(&self) -> Ipv4Addr {
        self.local_ip
    }

    pub(crate) fn instance_id(&self) -> u64 {
        self.instance_id
    }

    pub(crate) async fn channel_create(
        &self,
        name: ChannelName,
        owner_port: u16,
        max_buffered: i32,
        timeout: Timeout,
    ) -> Result<ChannelCreateReply> {
        let owner_addr_str = self.local_ip.to_string();
        bound(timeout, async {
            let mut stream = self.stream.lock().await;
            write_opcode(&mut *stream, Opcode::ChannelCreate).await?;
            ChannelCreateRequest {
                id: self.id,
                max_buffered,
                name,
                owner_port,
                owner_addr_str: owner_addr_str.clone(),
            }
            .write(&mut *stream)
            .await?;
            ChannelCreateReply::read(&mut *stream).await
        })
        .await
    }

    pub(crate) async fn channel_delete(&self, name: ChannelName, timeout: Timeout) -> Result<i32> {
        bound(timeout, async {
            let mut stream = self.stream.lock().await;
            write_opcode(&mut *stream, Opcode::ChannelDelete).await?;
            ChannelDeleteRequest { id: self.id, name }.write(&mut *stream).await?;
            Ok(ChannelDeleteReply::read(&mut *stream).await?.n_clients)
        })
        .await
    }

    pub(crate) async fn channel_connect(&self, name: ChannelName, timeout: Timeout) -> Result<ChannelConnectReply> {
        bound(timeout, async {
            let mut stream = self.stream.lock().await;
            write_opcode(&mut *stream, Opcode::ChannelConnect).await?;
            ChannelConnectRequest { id: self.id, name }.write(&mut *stream).await?;
            ChannelConnectReply::read(&mut *stream).await
        })
        .await
    }

    pub(crate) async fn channel_disconnect(&self, name: ChannelName, timeout: Timeout) -> Result<()> {
        bound(timeout, async {
            let mut stream = self.stream.lock().await;
            write_opcode(&mut *stream, Opcode::ChannelDisconnect).await?;
            ChannelDisconnectRequest { id: self.id, name }.write(&mut *stream).await?;
            let reply = ChannelDisconnectReply::read(&mut *stream).await?;
            if !reply.ok {
                return Err(Error::NameMissing(name.as_str()));
            }
            Ok(())
        })
        .await
    }

    /// Submits one BUFFERED_SEND. Blocks only if the manager withholds its reply because the
    /// enqueue hit the channel's configured depth — the manager-side worker does not reply
    /// until it has drained room, so this call's own `timeout` bounds that wait the same way
    /// it bounds any other control-link round trip.
    pub(crate) async fn buffered_send(
        &self,
        user_type: i32,
        payload: &[u8],
        owner_control_sock: i32,
        timeout: Timeout,
    ) -> Result<i32> {
        bound(timeout, async {
            let mut stream = self.stream.lock().await;
            write_opcode(&mut *stream, Opcode::BufferedSend).await?;
            BufferedSendRequest {
                id_from: self.id,
                user_type,
                datalen: payload.len() as i32,
                owner_control_sock,
            }
            .write(&mut *stream)
            .await?;
            crate::wire::io::write_all(&mut *stream, payload).await?;
            let reply = BufferedSendReply::read(&mut *stream).await?;
            if !reply.ok {
                return Err(Error::Protocol("manager refused BUFFERED_SEND".to_string()));
            }
            Ok(reply.nb_buffered)
        })
        .await
    }

    /// `DeathNotify`: toggles whether the manager notifies this control link's owned
    /// channels with `DISMISSED`/`DEATH_PROCESS` when a connected peer dies.
    pub async fn death_notify(&self, enable: bool, timeout: Timeout) -> Result<()> {
        bound(timeout, async {
            let mut stream = self.stream.lock().await;
            write_opcode(&mut *stream, Opcode::DeathNotify).await?;
            DeathNotifyRequest {
                id_from: self.id,
                status: if enable { 1 } else { 0 },
            }
            .write(&mut *stream)
            .await?;
            let reply = DeathNotifyReply::read(&mut *stream).await?;
            if !reply.ok {
                return Err(Error::Protocol("manager refused DEATH_NOTIFY".to_string()));
            }
            Ok(())
        })
        .await
    }
}
