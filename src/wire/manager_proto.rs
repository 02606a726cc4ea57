// Fixed request/reply struct shapes for each manager opcode.
// Field order and width mirror `messip_private.h`'s structs so the framing is byte-exact.

use std::net::Ipv4Addr;

use tokio::io::{AsyncRead, AsyncWrite};

use super::io::{read_exact, read_fixed, read_i32, read_u16, write_all, write_i32, write_u16};
use super::types::{
    decode_addr_str,
    encode_addr_str,
    ChannelName,
    Id,
    ADDR_STR_FIELD_LEN,
    CHANNEL_NAME_FIELD_LEN,
    ID_FIELD_LEN,
};
use crate::error::Result;

async fn write_bool<W: AsyncWrite + Unpin>(w: &mut W, ok: bool) -> Result<()> {
    write_i32(w, if ok { 1 } else { 0 }).await
}

async fn read_bool<R: AsyncRead + Unpin>(r: &mut R) -> Result<bool> {
    Ok(read_i32(r).await? != 0)
}

async fn write_name<W: AsyncWrite + Unpin>(w: &mut W, name: ChannelName) -> Result<()> {
    write_all(w, &name.to_wire()).await
}

async fn read_name<R: AsyncRead + Unpin>(r: &mut R) -> Result<ChannelName> {
    Ok(ChannelName::from_wire(read_fixed::<_, CHANNEL_NAME_FIELD_LEN>(r).await?))
}

async fn write_addr_str<W: AsyncWrite + Unpin>(w: &mut W, addr: Ipv4Addr) -> Result<()> {
    write_all(w, &encode_addr_str(addr)).await
}

async fn read_addr_str<R: AsyncRead + Unpin>(r: &mut R) -> Result<String> {
    let raw = read_fixed::<_, ADDR_STR_FIELD_LEN>(r).await?;
    Ok(decode_addr_str(&raw))
}

async fn write_id<W: AsyncWrite + Unpin>(w: &mut W, id: Id) -> Result<()> {
    write_all(w, &id.to_wire()).await
}

async fn read_id<R: AsyncRead + Unpin>(r: &mut R) -> Result<Id> {
    Ok(Id::from_wire(read_fixed::<_, ID_FIELD_LEN>(r).await?))
}

macro_rules! io_struct {
    ($name:ident { $($field:ident : $ty:ty),* $(,)? }) => {
        #[derive(Debug, Clone)]
        pub struct $name {
            $(pub $field: $ty,)*
        }
    };
}

io_struct!(ConnectRequest { id: Id });
io_struct!(ConnectReply { ok: bool });

impl ConnectRequest {
    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        write_id(w, self.id).await
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        Ok(Self { id: read_id(r).await? })
    }
}

impl ConnectReply {
    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        write_bool(w, self.ok).await
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        Ok(Self { ok: read_bool(r).await? })
    }
}

io_struct!(ChannelCreateRequest {
    id: Id,
    max_buffered: i32,
    name: ChannelName,
    owner_port: u16,
    owner_addr_str: String,
});
io_struct!(ChannelCreateReply {
    ok: bool,
    port: u16,
    addr: Ipv4Addr,
    addr_str: String,
});

impl ChannelCreateRequest {
    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        write_id(w, self.id).await?;
        write_i32(w, self.max_buffered).await?;
        write_name(w, self.name).await?;
        write_u16(w, self.owner_port).await?;
        let mut raw = [0u8; ADDR_STR_FIELD_LEN];
        let bytes = self.owner_addr_str.as_bytes();
        let n = bytes.len().min(ADDR_STR_FIELD_LEN - 1);
        raw[..n].copy_from_slice(&bytes[..n]);
        write_all(w, &raw).await
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        let id = read_id(r).await?;
        let max_buffered = read_i32(r).await?;
        let name = read_name(r).await?;
        let owner_port = read_u16(r).await?;
        let owner_addr_str = read_addr_str(r).await?;
        Ok(Self {
            id,
            max_buffered,
            name,
            owner_port,
            owner_addr_str,
        })
    }
}

impl ChannelCreateReply {
    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        write_bool(w, self.ok).await?;
        write_u16(w, self.port).await?;
        let octets = self.addr.octets();
        write_all(w, &octets).await?;
        write_addr_str(w, self.addr).await
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        let ok = read_bool(r).await?;
        let port = read_u16(r).await?;
        let octets = read_fixed::<_, 4>(r).await?;
        let addr = Ipv4Addr::from(octets);
        let addr_str = read_addr_str(r).await?;
        Ok(Self { ok, port, addr, addr_str })
    }
}

io_struct!(ChannelDeleteRequest { id: Id, name: ChannelName });
io_struct!(ChannelDeleteReply { n_clients: i32 });

impl ChannelDeleteRequest {
    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        write_id(w, self.id).await?;
        write_name(w, self.name).await
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        Ok(Self {
            id: read_id(r).await?,
            name: read_name(r).await?,
        })
    }
}

impl ChannelDeleteReply {
    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        write_i32(w, self.n_clients).await
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        Ok(Self {
            n_clients: read_i32(r).await?,
        })
    }
}

io_struct!(ChannelConnectRequest { id: Id, name: ChannelName });
io_struct!(ChannelConnectReply {
    ok: bool,
    already_connected: bool,
    owner_id: Id,
    port: u16,
    addr: Ipv4Addr,
    addr_str: String,
    owner_control_sock: i32,
});

impl ChannelConnectRequest {
    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        write_id(w, self.id).await?;
        write_name(w, self.name).await
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        Ok(Self {
            id: read_id(r).await?,
            name: read_name(r).await?,
        })
    }
}

impl ChannelConnectReply {
    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        write_bool(w, self.ok).await?;
        write_bool(w, self.already_connected).await?;
        write_id(w, self.owner_id).await?;
        write_u16(w, self.port).await?;
        write_all(w, &self.addr.octets()).await?;
        write_addr_str(w, self.addr).await?;
        write_i32(w, self.owner_control_sock).await
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        let ok = read_bool(r).await?;
        let already_connected = read_bool(r).await?;
        let owner_id = read_id(r).await?;
        let port = read_u16(r).await?;
        let octets = read_fixed::<_, 4>(r).await?;
        let addr = Ipv4Addr::from(octets);
        let addr_str = read_addr_str(r).await?;
        let owner_control_sock = read_i32(r).await?;
        Ok(Self {
            ok,
            already_connected,
            owner_id,
            port,
            addr,
            addr_str,
            owner_control_sock,
        })
    }
}

io_struct!(ChannelDisconnectRequest { id: Id, name: ChannelName });
io_struct!(ChannelDisconnectReply { ok: bool });

impl ChannelDisconnectRequest {
    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        write_id(w, self.id).await?;
        write_name(w, self.name).await
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        Ok(Self {
            id: read_id(r).await?,
            name: read_name(r).await?,
        })
    }
}

impl ChannelDisconnectReply {
    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        write_bool(w, self.ok).await
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        Ok(Self { ok: read_bool(r).await? })
    }
}

io_struct!(ChannelPingRequest { id: Id });
io_struct!(ChannelPingReply { ok: bool });

impl ChannelPingRequest {
    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        write_id(w, self.id).await
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        Ok(Self { id: read_id(r).await? })
    }
}

impl ChannelPingReply {
    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        write_bool(w, self.ok).await
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        Ok(Self { ok: read_bool(r).await? })
    }
}

io_struct!(BufferedSendRequest {
    id_from: Id,
    user_type: i32,
    datalen: i32,
    owner_control_sock: i32,
});
io_struct!(BufferedSendReply { ok: bool, nb_buffered: i32 });

impl BufferedSendRequest {
    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        write_id(w, self.id_from).await?;
        write_i32(w, self.user_type).await?;
        write_i32(w, self.datalen).await?;
        write_i32(w, self.owner_control_sock).await
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        Ok(Self {
            id_from: read_id(r).await?,
            user_type: read_i32(r).await?,
            datalen: read_i32(r).await?,
            owner_control_sock: read_i32(r).await?,
        })
    }
}

impl BufferedSendReply {
    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        write_bool(w, self.ok).await?;
        write_i32(w, self.nb_buffered).await
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        Ok(Self {
            ok: read_bool(r).await?,
            nb_buffered: read_i32(r).await?,
        })
    }
}

/// Canonical field order `(id_from, status)`.
io_struct!(DeathNotifyRequest { id_from: Id, status: i32 });
io_struct!(DeathNotifyReply { ok: bool });

impl DeathNotifyRequest {
    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        write_id(w, self.id_from).await?;
        write_i32(w, self.status).await
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        Ok(Self {
            id_from: read_id(r).await?,
            status: read_i32(r).await?,
        })
    }
}

impl DeathNotifyReply {
    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        write_bool(w, self.ok).await
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        Ok(Self { ok: read_bool(r).await? })
    }
}

/// Reads a payload of `len` bytes following a manager request (used only by `BUFFERED_SEND`,
/// the one opcode whose request carries a trailing payload).
pub async fn read_payload<R: AsyncRead + Unpin>(r: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    read_exact(r, &mut buf).await?;
    Ok(buf)
}
