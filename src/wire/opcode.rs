use crate::error::{Error, Result};

/// Manager request opcodes, on-wire as a 32-bit little-endian value. Values match the
/// reference protocol so that this crate's framing remains byte-exact with the service it
/// replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Opcode {
    Connect = 0x0101_0101,
    ChannelCreate = 0x0202_0202,
    ChannelDelete = 0x0303_0303,
    ChannelConnect = 0x0404_0404,
    ChannelDisconnect = 0x0505_0505,
    ChannelPing = 0x0606_0606,
    BufferedSend = 0x0707_0707,
    DeathNotify = 0x0808_0808,
    Sin = 0x0909_0909,
}

impl Opcode {
    pub fn try_from_u32(value: u32) -> Result<Self> {
        Ok(match value {
            0x0101_0101 => Self::Connect,
            0x0202_0202 => Self::ChannelCreate,
            0x0303_0303 => Self::ChannelDelete,
            0x0404_0404 => Self::ChannelConnect,
            0x0505_0505 => Self::ChannelDisconnect,
            0x0606_0606 => Self::ChannelPing,
            0x0707_0707 => Self::BufferedSend,
            0x0808_0808 => Self::DeathNotify,
            0x0909_0909 => Self::Sin,
            other => return Err(Error::Protocol(format!("unknown opcode 0x{:08x}", other))),
        })
    }
}

/// Flags carried in the peer `datasend` header, distinguishing ordinary data frames from the
/// synthetic marker frames the library and manager exchange out of band.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Flag {
    /// An ordinary user payload delivered through Send or BufferedSend.
    Data = 0,
    Connecting = 1,
    Disconnecting = 2,
    Dismissed = 3,
    Timer = 5,
    Buffered = 6,
    Ping = 7,
    DeathProcess = 8,
}

impl Flag {
    pub fn try_from_i32(value: i32) -> Result<Self> {
        Ok(match value {
            0 => Self::Data,
            1 => Self::Connecting,
            2 => Self::Disconnecting,
            3 => Self::Dismissed,
            5 => Self::Timer,
            6 => Self::Buffered,
            7 => Self::Ping,
            8 => Self::DeathProcess,
            other => return Err(Error::Protocol(format!("unknown peer frame flag {}", other))),
        })
    }
}
