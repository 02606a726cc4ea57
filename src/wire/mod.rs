//! Byte-exact framing shared by the manager and the client library.
//!
//! Everything here operates over `tokio::io::{AsyncRead, AsyncWrite}` so the same codec
//! serves both the manager's per-connection tasks and the client library's sockets without
//! committing to a particular transport beyond "a byte stream".

pub mod frame;
pub mod io;
pub mod manager_proto;
pub mod opcode;
pub mod types;

pub use opcode::{Flag, Opcode};
pub use types::{ChannelName, Id, ADDR_STR_FIELD_LEN, CHANNEL_NAME_FIELD_LEN, ID_FIELD_LEN};

use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::Result;

/// Reads the 32-bit opcode that precedes every manager request.
pub async fn read_opcode<R: AsyncRead + Unpin>(r: &mut R) -> Result<Opcode> {
    Opcode::try_from_u32(self::io::read_u32(r).await?)
}

/// Writes the 32-bit opcode that precedes every manager request.
pub async fn write_opcode<W: AsyncWrite + Unpin>(w: &mut W, opcode: Opcode) -> Result<()> {
    self::io::write_u32(w, opcode as u32).await
}
