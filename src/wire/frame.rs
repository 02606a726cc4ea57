// Peer-to-peer frame shapes: the `datasend` header used for every frame a sender writes
// (ordinary Send/BufferedSend payloads as well as CONNECTING/DISCONNECTING/DISMISSED/TIMER/
// PING/DEATH_PROCESS markers) and the `datareply` header a receiver writes back.

use tokio::io::{AsyncRead, AsyncWrite};

use super::io::{read_fixed, read_i32, read_vec, write_all, write_i32};
use super::opcode::Flag;
use super::types::{Id, ID_FIELD_LEN};
use crate::error::Result;

#[derive(Debug, Clone, Copy)]
pub struct DataSendHeader {
    pub flag: Flag,
    pub id: Id,
    pub user_type: i32,
    pub datalen: i32,
}

impl DataSendHeader {
    pub fn marker(flag: Flag, id: Id) -> Self {
        Self {
            flag,
            id,
            user_type: 0,
            datalen: 0,
        }
    }

    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        write_i32(w, self.flag as i32).await?;
        write_all(w, &self.id.to_wire()).await?;
        write_i32(w, self.user_type).await?;
        write_i32(w, self.datalen).await?;
        Ok(())
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        let flag = Flag::try_from_i32(read_i32(r).await?)?;
        let id = Id::from_wire(read_fixed::<_, ID_FIELD_LEN>(r).await?);
        let user_type = read_i32(r).await?;
        let datalen = read_i32(r).await?;
        Ok(Self {
            flag,
            id,
            user_type,
            datalen,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DataReplyHeader {
    pub id: Id,
    pub answer: i32,
    pub datalen: i32,
}

impl DataReplyHeader {
    pub async fn write<W: AsyncWrite + Unpin>(&self, w: &mut W) -> Result<()> {
        write_all(w, &self.id.to_wire()).await?;
        write_i32(w, self.answer).await?;
        write_i32(w, self.datalen).await?;
        Ok(())
    }

    pub async fn read<R: AsyncRead + Unpin>(r: &mut R) -> Result<Self> {
        let id = Id::from_wire(read_fixed::<_, ID_FIELD_LEN>(r).await?);
        let answer = read_i32(r).await?;
        let datalen = read_i32(r).await?;
        Ok(Self { id, answer, datalen })
    }
}

/// Reads exactly `header.datalen` payload bytes following a `DataSendHeader`.
pub async fn read_send_payload<R: AsyncRead + Unpin>(r: &mut R, header: &DataSendHeader) -> Result<Vec<u8>> {
    read_vec(r, header.datalen as usize).await
}

/// Reads exactly `header.datalen` reply bytes following a `DataReplyHeader`.
pub async fn read_reply_payload<R: AsyncRead + Unpin>(r: &mut R, header: &DataReplyHeader) -> Result<Vec<u8>> {
    read_vec(r, header.datalen as usize).await
}
