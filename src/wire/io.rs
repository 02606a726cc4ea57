// Byte-level primitives shared by every frame reader/writer in this module.
//
// `tokio`'s `AsyncReadExt`/`AsyncWriteExt` already loop internally until a short read/write
// is complete and retry on `EINTR`, so the looping/retry requirement of the wire codec falls
// out of using them directly; the only thing left to do here is turn a reset mid-frame into
// the crate's own `Error::Reset` instead of a bare `io::Error`.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

fn map_io_err(err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::ConnectionReset | io::ErrorKind::UnexpectedEof | io::ErrorKind::BrokenPipe => {
            Error::Reset
        },
        _ => Error::Io(err),
    }
}

pub async fn read_u32<R: AsyncRead + Unpin>(r: &mut R) -> Result<u32> {
    r.read_u32_le().await.map_err(map_io_err)
}

pub async fn write_u32<W: AsyncWrite + Unpin>(w: &mut W, value: u32) -> Result<()> {
    w.write_u32_le(value).await.map_err(map_io_err)
}

pub async fn read_i32<R: AsyncRead + Unpin>(r: &mut R) -> Result<i32> {
    r.read_i32_le().await.map_err(map_io_err)
}

pub async fn write_i32<W: AsyncWrite + Unpin>(w: &mut W, value: i32) -> Result<()> {
    w.write_i32_le(value).await.map_err(map_io_err)
}

pub async fn read_u16<R: AsyncRead + Unpin>(r: &mut R) -> Result<u16> {
    r.read_u16_le().await.map_err(map_io_err)
}

pub async fn write_u16<W: AsyncWrite + Unpin>(w: &mut W, value: u16) -> Result<()> {
    w.write_u16_le(value).await.map_err(map_io_err)
}

pub async fn read_exact<R: AsyncRead + Unpin>(r: &mut R, buf: &mut [u8]) -> Result<()> {
    r.read_exact(buf).await.map_err(map_io_err)?;
    Ok(())
}

pub async fn write_all<W: AsyncWrite + Unpin>(w: &mut W, buf: &[u8]) -> Result<()> {
    w.write_all(buf).await.map_err(map_io_err)
}

pub async fn read_fixed<R: AsyncRead + Unpin, const N: usize>(r: &mut R) -> Result<[u8; N]> {
    let mut raw = [0u8; N];
    read_exact(r, &mut raw).await?;
    Ok(raw)
}

pub async fn read_vec<R: AsyncRead + Unpin>(r: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; len];
    read_exact(r, &mut buf).await?;
    Ok(buf)
}
