//! Synthesising DISMISSED / DEATH_PROCESS / CONNECTING marker frames toward a channel owner.
//!
//! The manager never holds a persistent socket to a channel owner for these notifications; it
//! opens a short-lived connection, writes a `CONNECTING` marker followed by the notification
//! frame, and closes.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::warn;

use crate::wire::frame::DataSendHeader;
use crate::wire::{Flag, Id};

const NOTIFY_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Best-effort: failures are swallowed, since a failure here means the target is presumed
/// gone and there is nothing to retry against.
///
/// Delivers every flag in `flags`, in order, over a single connection. Callers that need two
/// notifications observed in a specific order by the owner's client library (e.g. DISMISSED
/// before DEATH_PROCESS, per the teardown ordering invariant) must batch them into one call:
/// a second, independently-scheduled connection gives no ordering guarantee relative to the
/// first, since each connection is serviced by its own reader task on the receiving side.
pub async fn notify_owner_many(owner_addr: Ipv4Addr, owner_port: u16, flags: &[Flag], subject_id: Id) {
    if flags.is_empty() {
        return;
    }
    let addr = (owner_addr, owner_port);
    let mut stream = match timeout(NOTIFY_CONNECT_TIMEOUT, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(err)) => {
            warn!(%owner_addr, owner_port, ?flags, error = %err, "could not reach channel owner to deliver notification");
            return;
        },
        Err(_) => {
            warn!(%owner_addr, owner_port, ?flags, "timed out connecting to channel owner");
            return;
        },
    };
    if let Err(err) = DataSendHeader::marker(Flag::Connecting, subject_id).write(&mut stream).await {
        warn!(%owner_addr, owner_port, error = %err, "failed to write CONNECTING marker to channel owner");
        return;
    }
    for flag in flags {
        if let Err(err) = DataSendHeader::marker(*flag, subject_id).write(&mut stream).await {
            warn!(%owner_addr, owner_port, ?flag, error = %err, "failed to deliver notification to channel owner");
            return;
        }
    }
}
