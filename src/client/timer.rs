//! Timer support. A timer's expiry handler opens a short-lived outbound connection to the
//! channel's owner and writes a `TIMER` marker frame carrying the user type, which the owner's
//! ordinary accept loop then
//! delivers through [`super::channel::ReceiveOutcome::Timer`] exactly like any other peer
//! frame — no separate signalling path is needed.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::TcpStream;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::debug;

use crate::wire::frame::DataSendHeader;
use crate::wire::{Flag, Id};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Default)]
pub(crate) struct TimerTable {
    next_id: AtomicU64,
    timers: AsyncMutex<HashMap<TimerId, JoinHandle<()>>>,
}

impl TimerTable {
    pub(crate) async fn create(
        &self,
        owner_addr: Ipv4Addr,
        owner_port: u16,
        sender_id: Id,
        user_type: i32,
        first_ms: u64,
        repeat_ms: u64,
    ) -> TimerId {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = tokio::spawn(run(owner_addr, owner_port, sender_id, user_type, first_ms, repeat_ms));
        self.timers.lock().await.insert(id, handle);
        id
    }

    /// Idempotent against an already-fired one-shot: a missing id is simply a no-op.
    pub(crate) async fn delete(&self, id: TimerId) {
        if let Some(handle) = self.timers.lock().await.remove(&id) {
            handle.abort();
        }
    }

    pub(crate) async fn cancel_all(&self) {
        let mut timers = self.timers.lock().await;
        for (_, handle) in timers.drain() {
            handle.abort();
        }
    }

    /// Best-effort synchronous cancellation for use from `Drop`, which cannot await. Leaves
    /// timers alone if the table happens to be locked at the moment of drop; orphaned timer
    /// tasks hold no reference back to the channel and exit harmlessly on their own schedule.
    pub(crate) fn try_cancel_all(&self) {
        if let Ok(mut timers) = self.timers.try_lock() {
            for (_, handle) in timers.drain() {
                handle.abort();
            }
        }
    }
}

async fn run(owner_addr: Ipv4Addr, owner_port: u16, sender_id: Id, user_type: i32, first_ms: u64, repeat_ms: u64) {
    tokio::time::sleep(Duration::from_millis(first_ms)).await;
    loop {
        fire(owner_addr, owner_port, sender_id, user_type).await;
        if repeat_ms == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(repeat_ms)).await;
    }
}

async fn fire(owner_addr: Ipv4Addr, owner_port: u16, sender_id: Id, user_type: i32) {
    let stream = match TcpStream::connect((owner_addr, owner_port)).await {
        Ok(stream) => stream,
        Err(err) => {
            debug!(%owner_addr, owner_port, error = %err, "timer could not reach channel owner");
            return;
        },
    };
    let mut stream = stream;
    if let Err(err) = DataSendHeader::marker(Flag::Connecting, sender_id).write(&mut stream).await {
        debug!(error = %err, "timer failed writing CONNECTING marker");
        return;
    }
    let mut marker = DataSendHeader::marker(Flag::Timer, sender_id);
    marker.user_type = user_type;
    if let Err(err) = marker.write(&mut stream).await {
        debug!(error = %err, "timer failed writing TIMER marker");
    }
}
