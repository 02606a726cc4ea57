//! Per-channel buffered-send worker.
//!
//! Lazily spawned on the first `BUFFERED_SEND` against a channel. Drains the queue one
//! message at a time over a persistent outbound socket to the channel's owner, holding the
//! registry mutex only while snapshotting or mutating the queue, never across the write/ack
//! round trip.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use super::state::ManagerState;
use crate::wire::frame::{DataReplyHeader, DataSendHeader};
use crate::wire::{Flag, Id};

const RECONNECT_BASE_DELAY: Duration = Duration::from_millis(250);
const RECONNECT_JITTER_MS: u64 = 250;

/// Jittered backoff before retrying a failed owner connection, so a channel whose owner is
/// briefly unreachable doesn't hammer it with back-to-back reconnect attempts.
async fn reconnect_backoff() {
    // rand 0.7's `gen_range` takes separate low/high bounds rather than a range literal.
    let jitter = rand::thread_rng().gen_range(0, RECONNECT_JITTER_MS + 1);
    tokio::time::sleep(RECONNECT_BASE_DELAY + Duration::from_millis(jitter)).await;
}

/// Ensures a buffered-send worker is running for `channel_name`, spawning one if this is the
/// first buffered send the channel has seen. Caller must already hold no lock on the registry.
pub async fn ensure_worker(state: Arc<ManagerState>, channel_name: String) {
    let mut registry = state.registry.lock().await;
    let channel = match registry.channels.get_mut(&channel_name) {
        Some(c) => c,
        None => return,
    };
    if channel.worker.is_some() {
        return;
    }
    let work_notify = channel.work_notify.clone();
    let space_notify = channel.space_notify.clone();
    let task_state = state.clone();
    let task_name = channel_name.clone();
    channel.worker = Some(tokio::spawn(async move {
        run(task_state, task_name, work_notify, space_notify).await;
    }));
}

async fn run(
    state: Arc<ManagerState>,
    channel_name: String,
    work_notify: Arc<tokio::sync::Notify>,
    space_notify: Arc<tokio::sync::Notify>,
) {
    let mut outbound: Option<TcpStream> = None;
    'outer: loop {
        // Arm the "more work" wait while still holding the same lock the `None` branch
        // observed an empty queue under, not after releasing it: the producer also takes
        // this lock to push a message and call `work_notify.notify_waiters()`, so creating
        // the `Notified` future any later would leave a window where an enqueue's wakeup
        // lands before we start listening for it and is lost.
        let notified = loop {
            let registry = state.registry.lock().await;
            let channel = match registry.channels.get(&channel_name) {
                Some(c) => c,
                None => return,
            };
            let (owner_addr, owner_port, max_buffered, msg) = match channel.buffered_queue.front() {
                Some(msg) => (channel.owner_addr, channel.owner_port, channel.max_buffered, msg.clone()),
                None => break work_notify.notified(),
            };
            drop(registry);

            if outbound.is_none() {
                match TcpStream::connect((owner_addr, owner_port)).await {
                    Ok(mut stream) => {
                        let marker = DataSendHeader::marker(Flag::Connecting, msg.sender_id);
                        if let Err(err) = marker.write(&mut stream).await {
                            warn!(channel = %channel_name, error = %err, "buffered worker failed opening owner connection, backing off");
                            reconnect_backoff().await;
                            continue;
                        }
                        outbound = Some(stream);
                    },
                    Err(err) => {
                        warn!(channel = %channel_name, error = %err, "buffered worker could not reach channel owner, backing off");
                        reconnect_backoff().await;
                        continue;
                    },
                }
            }

            let stream = outbound.as_mut().expect("just ensured present");
            let header = DataSendHeader {
                flag: Flag::Buffered,
                id: msg.sender_id,
                user_type: msg.user_type,
                datalen: msg.payload.len() as i32,
            };
            let write_result = async {
                header.write(stream).await?;
                crate::wire::io::write_all(stream, &msg.payload).await
            }
            .await;
            if let Err(err) = write_result {
                debug!(channel = %channel_name, error = %err, "buffered worker lost connection to owner, reconnecting");
                outbound = None;
                reconnect_backoff().await;
                continue;
            }

            match DataReplyHeader::read(stream).await {
                Ok(_ack) => {},
                Err(err) => {
                    debug!(channel = %channel_name, error = %err, "buffered worker did not receive ack, reconnecting");
                    outbound = None;
                    reconnect_backoff().await;
                    continue;
                },
            }

            let mut registry = state.registry.lock().await;
            let channel = match registry.channels.get_mut(&channel_name) {
                Some(c) => c,
                None => return,
            };
            channel.buffered_queue.pop_front();
            let depth = channel.buffered_queue.len() as i32;
            if depth == max_buffered - 1 {
                space_notify.notify_waiters();
            }
        };
        notified.await;
        // A channel destroyed while the worker slept is detected on the next snapshot above.
        if !state.registry.lock().await.channels.contains_key(&channel_name) {
            break 'outer;
        }
    }
}

/// Identifier the manager uses when acting as the sender of its own marker frames.
pub fn manager_id() -> Id {
    Id::new("mgr").expect("'mgr' fits the 8-byte id field")
}
