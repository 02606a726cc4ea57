//! Channel handles: the *owned* variant backs a listener this process accepted
//! `CHANNEL_CREATE` for, the *connected* variant backs an outbound socket opened after
//! `CHANNEL_CONNECT`. Both share the timer machinery; only the owned variant has a reply-slot
//! table, since only a channel owner ever calls `Receive`.

use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::cnx::Cnx;
use super::process_table;
use super::reply_slot::{ReplySlot, SlotTable};
use super::timer::{TimerId, TimerTable};
use super::{bound, Timeout};
use crate::error::{Error, Result};
use crate::wire::frame::{DataReplyHeader, DataSendHeader};
use crate::wire::io::{read_exact, read_u32, write_all, write_u32};
use crate::wire::{ChannelName, Flag, Id};

/// Discriminates the two ways `Receive` and `Send` may be asked to hand back a payload: a
/// caller-owned fixed buffer, or a freshly allocated one sized to fit. `Send` wires `Dynamic`
/// as `reply_maxlen == 0`, per SPEC_FULL.md §4.1.1/§4.3.
pub enum RecvBuf<'a> {
    /// Fill this buffer, up to its length. For `Receive`, anything beyond that is truncated
    /// into the reply slot's spill buffer (retrievable via [`OwnedChannel::take_overflow`]
    /// until `Reply`); for `Send`, the remainder of an over-length reply is read off the wire
    /// and discarded — `Send` does not preserve overflow the way `Receive` does.
    Fixed(&'a mut [u8]),
    /// Allocate and return an exact-size buffer holding the whole payload.
    Dynamic,
}

/// Result of [`ConnectedChannel::send`]: the peer's `Reply` answer code, how many bytes of
/// the reply payload came back, and — for [`RecvBuf::Dynamic`] — the owned buffer holding it.
pub struct SendReply {
    pub answer: i32,
    pub filled: usize,
    pub owned: Option<Vec<u8>>,
}

/// A received, not-yet-replied-to message: the index is opaque, valid only for this channel,
/// and must be consumed by [`OwnedChannel::reply`] before the channel is destroyed.
#[derive(Debug)]
pub struct ReceivedMessage {
    pub index: usize,
    pub sender_id: Id,
    pub user_type: i32,
    /// Bytes written into the caller's [`RecvBuf::Fixed`] buffer, or the full length when
    /// [`RecvBuf::Dynamic`] was requested.
    pub filled: usize,
    /// Present only for [`RecvBuf::Dynamic`] receives: the library-owned buffer holding the
    /// whole payload.
    pub owned: Option<Vec<u8>>,
}

/// `Receive`'s result, modelled as a proper enum rather than negative-integer sentinels.
#[derive(Debug)]
pub enum ReceiveOutcome {
    Message(ReceivedMessage),
    /// A buffered delivery: already acknowledged internally, no `Reply` needed.
    NoReply,
    Disconnect,
    Dismissed,
    Timer { user_type: i32 },
    DeathProcess,
}

pub(crate) enum Event {
    Data {
        writer: Arc<AsyncMutex<OwnedWriteHalf>>,
        sender_id: Id,
        user_type: i32,
        payload: Vec<u8>,
    },
    Buffered {
        writer: Arc<AsyncMutex<OwnedWriteHalf>>,
        user_type: i32,
        sender_id: Id,
        payload: Vec<u8>,
    },
    Disconnect,
    Dismissed,
    DeathProcess,
    Timer {
        user_type: i32,
    },
}

/// Either variant of a client-side channel handle.
pub enum Channel {
    Owned(Arc<OwnedChannel>),
    Connected(Arc<ConnectedChannel>),
}

impl Channel {
    /// `ChannelCreate`: binds a fresh ephemeral listener, then registers it
    /// with the manager. Fails with [`Error::NameTaken`] if the manager reports `ok = false`.
    pub async fn create(cnx: Arc<Cnx>, name: &str, timeout: Timeout, max_buffered: i32) -> Result<Arc<OwnedChannel>> {
        let channel_name = ChannelName::new(name)?;
        let listener = TcpListener::bind((cnx.local_ip(), 0)).await?;
        let listen_port = listener.local_addr()?.port();

        let reply = cnx.channel_create(channel_name, listen_port, max_buffered, timeout).await?;
        if !reply.ok {
            return Err(Error::NameTaken(name.to_string()));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let self_id = cnx.id();
        let accept_task = tokio::spawn(accept_loop(listener, events_tx.clone(), self_id));

        Ok(Arc::new(OwnedChannel {
            name: channel_name,
            cnx,
            owner_addr: reply.addr,
            owner_port: reply.port,
            accept_task,
            events_tx,
            events_rx: AsyncMutex::new(events_rx),
            reply_slots: AsyncMutex::new(SlotTable::default()),
            timers: TimerTable::default(),
        }))
    }

    /// `ChannelConnect`: locates the channel through the manager, reusing a
    /// previously opened outbound socket for this name in this process if the manager reports
    /// `already_connected`, otherwise opening a fresh one and sending the `CONNECTING` marker.
    pub async fn connect(cnx: Arc<Cnx>, name: &str, timeout: Timeout) -> Result<Arc<ConnectedChannel>> {
        if let Some(existing) = process_table::lookup(&cnx, name).await {
            return Ok(existing);
        }

        let channel_name = ChannelName::new(name)?;
        let reply = cnx.channel_connect(channel_name, timeout).await?;
        if !reply.ok {
            return Err(Error::NameMissing(name.to_string()));
        }

        if reply.already_connected {
            if let Some(existing) = process_table::lookup(&cnx, name).await {
                return Ok(existing);
            }
            debug!(channel = name, "manager reports already_connected but no local socket; opening a new one");
        }

        let peer = bound(timeout, async { TcpStream::connect((reply.addr, reply.port)).await.map_err(Error::Io) }).await?;
        let mut peer = peer;
        DataSendHeader::marker(Flag::Connecting, cnx.id()).write(&mut peer).await?;

        let channel = Arc::new(ConnectedChannel {
            name: channel_name,
            cnx,
            owner_id: reply.owner_id,
            owner_addr: reply.addr,
            owner_port: reply.port,
            owner_control_sock: reply.owner_control_sock,
            peer: AsyncMutex::new(peer),
            timers: TimerTable::default(),
        });
        process_table::insert(&channel.cnx, name, channel.clone()).await;
        Ok(channel)
    }
}

async fn accept_loop(listener: TcpListener, events_tx: mpsc::UnboundedSender<Event>, self_id: Id) {
    loop {
        match listener.accept().await {
            Ok((stream, peer_addr)) => {
                let tx = events_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_peer(stream, tx, self_id).await {
                        debug!(%peer_addr, error = %err, "peer connection ended");
                    }
                });
            },
            Err(err) => {
                warn!(error = %err, "channel listener accept failed");
                return;
            },
        }
    }
}

/// Reads frames from one accepted peer connection until it closes, servicing `CONNECTING` and
/// `PING` transparently and forwarding everything else as an
/// [`Event`].
async fn handle_peer(stream: TcpStream, events_tx: mpsc::UnboundedSender<Event>, self_id: Id) -> Result<()> {
    let (mut read, write) = stream.into_split();
    let writer = Arc::new(AsyncMutex::new(write));

    loop {
        let header = DataSendHeader::read(&mut read).await?;
        match header.flag {
            Flag::Connecting => continue,
            Flag::Ping => {
                let mut w = writer.lock().await;
                DataReplyHeader {
                    id: self_id,
                    answer: 0,
                    datalen: 0,
                }
                .write(&mut *w)
                .await?;
            },
            Flag::Data => {
                // The reply_maxlen hint is meaningful only to the sender's own Send() logic;
                // the receiver has no use for it beyond keeping the frame's shape intact.
                let _reply_maxlen = read_u32(&mut read).await?;
                let payload = crate::wire::frame::read_send_payload(&mut read, &header).await?;
                if events_tx
                    .send(Event::Data {
                        writer: writer.clone(),
                        sender_id: header.id,
                        user_type: header.user_type,
                        payload,
                    })
                    .is_err()
                {
                    return Ok(());
                }
            },
            Flag::Buffered => {
                let payload = crate::wire::frame::read_send_payload(&mut read, &header).await?;
                // The manager-side worker's ack is deferred to Receive actually draining this
                // event, not sent eagerly here on arrival: the queue only frees a slot once
                // the owner consumes a buffered delivery.
                if events_tx
                    .send(Event::Buffered {
                        writer: writer.clone(),
                        user_type: header.user_type,
                        sender_id: header.id,
                        payload,
                    })
                    .is_err()
                {
                    return Ok(());
                }
            },
            Flag::Disconnecting => {
                let _ = events_tx.send(Event::Disconnect);
                return Ok(());
            },
            Flag::Dismissed => {
                let _ = events_tx.send(Event::Dismissed);
            },
            Flag::DeathProcess => {
                let _ = events_tx.send(Event::DeathProcess);
            },
            Flag::Timer => {
                let _ = events_tx.send(Event::Timer { user_type: header.user_type });
            },
        }
    }
}

/// A channel this process owns: the listener backing it, every accepted peer's reply slot, and
/// the lazily populated timer table.
pub struct OwnedChannel {
    name: ChannelName,
    cnx: Arc<Cnx>,
    owner_addr: Ipv4Addr,
    owner_port: u16,
    accept_task: JoinHandle<()>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: AsyncMutex<mpsc::UnboundedReceiver<Event>>,
    reply_slots: AsyncMutex<SlotTable>,
    timers: TimerTable,
}

impl OwnedChannel {
    pub fn name(&self) -> String {
        self.name.as_str()
    }

    pub fn listen_port(&self) -> u16 {
        self.owner_port
    }

    /// `ChannelDelete`: returns `0` on success, or the live client count if
    /// the manager refused because clients are still connected.
    pub async fn delete(self: Arc<Self>, timeout: Timeout) -> Result<i32> {
        let n_clients = self.cnx.channel_delete(self.name, timeout).await?;
        if n_clients == 0 {
            self.accept_task.abort();
            self.timers.cancel_all().await;
            self.reply_slots.lock().await.clear();
        }
        Ok(n_clients)
    }

    /// `Receive`: waits for the next inbound frame, servicing `CONNECTING`
    /// and `PING` transparently inside the reader task, and returns an opaque index for
    /// [`Self::reply`] when the frame carries user data.
    pub async fn receive(&self, buf: RecvBuf<'_>, timeout: Timeout) -> Result<ReceiveOutcome> {
        let event = {
            let mut rx = self.events_rx.lock().await;
            bound(timeout, async { rx.recv().await.ok_or(Error::Reset) }).await?
        };

        Ok(match event {
            Event::Dismissed => ReceiveOutcome::Dismissed,
            Event::DeathProcess => ReceiveOutcome::DeathProcess,
            Event::Disconnect => ReceiveOutcome::Disconnect,
            Event::Timer { user_type } => ReceiveOutcome::Timer { user_type },
            Event::Buffered { writer, .. } => {
                let mut w = writer.lock().await;
                DataReplyHeader {
                    id: self.cnx.id(),
                    answer: 0,
                    datalen: 0,
                }
                .write(&mut *w)
                .await?;
                ReceiveOutcome::NoReply
            },
            Event::Data {
                writer,
                sender_id,
                user_type,
                payload,
            } => {
                let (filled, owned, overflow) = match buf {
                    RecvBuf::Dynamic => {
                        let len = payload.len();
                        (len, Some(payload), None)
                    },
                    RecvBuf::Fixed(out) => {
                        let n = out.len().min(payload.len());
                        out[..n].copy_from_slice(&payload[..n]);
                        let overflow = if payload.len() > n { Some(payload[n..].to_vec()) } else { None };
                        (n, None, overflow)
                    },
                };
                let index = self.reply_slots.lock().await.insert(ReplySlot {
                    sender_id,
                    writer,
                    overflow,
                });
                ReceiveOutcome::Message(ReceivedMessage {
                    index,
                    sender_id,
                    user_type,
                    filled,
                    owned,
                })
            },
        })
    }

    /// The over-length remainder of a `Fixed`-buffer receive, if any, for reply slot `index`.
    /// Accessible until `Reply` releases the slot.
    pub async fn take_overflow(&self, index: usize) -> Option<Vec<u8>> {
        self.reply_slots.lock().await.take_overflow(index)
    }

    pub async fn pending_replies(&self) -> usize {
        self.reply_slots.lock().await.pending()
    }

    /// `Reply`: writes the peer reply frame and releases the slot. Fails
    /// non-fatally with [`Error::InvalidReplySlot`] if `index` is out of range or already
    /// released — the channel itself is unaffected.
    pub async fn reply(&self, index: usize, answer: i32, payload: &[u8], timeout: Timeout) -> Result<()> {
        let slot = self.reply_slots.lock().await.take(index).ok_or(Error::InvalidReplySlot(index))?;
        let mut writer = slot.writer.lock().await;
        bound(timeout, async {
            DataReplyHeader {
                id: slot.sender_id,
                answer,
                datalen: payload.len() as i32,
            }
            .write(&mut *writer)
            .await?;
            write_all(&mut *writer, payload).await
        })
        .await
    }

    pub async fn timer_create(&self, user_type: i32, first_ms: u64, repeat_ms: u64) -> TimerId {
        self.timers
            .create(self.owner_addr, self.owner_port, self.cnx.id(), user_type, first_ms, repeat_ms)
            .await
    }

    pub async fn timer_delete(&self, id: TimerId) {
        self.timers.delete(id).await
    }
}

impl Drop for OwnedChannel {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.timers.try_cancel_all();
    }
}

/// A channel this process has connected to (but does not own): an outbound peer socket plus
/// the manager-allocated `owner_control_sock` key used to target buffered sends.
pub struct ConnectedChannel {
    name: ChannelName,
    cnx: Arc<Cnx>,
    owner_id: Id,
    owner_addr: Ipv4Addr,
    owner_port: u16,
    owner_control_sock: i32,
    peer: AsyncMutex<TcpStream>,
    timers: TimerTable,
}

impl ConnectedChannel {
    pub fn name(&self) -> String {
        self.name.as_str()
    }

    pub fn owner_id(&self) -> Id {
        self.owner_id
    }

    /// `Send`: writes the peer send frame, then blocks for the peer reply.
    /// `timeout` bounds the write and the read as separate I/O steps.
    ///
    /// `reply_buf` picks how the reply payload comes back: `Fixed` fills the caller's buffer
    /// and discards anything past its length (unlike `Receive`, `Send` has no spill buffer to
    /// hand the remainder to later); `Dynamic` allocates a buffer sized exactly to the reply
    /// and returns the whole thing. On the wire this is `reply_maxlen == 0` for `Dynamic`,
    /// matching the manager's protocol, but the hint is never read back from the peer.
    pub async fn send(&self, user_type: i32, payload: &[u8], reply_buf: RecvBuf<'_>, timeout: Timeout) -> Result<SendReply> {
        let mut guard = self.peer.lock().await;
        let reply_maxlen = match &reply_buf {
            RecvBuf::Fixed(buf) => buf.len(),
            RecvBuf::Dynamic => 0,
        };

        bound(timeout, async {
            DataSendHeader {
                flag: Flag::Data,
                id: self.cnx.id(),
                user_type,
                datalen: payload.len() as i32,
            }
            .write(&mut *guard)
            .await?;
            write_u32(&mut *guard, reply_maxlen as u32).await?;
            write_all(&mut *guard, payload).await
        })
        .await?;

        bound(timeout, async {
            let reply_header = DataReplyHeader::read(&mut *guard).await?;
            let datalen = reply_header.datalen as usize;

            match reply_buf {
                RecvBuf::Fixed(buf) => {
                    let to_keep = datalen.min(buf.len());
                    read_exact(&mut *guard, &mut buf[..to_keep]).await?;
                    let discard = datalen - to_keep;
                    if discard > 0 {
                        let mut scratch = vec![0u8; discard];
                        read_exact(&mut *guard, &mut scratch).await?;
                    }
                    Ok(SendReply {
                        answer: reply_header.answer,
                        filled: to_keep,
                        owned: None,
                    })
                },
                RecvBuf::Dynamic => {
                    let mut out = vec![0u8; datalen];
                    read_exact(&mut *guard, &mut out).await?;
                    Ok(SendReply {
                        answer: reply_header.answer,
                        filled: datalen,
                        owned: Some(out),
                    })
                },
            }
        })
        .await
    }

    /// `BufferedSend`: submits over the control link, blocking only if the
    /// manager withholds its reply because the channel's queue is at capacity. Returns the
    /// manager-reported post-enqueue depth.
    pub async fn buffered_send(&self, user_type: i32, payload: &[u8], timeout: Timeout) -> Result<i32> {
        self.cnx.buffered_send(user_type, payload, self.owner_control_sock, timeout).await
    }

    /// `Ping`: the owner's receive loop services this transparently.
    pub async fn ping(&self, timeout: Timeout) -> Result<()> {
        let mut guard = self.peer.lock().await;
        bound(timeout, async {
            DataSendHeader::marker(Flag::Ping, self.cnx.id()).write(&mut *guard).await
        })
        .await?;
        bound(timeout, async { DataReplyHeader::read(&mut *guard).await.map(|_| ()) }).await
    }

    /// `ChannelDisconnect`: marks the owner directly, then tells the
    /// manager, then evicts this handle from the per-process reuse table.
    pub async fn disconnect(self: Arc<Self>, timeout: Timeout) -> Result<()> {
        {
            let mut guard = self.peer.lock().await;
            bound(timeout, async {
                DataSendHeader::marker(Flag::Disconnecting, self.cnx.id()).write(&mut *guard).await
            })
            .await?;
        }
        self.timers.cancel_all().await;
        let name = self.name.as_str();
        self.cnx.channel_disconnect(self.name, timeout).await?;
        process_table::remove(&self.cnx, &name).await;
        Ok(())
    }

    pub async fn timer_create(&self, user_type: i32, first_ms: u64, repeat_ms: u64) -> TimerId {
        self.timers
            .create(self.owner_addr, self.owner_port, self.cnx.id(), user_type, first_ms, repeat_ms)
            .await
    }

    pub async fn timer_delete(&self, id: TimerId) {
        self.timers.delete(id).await
    }
}

impl Drop for ConnectedChannel {
    fn drop(&mut self) {
        self.timers.try_cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recv_buf_variants_exist() {
        let mut fixed = [0u8; 4];
        let _ = RecvBuf::Fixed(&mut fixed);
        let _ = RecvBuf::Dynamic;
    }
}
