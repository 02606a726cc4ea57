//! The reply-slot table. `Receive` allocates the lowest free slot and hands its index to the
//! caller; `Reply` consumes it by index. Slots are reused by index rather than reallocated,
//! since the caller holds onto that index across an arbitrary amount of its own processing.

use std::sync::Arc;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex as AsyncMutex;

use crate::wire::Id;

pub(crate) struct ReplySlot {
    pub(crate) sender_id: Id,
    pub(crate) writer: Arc<AsyncMutex<OwnedWriteHalf>>,
    /// Bytes of an over-length payload that did not fit the caller's fixed receive buffer.
    /// Lives here until `Reply` releases the slot.
    pub(crate) overflow: Option<Vec<u8>>,
}

#[derive(Default)]
pub(crate) struct SlotTable {
    slots: Vec<Option<ReplySlot>>,
}

impl SlotTable {
    pub(crate) fn insert(&mut self, slot: ReplySlot) -> usize {
        if let Some(index) = self.slots.iter().position(|s| s.is_none()) {
            self.slots[index] = Some(slot);
            index
        } else {
            self.slots.push(Some(slot));
            self.slots.len() - 1
        }
    }

    pub(crate) fn take(&mut self, index: usize) -> Option<ReplySlot> {
        self.slots.get_mut(index).and_then(|s| s.take())
    }

    pub(crate) fn take_overflow(&mut self, index: usize) -> Option<Vec<u8>> {
        self.slots.get_mut(index).and_then(|s| s.as_mut()).and_then(|slot| slot.overflow.take())
    }

    /// Drops every outstanding slot, e.g. on channel destruction. A slot otherwise remains
    /// allocated until the matching Reply or a peer disconnect.
    pub(crate) fn clear(&mut self) {
        self.slots.clear();
    }

    pub(crate) fn pending(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn dummy_writer() -> Arc<AsyncMutex<OwnedWriteHalf>> {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (server, _) = tokio::join!(listener.accept(), tokio::net::TcpStream::connect(addr));
        let (_, write) = server.unwrap().0.into_split();
        Arc::new(AsyncMutex::new(write))
    }

    #[tokio::test]
    async fn reuses_lowest_free_slot() {
        let mut table = SlotTable::default();
        let writer = dummy_writer().await;
        let slot = || ReplySlot {
            sender_id: Id::new("a").unwrap(),
            writer: writer.clone(),
            overflow: None,
        };
        let a = table.insert(slot());
        let b = table.insert(slot());
        assert_eq!((a, b), (0, 1));
        table.take(a);
        let c = table.insert(slot());
        assert_eq!(c, 0);
        assert_eq!(table.pending(), 2);
    }
}
