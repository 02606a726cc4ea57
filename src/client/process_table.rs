//! The per-process table of outbound peer sockets opened by `ChannelConnect`. When the manager
//! reports `already_connected`, the caller reuses the outbound socket previously opened for
//! this name in this process instead of opening a second one. Keyed by the identity of the
//! control link plus the channel name, since a process may in principle hold more than one
//! control link.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tokio::sync::Mutex;

use super::channel::ConnectedChannel;
use super::cnx::Cnx;

type Key = (usize, String);

static TABLE: Lazy<Mutex<HashMap<Key, Arc<ConnectedChannel>>>> = Lazy::new(|| Mutex::new(HashMap::new()));

fn key(cnx: &Cnx, name: &str) -> Key {
    (cnx.instance_id() as usize, name.to_string())
}

pub(crate) async fn lookup(cnx: &Cnx, name: &str) -> Option<Arc<ConnectedChannel>> {
    TABLE.lock().await.get(&key(cnx, name)).cloned()
}

pub(crate) async fn insert(cnx: &Cnx, name: &str, channel: Arc<ConnectedChannel>) {
    TABLE.lock().await.insert(key(cnx, name), channel);
}

pub(crate) async fn remove(cnx: &Cnx, name: &str) {
    TABLE.lock().await.remove(&key(cnx, name));
}
