//! The client library: per-process API for talking to a manager and to peer processes
//! directly. A process calls [`connect`] once to obtain a [`Cnx`] (the control link), then
//! creates or locates channels through it.

mod cnx;
mod reply_slot;
mod channel;
mod process_table;
mod timer;

pub use channel::{Channel, ConnectedChannel, OwnedChannel, ReceiveOutcome, ReceivedMessage, RecvBuf, SendReply};
pub use cnx::Cnx;
pub use timer::TimerId;

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// `NoTimeout` blocks indefinitely; `Millis` bounds the *next* I/O step only, never a full
/// multi-step exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    NoTimeout,
    Millis(u64),
}

impl Timeout {
    pub fn from_millis(msec: i64) -> Self {
        if msec < 0 {
            Self::NoTimeout
        } else {
            Self::Millis(msec as u64)
        }
    }

    fn as_duration(self) -> Option<Duration> {
        match self {
            Self::NoTimeout => None,
            Self::Millis(ms) => Some(Duration::from_millis(ms)),
        }
    }
}

/// Bounds a single I/O step by `timeout`, turning an elapsed deadline into [`Error::Timeout`].
/// `Timeout::NoTimeout` disables the deadline and awaits `fut` indefinitely.
pub(crate) async fn bound<T, F: Future<Output = Result<T>>>(timeout: Timeout, fut: F) -> Result<T> {
    match timeout.as_duration() {
        None => fut.await,
        Some(duration) => match tokio::time::timeout(duration, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout),
        },
    }
}

/// Opens the control link to the manager. `host` resolves via the same three-source
/// precedence the manager's own configuration uses ([`crate::config::resolve_client_host`]):
/// explicit argument, else the legacy config file, else `localhost`. Opening the first `Cnx`
/// is all the per-process initialisation needed, since the per-process connect-cache
/// ([`process_table`]) is a lazily initialised static.
pub async fn connect(host: Option<&str>, port: u16, id: &str, timeout: Timeout) -> Result<Cnx> {
    Cnx::connect(host, port, id, timeout).await
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use super::*;

    #[test]
    fn negative_millis_means_no_timeout() {
        assert_eq!(Timeout::from_millis(-1), Timeout::NoTimeout);
        assert_eq!(Timeout::from_millis(0), Timeout::Millis(0));
        assert_eq!(Timeout::from_millis(500), Timeout::Millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn bound_times_out_without_advancing_wall_clock() {
        let never: std::future::Pending<std::result::Result<(), Error>> = std::future::pending();
        let result = tokio::spawn(async move {
            tokio::select! {
                res = bound(Timeout::Millis(50), never) => res,
                _ = tokio::time::sleep(Duration::from_millis(200)) => Err(Error::Timeout),
            }
        });
        tokio::time::advance(Duration::from_millis(60)).await;
        assert!(matches!(result.await.unwrap(), Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn bound_passes_through_ready_result() {
        let ready: std::result::Result<i32, Infallible> = Ok(7);
        let fut = async move { ready.map_err(|_| unreachable!()) };
        let out = bound(Timeout::Millis(1000), fut).await.unwrap();
        assert_eq!(out, 7);
    }

    #[tokio::test]
    async fn bound_with_no_timeout_awaits_indefinitely_short_fut() {
        let fut = async { Ok::<_, Error>(42) };
        assert_eq!(bound(Timeout::NoTimeout, fut).await.unwrap(), 42);
    }
}
