// Fixed-width wire types shared by the manager protocol and the peer frame headers.
//
// `messip_id_t` / channel-name / dotted-IPv4 fields, byte-for-byte: fixed length, NUL padded,
// never NUL terminated mid-string by a caller.

use std::fmt;
use std::net::Ipv4Addr;

use crate::error::{Error, Result};

pub const ID_LEN: usize = 8;
pub const ID_FIELD_LEN: usize = ID_LEN + 1;
pub const CHANNEL_NAME_MAXLEN: usize = 47;
pub const CHANNEL_NAME_FIELD_LEN: usize = CHANNEL_NAME_MAXLEN + 1;
pub const ADDR_STR_FIELD_LEN: usize = 48;

fn encode_fixed(s: &str, buf: &mut [u8]) -> Result<()> {
    let bytes = s.as_bytes();
    if bytes.len() >= buf.len() {
        return Err(Error::Protocol(format!(
            "field '{}' exceeds wire width {}",
            s,
            buf.len() - 1
        )));
    }
    buf.iter_mut().for_each(|b| *b = 0);
    buf[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}

fn decode_fixed(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// A process-chosen display identifier. Not unique: the manager never enforces uniqueness
/// here, only the channel name is a true key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Id([u8; ID_FIELD_LEN]);

impl Id {
    pub fn new(s: &str) -> Result<Self> {
        let mut raw = [0u8; ID_FIELD_LEN];
        encode_fixed(s, &mut raw)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> String {
        decode_fixed(&self.0)
    }

    pub(crate) fn to_wire(self) -> [u8; ID_FIELD_LEN] {
        self.0
    }

    pub(crate) fn from_wire(raw: [u8; ID_FIELD_LEN]) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Id({:?})", self.as_str())
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A channel name, the manager's uniqueness key.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChannelName([u8; CHANNEL_NAME_FIELD_LEN]);

impl ChannelName {
    pub fn new(s: &str) -> Result<Self> {
        let mut raw = [0u8; CHANNEL_NAME_FIELD_LEN];
        encode_fixed(s, &mut raw)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> String {
        decode_fixed(&self.0)
    }

    pub(crate) fn to_wire(self) -> [u8; CHANNEL_NAME_FIELD_LEN] {
        self.0
    }

    pub(crate) fn from_wire(raw: [u8; CHANNEL_NAME_FIELD_LEN]) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelName({:?})", self.as_str())
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The dotted-IPv4 text field carried alongside the binary address in several replies.
pub(crate) fn encode_addr_str(addr: Ipv4Addr) -> [u8; ADDR_STR_FIELD_LEN] {
    let mut raw = [0u8; ADDR_STR_FIELD_LEN];
    // infallible: the longest dotted-quad is 15 bytes, well under the 48-byte field.
    encode_fixed(&addr.to_string(), &mut raw).expect("dotted IPv4 text always fits");
    raw
}

pub(crate) fn decode_addr_str(raw: &[u8; ADDR_STR_FIELD_LEN]) -> String {
    decode_fixed(raw)
}
