//! 64-bit IEEE-assigned extended identifier, the primary device key.

use serde::{Deserialize, Serialize};
use std::fmt;

/// 8-byte device identifier, held in canonical (big-endian hex) order.
/// The codec is responsible for byte-reversing this on the wire — see
/// `codec::mac`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
pub struct Eui64(pub [u8; 8]);

impl Eui64 {
    pub const BROADCAST: Eui64 = Eui64([0xff; 8]);

    pub fn from_bytes(b: [u8; 8]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 8] {
        &self.0
    }

    /// Byte-reversed form used when serializing onto the wire.
    pub fn to_wire(self) -> [u8; 8] {
        let mut out = self.0;
        out.reverse();
        out
    }

    /// Construct from the byte-reversed wire representation.
    pub fn from_wire(wire: [u8; 8]) -> Self {
        let mut out = wire;
        out.reverse();
        Self(out)
    }
}

impl fmt::Debug for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Eui64({})", hex::encode(self.0))
    }
}

impl fmt::Display for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}
