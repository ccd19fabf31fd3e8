//! Decoded frame model (spec §3 / §4.1): a tagged variant per Tail frame
//! type plus a shared MAC header record, replacing the source's dynamic
//! attribute bag (`WPANFrame`/`TailWPANFrame` instances with many optional
//! attributes) per `SPEC_FULL.md` §9 "Dynamic attribute bags" note.

use crate::eui64::Eui64;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddrMode {
    None,
    Short,
    Extended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Addr {
    Short(u16),
    Extended(Eui64),
}

impl Addr {
    pub fn wire_len(&self) -> usize {
        match self {
            Addr::Short(_) => 2,
            Addr::Extended(_) => 8,
        }
    }
}

/// 802.15.4 MAC header, common to every frame regardless of Tail content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacHeader {
    pub frame_type: u8,
    pub security: bool,
    pub pending: bool,
    pub ack_req: bool,
    pub panid_comp: bool,
    pub frame_version: u8,
    pub seqnum: u8,
    pub dst_pan: Option<u16>,
    pub dst_addr: Option<Addr>,
    pub src_pan: Option<u16>,
    pub src_addr: Option<Addr>,
}

impl MacHeader {
    pub fn src_eui64(&self) -> Option<Eui64> {
        match self.src_addr {
            Some(Addr::Extended(e)) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IeKey {
    Batt,
    Vreg,
    Temp,
    Vbatt,
    Blinks,
    Debug,
    Unknown(u8),
}

impl IeKey {
    pub fn from_id(id: u8) -> Self {
        match id {
            0x00 => IeKey::Batt,
            0x01 => IeKey::Vreg,
            0x02 => IeKey::Temp,
            0x40 => IeKey::Vbatt,
            0x80 => IeKey::Blinks,
            0xff => IeKey::Debug,
            other => IeKey::Unknown(other),
        }
    }

    pub fn name(&self) -> String {
        match self {
            IeKey::Batt => "Batt".into(),
            IeKey::Vreg => "Vreg".into(),
            IeKey::Temp => "Temp".into(),
            IeKey::Vbatt => "Vbatt".into(),
            IeKey::Blinks => "Blinks".into(),
            IeKey::Debug => "Debug".into(),
            IeKey::Unknown(id) => id.to_string(),
        }
    }
}

/// A decoded and, where the key has a known conversion, unit-converted IE
/// value. `raw` is always the unconverted wire integer/bytes; `converted`
/// is `Some` for the keys `wpan.py`'s `IE_CONV` table names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InformationElement {
    pub key: IeKey,
    pub raw: IeValue,
    pub converted: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IeValue {
    U8(u8),
    U16(u16),
    U32(u32),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ConfigSubtype {
    Reset = 0,
    Enumerate = 1,
    Read = 2,
    Write = 3,
    Delete = 4,
    Salt = 5,
    Test = 15,
}

impl ConfigSubtype {
    pub fn decode(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Reset),
            1 => Some(Self::Enumerate),
            2 => Some(Self::Read),
            3 => Some(Self::Write),
            4 => Some(Self::Delete),
            5 => Some(Self::Salt),
            15 => Some(Self::Test),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConfigPayload {
    Empty,
    Key(String),
    KeyValue(Vec<(String, Vec<u8>)>),
    Keys(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StandardTail {
    TagBlink {
        flags: u8,
        cookie: Option<[u8; 16]>,
        ies: Vec<InformationElement>,
    },
    AnchorBeacon {
        flags: u8,
        beacon_ref: [u8; 8],
    },
    /// Two-way ranging is not implemented by the solver (the source's own
    /// `TWR` class is an unimplemented stub); requests are retained
    /// opaque so the codec still round-trips them.
    RangingRequest {
        payload: Vec<u8>,
    },
    RangingResponse {
        owr: bool,
        tx_ts: u64,
        rx_ts: Vec<(Addr, u64)>,
    },
    ConfigRequest {
        subtype: ConfigSubtype,
        payload: ConfigPayload,
    },
    ConfigResponse {
        subtype: ConfigSubtype,
        payload: ConfigPayload,
    },
    AnchorAux {
        timing: bool,
        txtime: Option<u64>,
        /// When both `rxtimes` and `rxinfos` are present they share the
        /// same per-anchor order (the wire format walks one address list
        /// per entry, attaching whichever of time/info is requested).
        rxtimes: Option<Vec<(Addr, u64)>>,
        rxinfos: Option<Vec<(Addr, [u16; 4])>>,
    },
}

impl StandardTail {
    pub fn frame_type(&self) -> u8 {
        match self {
            StandardTail::TagBlink { .. } => 0,
            StandardTail::AnchorBeacon { .. } => 1,
            StandardTail::RangingRequest { .. } => 2,
            StandardTail::RangingResponse { .. } => 3,
            StandardTail::ConfigRequest { .. } => 4,
            StandardTail::ConfigResponse { .. } => 5,
            StandardTail::AnchorAux { .. } => 15,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TailFrame {
    /// First byte wasn't a recognized Tail magic: the payload is carried
    /// opaque and must round-trip byte-identically.
    Raw(Vec<u8>),
    /// Magic 0x38: recognized as encrypted but not decoded (non-goal).
    Encrypted(Vec<u8>),
    Standard(StandardTail),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    pub mac: MacHeader,
    pub tail: Option<TailFrame>,
}

pub const TAIL_MAGIC_STD: u8 = 0x37;
pub const TAIL_MAGIC_ENC: u8 = 0x38;
