//! Per-reception RF event wrapper (spec §4.2), grounded in
//! `examples/original_source/server/event.py`'s `RFEvent`: pairs an
//! anchor's observation with its decoded frame and timing/diagnostic
//! data, and derives the ranging-session key a frame belongs to.

use md5::{Digest, Md5};

use rtls_types::frame::{Frame, StandardTail, TailFrame};
use rtls_types::{Eui64, TimestampInfo};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Rx,
    Tx,
}

/// Software/hardware/high-res capture times, mirroring `wpan.py`'s
/// `Timestamp` triple (`RFEvent.times`).
#[derive(Debug, Clone, Copy, Default)]
pub struct EventTimes {
    pub sw: u64,
    pub hw: u64,
    pub hi: u64,
}

#[derive(Debug, Clone)]
pub struct RfEvent {
    pub anchor: Eui64,
    pub direction: Direction,
    pub times: EventTimes,
    pub frame: Frame,
    pub finfo: TimestampInfo,
}

impl RfEvent {
    pub fn new(anchor: Eui64, direction: Direction, times: EventTimes, frame: Frame, finfo: TimestampInfo) -> Self {
        Self { anchor, direction, times, frame, finfo }
    }

    pub fn is_rx(&self) -> bool {
        self.direction == Direction::Rx
    }

    pub fn is_tx(&self) -> bool {
        self.direction == Direction::Tx
    }

    /// Raw high-res reception timestamp, the `T` value `tdoa::woodoo`
    /// consumes (`RFEvent.timestamp`).
    pub fn timestamp(&self) -> f64 {
        self.finfo.rawts as f64
    }

    /// `RFEvent.get_rx_level`: `RXPower2dBm((POW<<17)/RXP^2, prf)`, or
    /// -120dBm when the CIR power / preamble accumulation count are
    /// unusable.
    pub fn get_rx_level(&self, prf: u16) -> f64 {
        let pow = self.finfo.cir_pwr;
        let rxp = self.finfo.rxpacc as u64;
        if pow > 0 && rxp > 0 {
            let power = ((pow as u64) << 17) as f64 / (rxp * rxp) as f64;
            rtls_types::rf::rx_power_to_dbm(power, prf).unwrap_or(-120.0)
        } else {
            -120.0
        }
    }

    /// `RFEvent.make_ranging_ref`: `md5(eui64_bytes || seq)[..8]`.
    pub fn make_ranging_ref(addr: Eui64, seq: u8) -> [u8; 8] {
        let mut hasher = Md5::new();
        hasher.update(addr.as_bytes());
        hasher.update([seq]);
        let digest = hasher.finalize();
        let mut out = [0u8; 8];
        out.copy_from_slice(&digest[..8]);
        out
    }

    /// Which ranging session this event belongs to, or `None` when the
    /// frame can neither seed nor join one — matches
    /// `RFEvent.get_ranging_ref`, with the source's `RANGING_REQUEST`
    /// `NotImplementedError` downgraded to `None` (two-way ranging is an
    /// acknowledged non-goal).
    pub fn get_ranging_ref(&self) -> Option<[u8; 8]> {
        let TailFrame::Standard(tail) = self.frame.tail.as_ref()? else {
            return None;
        };
        match tail {
            StandardTail::TagBlink { .. } => {
                let src = self.frame.mac.src_eui64()?;
                Some(Self::make_ranging_ref(src, self.frame.mac.seqnum))
            }
            StandardTail::AnchorBeacon { beacon_ref, .. } => Some(*beacon_ref),
            StandardTail::RangingResponse { .. } => {
                let src = self.frame.mac.src_eui64()?;
                Some(Self::make_ranging_ref(src, self.frame.mac.seqnum.wrapping_sub(1)))
            }
            _ => None,
        }
    }
}
