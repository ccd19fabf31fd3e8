//! Timestamp model (spec §3): software/hardware/high-resolution timestamps
//! plus per-reception RF diagnostics (`TimestampInfo`).

use serde::{Deserialize, Serialize};

/// Software, hardware and high-resolution timestamps captured for one
/// frame reception or transmission, mirroring `wpan.py`'s `Timespec` /
/// `Timehires` / `Timestamp` triple.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Timestamp {
    /// Software monotonic clock, nanoseconds.
    pub sw: u64,
    /// Hardware counter: 32-bit seconds, 32-bit nanoseconds, packed as a
    /// single u64 (seconds << 32 | nanos), matching the source's
    /// `Timespec` struct field order.
    pub hw: u64,
    /// High-resolution radio clock: 64-bit nanoseconds plus a 32-bit
    /// fractional remainder, packed the same way as `hw`.
    pub hi: u64,
}

/// Per-reception RF diagnostics, decoded in the exact field order of the
/// source's `TimestampInfo` ctypes `Structure` (`wpan.py`). This is the
/// `FINFO` hex blob of the `TAIL/RF/...` MQTT message (spec §6).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimestampInfo {
    pub rawts: u64,
    pub lqi: u16,
    pub snr: u16,
    pub fpr: u16,
    pub noise: u16,
    pub rxpacc: u16,
    pub fp_index: u16,
    pub fp_ampl1: u16,
    pub fp_ampl2: u16,
    pub fp_ampl3: u16,
    pub cir_pwr: u32,
    pub fp_pwr: u32,
    pub ttcko: u32,
    pub ttcki: u32,
    pub temp: i16,
    pub volt: i16,
}

impl TimestampInfo {
    /// Wire size in bytes: 8 + 6*2 + 4*4 + ... matches the packed
    /// little-endian struct layout (no padding, as in the Python
    /// `ctypes.Structure` with explicit field widths).
    pub const WIRE_LEN: usize = 8 + 2 * 6 + 4 * 4 + 2 * 2;

    /// Decode from a little-endian byte buffer in declaration order.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::WIRE_LEN {
            return None;
        }
        let mut c = std::io::Cursor::new(buf);
        use bytes::Buf;
        Some(Self {
            rawts: c.get_u64_le(),
            lqi: c.get_u16_le(),
            snr: c.get_u16_le(),
            fpr: c.get_u16_le(),
            noise: c.get_u16_le(),
            rxpacc: c.get_u16_le(),
            fp_index: c.get_u16_le(),
            fp_ampl1: c.get_u16_le(),
            fp_ampl2: c.get_u16_le(),
            fp_ampl3: c.get_u16_le(),
            cir_pwr: c.get_u32_le(),
            fp_pwr: c.get_u32_le(),
            ttcko: c.get_u32_le(),
            ttcki: c.get_u32_le(),
            temp: c.get_i16_le(),
            volt: c.get_i16_le(),
        })
    }

    pub fn encode(&self) -> Vec<u8> {
        use bytes::BufMut;
        let mut out = Vec::with_capacity(Self::WIRE_LEN);
        out.put_u64_le(self.rawts);
        out.put_u16_le(self.lqi);
        out.put_u16_le(self.snr);
        out.put_u16_le(self.fpr);
        out.put_u16_le(self.noise);
        out.put_u16_le(self.rxpacc);
        out.put_u16_le(self.fp_index);
        out.put_u16_le(self.fp_ampl1);
        out.put_u16_le(self.fp_ampl2);
        out.put_u16_le(self.fp_ampl3);
        out.put_u32_le(self.cir_pwr);
        out.put_u32_le(self.fp_pwr);
        out.put_u32_le(self.ttcko);
        out.put_u32_le(self.ttcki);
        out.put_i16_le(self.temp);
        out.put_i16_le(self.volt);
        out
    }

    /// Clock-tracking ratio used to sanity-check crystal drift.
    pub fn xtal_ratio(&self) -> f64 {
        self.ttcko as f64 / self.ttcki as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_info_roundtrips() {
        let info = TimestampInfo {
            rawts: 0x0102030405060708,
            lqi: 10,
            snr: 20,
            fpr: 30,
            noise: 40,
            rxpacc: 50,
            fp_index: 60,
            fp_ampl1: 70,
            fp_ampl2: 80,
            fp_ampl3: 90,
            cir_pwr: 100,
            fp_pwr: 200,
            ttcko: 300,
            ttcki: 400,
            temp: -5,
            volt: 3300,
        };
        let encoded = info.encode();
        assert_eq!(encoded.len(), TimestampInfo::WIRE_LEN);
        let decoded = TimestampInfo::decode(&encoded).unwrap();
        assert_eq!(decoded, info);
    }
}
