//! 5-byte timestamp wire format (spec §4.1): little-endian, zero-extended
//! to 8 bytes on decode, truncated to the low 5 bytes on encode. Mirrors
//! `tsdecode`/`tsencode` in `wpan.py`.

pub const TS_WIRE_LEN: usize = 5;

pub fn ts_decode(buf: &[u8]) -> Option<u64> {
    if buf.len() < TS_WIRE_LEN {
        return None;
    }
    let mut padded = [0u8; 8];
    padded[..TS_WIRE_LEN].copy_from_slice(&buf[..TS_WIRE_LEN]);
    Some(u64::from_le_bytes(padded))
}

pub fn ts_encode(value: u64) -> [u8; TS_WIRE_LEN] {
    let full = value.to_le_bytes();
    let mut out = [0u8; TS_WIRE_LEN];
    out.copy_from_slice(&full[..TS_WIRE_LEN]);
    out
}
