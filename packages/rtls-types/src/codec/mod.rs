//! Wire codec for 802.15.4 + Tail frames (spec §4). Splits into the
//! generic MAC header (`mac`), the Tail payload (`tail`), and the 5-byte
//! timestamp format shared by several Tail frame types (`tsfmt`).

mod mac;
mod tail;
mod tsfmt;

pub use mac::{decode_mac, encode_mac};
pub use tail::{decode_tail, encode_tail};
pub use tsfmt::{ts_decode, ts_encode, TS_WIRE_LEN};

use crate::error::RtlsError;
use crate::frame::Frame;

/// Encode a full frame: MAC header followed by whatever Tail payload (or
/// none) it carries.
pub fn encode_frame(frame: &Frame) -> Vec<u8> {
    let mut out = encode_mac(&frame.mac);
    if let Some(tail) = &frame.tail {
        out.extend_from_slice(&encode_tail(tail));
    }
    out
}

/// Decode a full frame. A frame with no bytes left after the MAC header
/// is valid and carries no Tail payload.
pub fn decode_frame(buf: &[u8]) -> Result<Frame, RtlsError> {
    let (mac, consumed) = decode_mac(buf)?;
    let tail = if consumed < buf.len() {
        Some(decode_tail(&buf[consumed..])?)
    } else {
        None
    };
    Ok(Frame { mac, tail })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eui64::Eui64;
    use crate::frame::{Addr, MacHeader, StandardTail, TailFrame};

    #[test]
    fn scenario1_end_to_end_roundtrip() {
        let frame = Frame {
            mac: MacHeader {
                frame_type: 1,
                security: false,
                pending: false,
                ack_req: false,
                panid_comp: true,
                frame_version: 0,
                seqnum: 0xc8,
                dst_pan: Some(0x2a),
                dst_addr: Some(Addr::Short(0xffff)),
                src_pan: Some(0x2a),
                src_addr: Some(Addr::Extended(Eui64::from_bytes([1, 2, 3, 4, 5, 6, 7, 8]))),
            },
            tail: Some(TailFrame::Standard(StandardTail::TagBlink {
                flags: 0xc0,
                cookie: None,
                ies: vec![],
            })),
        };
        let encoded = encode_frame(&frame);
        let decoded = decode_frame(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn frame_with_no_tail_roundtrips() {
        let frame = Frame {
            mac: MacHeader {
                frame_type: 1,
                security: false,
                pending: false,
                ack_req: false,
                panid_comp: false,
                frame_version: 0,
                seqnum: 1,
                dst_pan: None,
                dst_addr: None,
                src_pan: None,
                src_addr: None,
            },
            tail: None,
        };
        let encoded = encode_frame(&frame);
        assert_eq!(encoded.len(), 3);
        let decoded = decode_frame(&encoded).unwrap();
        assert_eq!(decoded, frame);
    }
}
