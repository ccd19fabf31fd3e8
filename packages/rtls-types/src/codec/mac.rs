//! 802.15.4 MAC header encode/decode (spec §4.1), bit-for-bit against
//! `wpan.py`'s frame control word: a little-endian u16 with
//! bits0-2=frame_type, bit3=security, bit4=pending, bit5=ack_req,
//! bit6=panid_comp, bits10-11=dst_mode, bits12-13=frame_version,
//! bits14-15=src_mode. Address presence and ordering on the wire is
//! dst_pan, dst_addr, src_pan (omitted when `panid_comp` and the PANs
//! match), src_addr.

use crate::error::RtlsError;
use crate::eui64::Eui64;
use crate::frame::{Addr, AddrMode, MacHeader};
use bytes::{Buf, BufMut};

fn mode_from_bits(bits: u16) -> Result<AddrMode, RtlsError> {
    match bits {
        0b00 => Ok(AddrMode::None),
        0b10 => Ok(AddrMode::Short),
        0b11 => Ok(AddrMode::Extended),
        other => Err(RtlsError::ParseError(format!("reserved addressing mode {other:#04b}"))),
    }
}

fn mode_to_bits(mode: AddrMode) -> u16 {
    match mode {
        AddrMode::None => 0b00,
        AddrMode::Short => 0b10,
        AddrMode::Extended => 0b11,
    }
}

/// Short addresses are, like EUI64s, byte-reversed on the wire: `wpan.py`
/// applies the same `_byteswap` to both regardless of length. We keep the
/// canonical value as the big-endian reading of the reversed wire bytes.
fn short_to_wire(addr: u16) -> [u8; 2] {
    addr.to_be_bytes()
}

fn short_from_wire(wire: [u8; 2]) -> u16 {
    u16::from_be_bytes(wire)
}

fn addr_mode(addr: &Option<Addr>) -> AddrMode {
    match addr {
        None => AddrMode::None,
        Some(Addr::Short(_)) => AddrMode::Short,
        Some(Addr::Extended(_)) => AddrMode::Extended,
    }
}

pub fn encode_mac(header: &MacHeader) -> Vec<u8> {
    let dst_mode = addr_mode(&header.dst_addr);
    let src_mode = addr_mode(&header.src_addr);

    let mut fc: u16 = 0;
    fc |= (header.frame_type as u16 & 0x7) << 0;
    fc |= (header.security as u16) << 3;
    fc |= (header.pending as u16) << 4;
    fc |= (header.ack_req as u16) << 5;
    fc |= (header.panid_comp as u16) << 6;
    fc |= mode_to_bits(dst_mode) << 10;
    fc |= (header.frame_version as u16 & 0x3) << 12;
    fc |= mode_to_bits(src_mode) << 14;

    let mut out = Vec::with_capacity(16);
    out.put_u16_le(fc);
    out.put_u8(header.seqnum);

    if dst_mode != AddrMode::None {
        out.put_u16_le(header.dst_pan.unwrap_or(0));
        match header.dst_addr.as_ref().unwrap() {
            Addr::Short(a) => out.extend_from_slice(&short_to_wire(*a)),
            Addr::Extended(e) => out.extend_from_slice(&e.to_wire()),
        }
    }

    let omit_src_pan = header.panid_comp && header.dst_pan == header.src_pan && dst_mode != AddrMode::None;
    if src_mode != AddrMode::None && !omit_src_pan {
        out.put_u16_le(header.src_pan.unwrap_or(0));
    }
    if src_mode != AddrMode::None {
        match header.src_addr.as_ref().unwrap() {
            Addr::Short(a) => out.extend_from_slice(&short_to_wire(*a)),
            Addr::Extended(e) => out.extend_from_slice(&e.to_wire()),
        }
    }

    out
}

pub fn decode_mac(buf: &[u8]) -> Result<(MacHeader, usize), RtlsError> {
    if buf.len() < 3 {
        return Err(RtlsError::ParseError("frame shorter than MAC header minimum".into()));
    }
    let mut cur = buf;
    let fc = cur.get_u16_le();
    let seqnum = cur.get_u8();

    let frame_type = (fc & 0x7) as u8;
    let security = (fc >> 3) & 1 != 0;
    let pending = (fc >> 4) & 1 != 0;
    let ack_req = (fc >> 5) & 1 != 0;
    let panid_comp = (fc >> 6) & 1 != 0;
    let dst_mode = mode_from_bits((fc >> 10) & 0x3)?;
    let frame_version = ((fc >> 12) & 0x3) as u8;
    let src_mode = mode_from_bits((fc >> 14) & 0x3)?;

    let mut dst_pan = None;
    let mut dst_addr = None;
    if dst_mode != AddrMode::None {
        if cur.remaining() < 2 {
            return Err(RtlsError::ParseError("truncated destination PAN".into()));
        }
        dst_pan = Some(cur.get_u16_le());
        dst_addr = Some(match dst_mode {
            AddrMode::Short => {
                if cur.remaining() < 2 {
                    return Err(RtlsError::ParseError("truncated destination short address".into()));
                }
                let mut wire = [0u8; 2];
                cur.copy_to_slice(&mut wire);
                Addr::Short(short_from_wire(wire))
            }
            AddrMode::Extended => {
                if cur.remaining() < 8 {
                    return Err(RtlsError::ParseError("truncated destination extended address".into()));
                }
                let mut wire = [0u8; 8];
                cur.copy_to_slice(&mut wire);
                Addr::Extended(Eui64::from_wire(wire))
            }
            AddrMode::None => unreachable!(),
        });
    }

    let omit_src_pan = panid_comp && dst_mode != AddrMode::None;
    let mut src_pan = if omit_src_pan { dst_pan } else { None };
    if src_mode != AddrMode::None && !omit_src_pan {
        if cur.remaining() < 2 {
            return Err(RtlsError::ParseError("truncated source PAN".into()));
        }
        src_pan = Some(cur.get_u16_le());
    }

    let mut src_addr = None;
    if src_mode != AddrMode::None {
        src_addr = Some(match src_mode {
            AddrMode::Short => {
                if cur.remaining() < 2 {
                    return Err(RtlsError::ParseError("truncated source short address".into()));
                }
                let mut wire = [0u8; 2];
                cur.copy_to_slice(&mut wire);
                Addr::Short(short_from_wire(wire))
            }
            AddrMode::Extended => {
                if cur.remaining() < 8 {
                    return Err(RtlsError::ParseError("truncated source extended address".into()));
                }
                let mut wire = [0u8; 8];
                cur.copy_to_slice(&mut wire);
                Addr::Extended(Eui64::from_wire(wire))
            }
            AddrMode::None => unreachable!(),
        });
    }

    let consumed = buf.len() - cur.remaining();
    Ok((
        MacHeader {
            frame_type,
            security,
            pending,
            ack_req,
            panid_comp,
            frame_version,
            seqnum,
            dst_pan,
            dst_addr,
            src_pan,
            src_addr,
        },
        consumed,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario1_header() -> MacHeader {
        MacHeader {
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
            src_addr: Some(Addr::Extended(Eui64::from_bytes([0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]))),
        }
    }

    #[test]
    fn scenario1_matches_spec_bytes() {
        let header = scenario1_header();
        let encoded = encode_mac(&header);
        // FC low byte: type=1, sec=0, pending=0, ack_req=0, panid_comp=1 -> 0x41.
        // FC high byte: dst_mode=Short(10) frame_version=00 src_mode=Extended(11).
        assert_eq!(encoded[0], 0x41);
        assert_eq!(encoded[2], header.seqnum);
        // dst_pan
        assert_eq!(&encoded[3..5], &[0x2a, 0x00]);
        // dst_addr short 0xffff
        assert_eq!(&encoded[5..7], &[0xff, 0xff]);
        // src_pan omitted (panid_comp, same pan)
        // src_addr extended, byte-reversed
        assert_eq!(&encoded[7..15], &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
    }

    #[test]
    fn roundtrips_scenario1() {
        let header = scenario1_header();
        let encoded = encode_mac(&header);
        let (decoded, consumed) = decode_mac(&encoded).unwrap();
        assert_eq!(consumed, encoded.len());
        assert_eq!(decoded, header);
    }

    #[test]
    fn roundtrips_all_short() {
        let header = MacHeader {
            frame_type: 0,
            security: false,
            pending: true,
            ack_req: true,
            panid_comp: false,
            frame_version: 0,
            seqnum: 7,
            dst_pan: Some(0x1234),
            dst_addr: Some(Addr::Short(0x5678)),
            src_pan: Some(0x1234),
            src_addr: Some(Addr::Short(0x9abc)),
        };
        let encoded = encode_mac(&header);
        let (decoded, _) = decode_mac(&encoded).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn reserved_addressing_mode_errors() {
        // mode bits `01` are reserved.
        let buf: &[u8] = &[0b0000_0000 | 0b0100_0000, 0x04, 0x00];
        assert!(decode_mac(buf).is_err());
    }
}
