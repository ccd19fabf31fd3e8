//! Tail payload encode/decode (spec §4.2), transcribed field-for-field
//! from `wpan.py`'s `TailWPANFrame`: a one-byte magic, then for the
//! standard protocol a frame-type/subtype nibble pair and a
//! frame-type-specific body.

use crate::codec::tsfmt::{ts_decode, ts_encode};
use crate::error::RtlsError;
use crate::eui64::Eui64;
use crate::frame::{
    Addr, ConfigPayload, ConfigSubtype, IeKey, IeValue, InformationElement, StandardTail, TailFrame, TAIL_MAGIC_ENC,
    TAIL_MAGIC_STD,
};

const FRAME_TAG_BLINK: u8 = 0;
const FRAME_ANCHOR_BEACON: u8 = 1;
const FRAME_RANGING_REQUEST: u8 = 2;
const FRAME_RANGING_RESPONSE: u8 = 3;
const FRAME_CONFIG_REQUEST: u8 = 4;
const FRAME_CONFIG_RESPONSE: u8 = 5;
const FRAME_ANCHOR_AUX: u8 = 15;

fn test_bit(data: u8, pos: u32) -> bool {
    data & (1 << pos) != 0
}

fn get_bits(data: u8, pos: u32, count: u32) -> u8 {
    (data >> pos) & ((1u16 << count) - 1) as u8
}

fn make_bits(data: u8, pos: u32) -> u8 {
    data << pos
}

fn addr_is_extended(addr: &Addr) -> bool {
    matches!(addr, Addr::Extended(_))
}

fn addr_to_wire(addr: &Addr, out: &mut Vec<u8>) {
    match addr {
        Addr::Short(a) => out.extend_from_slice(&a.to_be_bytes()),
        Addr::Extended(e) => out.extend_from_slice(&e.to_wire()),
    }
}

fn addr_from_wire(buf: &[u8], extended: bool) -> Result<(Addr, usize), RtlsError> {
    if extended {
        if buf.len() < 8 {
            return Err(RtlsError::ParseError("truncated extended ranging address".into()));
        }
        let mut wire = [0u8; 8];
        wire.copy_from_slice(&buf[..8]);
        Ok((Addr::Extended(Eui64::from_wire(wire)), 8))
    } else {
        if buf.len() < 2 {
            return Err(RtlsError::ParseError("truncated short ranging address".into()));
        }
        Ok((Addr::Short(u16::from_be_bytes([buf[0], buf[1]])), 2))
    }
}

/// Encode the address-presence bitmap shared by `RangingResponse` and
/// `AnchorAux`: one bit per address (set when extended), packed LSB-first
/// into `ceil(cnt/8)` bytes.
fn encode_addr_bitmap(addrs: &[Addr]) -> Vec<u8> {
    let mut bytes = vec![0u8; addrs.len().div_ceil(8)];
    for (i, addr) in addrs.iter().enumerate() {
        if addr_is_extended(addr) {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

fn decode_addr_bitmap(buf: &[u8], cnt: usize) -> Result<(Vec<bool>, usize), RtlsError> {
    let nbytes = cnt.div_ceil(8);
    if buf.len() < nbytes {
        return Err(RtlsError::ParseError("truncated address bitmap".into()));
    }
    let mut bits = Vec::with_capacity(cnt);
    for i in 0..cnt {
        bits.push(buf[i / 8] & (1 << (i % 8)) != 0);
    }
    Ok((bits, nbytes))
}

fn encode_ie(ie: &InformationElement, out: &mut Vec<u8>) {
    let id = match &ie.key {
        IeKey::Batt => 0x00,
        IeKey::Vreg => 0x01,
        IeKey::Temp => 0x02,
        IeKey::Vbatt => 0x40,
        IeKey::Blinks => 0x80,
        IeKey::Debug => 0xff,
        IeKey::Unknown(id) => *id,
    };
    out.push(id);
    match &ie.raw {
        IeValue::U8(v) => out.push(*v),
        IeValue::U16(v) => out.extend_from_slice(&v.to_le_bytes()),
        IeValue::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
        IeValue::Bytes(b) => {
            out.push(b.len() as u8);
            out.extend_from_slice(b);
        }
    }
}

fn convert_ie(id: u8, raw: &IeValue) -> Option<f64> {
    let as_i8 = |v: &IeValue| match v {
        IeValue::U8(x) => *x as i8 as f64,
        _ => 0.0,
    };
    let as_u16 = |v: &IeValue| match v {
        IeValue::U16(x) => *x as f64,
        _ => 0.0,
    };
    match id {
        0x01 => Some(((as_i8(raw) / 173.0 + 3.300) * 1000.0).round() / 1000.0),
        0x02 => Some(((as_i8(raw) / 1.14 + 23.0) * 100.0).round() / 100.0),
        0x40 => Some(((as_u16(raw) * 5.0 / 32768.0) * 1000.0).round() / 1000.0),
        _ => None,
    }
}

fn decode_ie(buf: &[u8]) -> Result<(InformationElement, usize), RtlsError> {
    if buf.is_empty() {
        return Err(RtlsError::ParseError("truncated IE id".into()));
    }
    let id = buf[0];
    let idf = get_bits(id, 6, 2);
    let body = &buf[1..];
    let (raw, consumed) = match idf {
        0 => {
            if body.is_empty() {
                return Err(RtlsError::ParseError("truncated IE u8 value".into()));
            }
            (IeValue::U8(body[0]), 1)
        }
        1 => {
            if body.len() < 2 {
                return Err(RtlsError::ParseError("truncated IE u16 value".into()));
            }
            (IeValue::U16(u16::from_le_bytes([body[0], body[1]])), 2)
        }
        2 => {
            if body.len() < 4 {
                return Err(RtlsError::ParseError("truncated IE u32 value".into()));
            }
            (IeValue::U32(u32::from_le_bytes([body[0], body[1], body[2], body[3]])), 4)
        }
        _ => {
            if body.is_empty() {
                return Err(RtlsError::ParseError("truncated IE pascal-string length".into()));
            }
            let len = body[0] as usize;
            if body.len() < 1 + len {
                return Err(RtlsError::ParseError("truncated IE pascal-string body".into()));
            }
            (IeValue::Bytes(body[1..1 + len].to_vec()), 1 + len)
        }
    };
    let converted = convert_ie(id, &raw);
    Ok((
        InformationElement {
            key: IeKey::from_id(id),
            raw,
            converted,
        },
        1 + consumed,
    ))
}

// Keys are held as hex-formatted ids, not the device's real numeric key
// ids, so there is nothing to write here; the 0u16 is a placeholder, not
// a round-trip of the original id.
fn encode_config_payload(subtype: ConfigSubtype, payload: &ConfigPayload, out: &mut Vec<u8>) {
    match (subtype, payload) {
        (ConfigSubtype::Reset, _) => {}
        (ConfigSubtype::Enumerate, ConfigPayload::Keys(keys)) => {
            out.push(keys.len() as u8);
        }
        (ConfigSubtype::Read, ConfigPayload::Keys(keys)) => {
            out.push(keys.len() as u8);
            for _ in keys {
                out.extend_from_slice(&0u16.to_le_bytes());
            }
        }
        (ConfigSubtype::Write, ConfigPayload::KeyValue(kvs)) => {
            out.push(kvs.len() as u8);
            for (_, val) in kvs {
                out.extend_from_slice(&0u16.to_le_bytes());
                out.push(val.len() as u8);
                out.extend_from_slice(val);
            }
        }
        (ConfigSubtype::Delete, ConfigPayload::Keys(keys)) => {
            out.push(keys.len() as u8);
            for _ in keys {
                out.extend_from_slice(&0u16.to_le_bytes());
            }
        }
        (ConfigSubtype::Salt, ConfigPayload::KeyValue(kvs)) => {
            let salt = kvs.first().map(|(_, v)| v.clone()).unwrap_or_else(|| vec![0u8; 16]);
            out.extend_from_slice(&salt);
        }
        (ConfigSubtype::Test, ConfigPayload::KeyValue(kvs)) => {
            let test = kvs.first().map(|(_, v)| v.clone()).unwrap_or_else(|| vec![0u8; 16]);
            out.extend_from_slice(&test);
        }
        _ => {}
    }
}

/// Decode a CONFIG_REQUEST/CONFIG_RESPONSE body. Only the wire shapes
/// needed to round-trip are modeled; key names are not resolvable without
/// the device's live key table, so keys are carried as their numeric id
/// formatted in hex (spec §4.2's "CONFIG_REQUEST/RESPONSE schema
/// resolution").
fn decode_config_payload(subtype: ConfigSubtype, buf: &[u8]) -> Result<(ConfigPayload, usize), RtlsError> {
    match subtype {
        ConfigSubtype::Reset => Ok((ConfigPayload::Empty, 0)),
        ConfigSubtype::Enumerate | ConfigSubtype::Read | ConfigSubtype::Delete => {
            if buf.is_empty() {
                return Err(RtlsError::ParseError("truncated config key count".into()));
            }
            let cnt = buf[0] as usize;
            let mut ptr = 1;
            let mut keys = Vec::with_capacity(cnt);
            for _ in 0..cnt {
                if buf.len() < ptr + 2 {
                    return Err(RtlsError::ParseError("truncated config key".into()));
                }
                let key = u16::from_le_bytes([buf[ptr], buf[ptr + 1]]);
                keys.push(format!("{key:#06x}"));
                ptr += 2;
            }
            Ok((ConfigPayload::Keys(keys), ptr))
        }
        ConfigSubtype::Write => {
            if buf.is_empty() {
                return Err(RtlsError::ParseError("truncated config key count".into()));
            }
            let cnt = buf[0] as usize;
            let mut ptr = 1;
            let mut kvs = Vec::with_capacity(cnt);
            for _ in 0..cnt {
                if buf.len() < ptr + 3 {
                    return Err(RtlsError::ParseError("truncated config write entry".into()));
                }
                let key = u16::from_le_bytes([buf[ptr], buf[ptr + 1]]);
                let len = buf[ptr + 2] as usize;
                ptr += 3;
                if buf.len() < ptr + len {
                    return Err(RtlsError::ParseError("truncated config write value".into()));
                }
                kvs.push((format!("{key:#06x}"), buf[ptr..ptr + len].to_vec()));
                ptr += len;
            }
            Ok((ConfigPayload::KeyValue(kvs), ptr))
        }
        ConfigSubtype::Salt | ConfigSubtype::Test => {
            if buf.len() < 16 {
                return Err(RtlsError::ParseError("truncated config salt/test payload".into()));
            }
            Ok((ConfigPayload::KeyValue(vec![("value".into(), buf[..16].to_vec())]), 16))
        }
    }
}

pub fn encode_tail(tail: &TailFrame) -> Vec<u8> {
    match tail {
        TailFrame::Raw(payload) => payload.clone(),
        TailFrame::Encrypted(payload) => {
            let mut out = vec![TAIL_MAGIC_ENC];
            out.extend_from_slice(payload);
            out
        }
        TailFrame::Standard(std_tail) => {
            let mut out = vec![TAIL_MAGIC_STD];
            encode_standard(std_tail, &mut out);
            out
        }
    }
}

fn encode_standard(tail: &StandardTail, out: &mut Vec<u8>) {
    match tail {
        StandardTail::TagBlink { flags, cookie, ies } => {
            let mut subtype = 0u8;
            if cookie.is_some() {
                subtype |= 1 << 3;
            }
            if !ies.is_empty() {
                subtype |= 1 << 2;
            }
            out.push(make_bits(FRAME_TAG_BLINK, 4) | get_bits(subtype, 0, 4));
            out.push(*flags);
            if let Some(cookie) = cookie {
                out.extend_from_slice(cookie);
            }
            if !ies.is_empty() {
                out.push(ies.len() as u8);
                for ie in ies {
                    encode_ie(ie, out);
                }
            }
        }
        StandardTail::AnchorBeacon { flags, beacon_ref } => {
            out.push(make_bits(FRAME_ANCHOR_BEACON, 4));
            out.push(*flags);
            let mut reversed = *beacon_ref;
            reversed.reverse();
            out.extend_from_slice(&reversed);
        }
        StandardTail::RangingRequest { payload } => {
            out.push(make_bits(FRAME_RANGING_REQUEST, 4));
            out.extend_from_slice(payload);
        }
        StandardTail::RangingResponse { owr, tx_ts, rx_ts } => {
            let subtype = if *owr { 1 << 3 } else { 0 };
            out.push(make_bits(FRAME_RANGING_RESPONSE, 4) | get_bits(subtype, 0, 4));
            out.extend_from_slice(&ts_encode(*tx_ts));
            if !*owr {
                out.push(rx_ts.len() as u8);
                let addrs: Vec<Addr> = rx_ts.iter().map(|(a, _)| *a).collect();
                out.extend_from_slice(&encode_addr_bitmap(&addrs));
                for (addr, ts) in rx_ts {
                    addr_to_wire(addr, out);
                    out.extend_from_slice(&ts_encode(*ts));
                }
            }
        }
        StandardTail::ConfigRequest { subtype, payload } => {
            out.push(make_bits(FRAME_CONFIG_REQUEST, 4) | get_bits(*subtype as u8, 0, 4));
            encode_config_payload(*subtype, payload, out);
        }
        StandardTail::ConfigResponse { subtype, payload } => {
            out.push(make_bits(FRAME_CONFIG_RESPONSE, 4) | get_bits(*subtype as u8, 0, 4));
            encode_config_payload(*subtype, payload, out);
        }
        StandardTail::AnchorAux {
            timing,
            txtime,
            rxtimes,
            rxinfos,
        } => {
            let mut subtype = 0u8;
            if *timing {
                subtype |= 1 << 3;
            }
            if txtime.is_some() {
                subtype |= 1 << 2;
            }
            if rxtimes.is_some() {
                subtype |= 1 << 1;
            }
            if rxinfos.is_some() {
                subtype |= 1;
            }
            out.push(make_bits(FRAME_ANCHOR_AUX, 4) | get_bits(subtype, 0, 4));
            if let Some(txtime) = txtime {
                out.extend_from_slice(&ts_encode(*txtime));
            }
            let addrs: Option<Vec<Addr>> = rxtimes
                .as_ref()
                .map(|v| v.iter().map(|(a, _)| *a).collect())
                .or_else(|| rxinfos.as_ref().map(|v| v.iter().map(|(a, _)| *a).collect()));
            if let Some(addrs) = addrs {
                out.push(addrs.len() as u8);
                out.extend_from_slice(&encode_addr_bitmap(&addrs));
                for (i, addr) in addrs.iter().enumerate() {
                    addr_to_wire(addr, out);
                    if let Some(rxtimes) = rxtimes {
                        out.extend_from_slice(&ts_encode(rxtimes[i].1));
                    }
                    if let Some(rxinfos) = rxinfos {
                        for v in rxinfos[i].1 {
                            out.extend_from_slice(&v.to_le_bytes());
                        }
                    }
                }
            }
        }
    }
}

pub fn decode_tail(buf: &[u8]) -> Result<TailFrame, RtlsError> {
    if buf.is_empty() {
        return Ok(TailFrame::Raw(Vec::new()));
    }
    match buf[0] {
        TAIL_MAGIC_STD => Ok(TailFrame::Standard(decode_standard(&buf[1..])?)),
        TAIL_MAGIC_ENC => Ok(TailFrame::Encrypted(buf[1..].to_vec())),
        _ => Ok(TailFrame::Raw(buf.to_vec())),
    }
}

fn decode_standard(buf: &[u8]) -> Result<StandardTail, RtlsError> {
    if buf.is_empty() {
        return Err(RtlsError::ParseError("truncated tail frame/subtype byte".into()));
    }
    let frame = buf[0];
    let frame_type = get_bits(frame, 4, 4);
    let subtype = get_bits(frame, 0, 4);
    let mut ptr = 1usize;

    match frame_type {
        FRAME_TAG_BLINK => {
            let ies_present = test_bit(subtype, 2);
            let cookie_present = test_bit(subtype, 3);
            let eies_present = test_bit(subtype, 1);
            if eies_present {
                return Err(RtlsError::ParseError("EIEs are not implemented".into()));
            }
            if buf.len() < ptr + 1 {
                return Err(RtlsError::ParseError("truncated tag blink flags".into()));
            }
            let flags = buf[ptr];
            ptr += 1;
            let mut cookie = None;
            if cookie_present {
                if buf.len() < ptr + 16 {
                    return Err(RtlsError::ParseError("truncated tag blink cookie".into()));
                }
                let mut c = [0u8; 16];
                c.copy_from_slice(&buf[ptr..ptr + 16]);
                cookie = Some(c);
                ptr += 16;
            }
            let mut ies = Vec::new();
            if ies_present {
                if buf.len() < ptr + 1 {
                    return Err(RtlsError::ParseError("truncated IE count".into()));
                }
                let cnt = buf[ptr] as usize;
                ptr += 1;
                for _ in 0..cnt {
                    let (ie, consumed) = decode_ie(&buf[ptr..])?;
                    ies.push(ie);
                    ptr += consumed;
                }
            }
            Ok(StandardTail::TagBlink { flags, cookie, ies })
        }
        FRAME_ANCHOR_BEACON => {
            if buf.len() < ptr + 9 {
                return Err(RtlsError::ParseError("truncated anchor beacon".into()));
            }
            let flags = buf[ptr];
            ptr += 1;
            let mut beacon_ref = [0u8; 8];
            beacon_ref.copy_from_slice(&buf[ptr..ptr + 8]);
            beacon_ref.reverse();
            Ok(StandardTail::AnchorBeacon { flags, beacon_ref })
        }
        FRAME_RANGING_REQUEST => Ok(StandardTail::RangingRequest {
            payload: buf[ptr..].to_vec(),
        }),
        FRAME_RANGING_RESPONSE => {
            let owr = test_bit(subtype, 3);
            if buf.len() < ptr + 5 {
                return Err(RtlsError::ParseError("truncated ranging response tx time".into()));
            }
            let tx_ts = ts_decode(&buf[ptr..ptr + 5]).ok_or(RtlsError::BadTimes)?;
            ptr += 5;
            let mut rx_ts = Vec::new();
            if !owr {
                if buf.len() < ptr + 1 {
                    return Err(RtlsError::ParseError("truncated ranging response count".into()));
                }
                let cnt = buf[ptr] as usize;
                ptr += 1;
                let (bits, bitmap_len) = decode_addr_bitmap(&buf[ptr..], cnt)?;
                ptr += bitmap_len;
                for extended in bits {
                    let (addr, consumed) = addr_from_wire(&buf[ptr..], extended)?;
                    ptr += consumed;
                    if buf.len() < ptr + 5 {
                        return Err(RtlsError::ParseError("truncated ranging response rx time".into()));
                    }
                    let rxtime = ts_decode(&buf[ptr..ptr + 5]).ok_or(RtlsError::BadTimes)?;
                    ptr += 5;
                    rx_ts.push((addr, rxtime));
                }
            }
            Ok(StandardTail::RangingResponse { owr, tx_ts, rx_ts })
        }
        FRAME_CONFIG_REQUEST => {
            let subtype = ConfigSubtype::decode(subtype)
                .ok_or_else(|| RtlsError::ParseError(format!("unknown config request subtype {subtype}")))?;
            let (payload, _) = decode_config_payload(subtype, &buf[ptr..])?;
            Ok(StandardTail::ConfigRequest { subtype, payload })
        }
        FRAME_CONFIG_RESPONSE => {
            let subtype = ConfigSubtype::decode(subtype)
                .ok_or_else(|| RtlsError::ParseError(format!("unknown config response subtype {subtype}")))?;
            let (payload, _) = decode_config_payload(subtype, &buf[ptr..])?;
            Ok(StandardTail::ConfigResponse { subtype, payload })
        }
        FRAME_ANCHOR_AUX => {
            let timing = test_bit(subtype, 3);
            let want_txtime = test_bit(subtype, 2);
            let want_rxtime = test_bit(subtype, 1);
            let want_rxinfo = test_bit(subtype, 0);
            let mut txtime = None;
            if want_txtime {
                if buf.len() < ptr + 5 {
                    return Err(RtlsError::ParseError("truncated anchor aux tx time".into()));
                }
                txtime = Some(ts_decode(&buf[ptr..ptr + 5]).ok_or(RtlsError::BadTimes)?);
                ptr += 5;
            }
            let mut rxtimes = if want_rxtime { Some(Vec::new()) } else { None };
            let mut rxinfos = if want_rxinfo { Some(Vec::new()) } else { None };
            if want_rxtime || want_rxinfo {
                if buf.len() < ptr + 1 {
                    return Err(RtlsError::ParseError("truncated anchor aux count".into()));
                }
                let cnt = buf[ptr] as usize;
                ptr += 1;
                let (bits, bitmap_len) = decode_addr_bitmap(&buf[ptr..], cnt)?;
                ptr += bitmap_len;
                for extended in bits {
                    let (addr, consumed) = addr_from_wire(&buf[ptr..], extended)?;
                    ptr += consumed;
                    if want_rxtime {
                        if buf.len() < ptr + 5 {
                            return Err(RtlsError::ParseError("truncated anchor aux rx time".into()));
                        }
                        let t = ts_decode(&buf[ptr..ptr + 5]).ok_or(RtlsError::BadTimes)?;
                        ptr += 5;
                        rxtimes.as_mut().unwrap().push((addr, t));
                    }
                    if want_rxinfo {
                        if buf.len() < ptr + 8 {
                            return Err(RtlsError::ParseError("truncated anchor aux rx info".into()));
                        }
                        let mut v = [0u16; 4];
                        for (i, slot) in v.iter_mut().enumerate() {
                            *slot = u16::from_le_bytes([buf[ptr + i * 2], buf[ptr + i * 2 + 1]]);
                        }
                        ptr += 8;
                        rxinfos.as_mut().unwrap().push((addr, v));
                    }
                }
            }
            Ok(StandardTail::AnchorAux {
                timing,
                txtime,
                rxtimes,
                rxinfos,
            })
        }
        other => Err(RtlsError::UnsupportedFrame(format!("tail frame type {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::IeKey;

    #[test]
    fn scenario1_tag_blink_decodes_vreg_and_vbatt() {
        // Vreg raw 0x2e (i8 46) -> 46/173 + 3.300 = 3.566; Vbatt raw
        // 0x4000 (16384) -> 16384*5/32768 = 2.500, matching the scenario's
        // expected conversions.
        let mut buf = vec![TAIL_MAGIC_STD];
        buf.push(make_bits(FRAME_TAG_BLINK, 4) | 0b0100); // ies present
        buf.push(0xc0); // flags: listen+accel
        buf.push(2); // 2 IEs
        buf.push(0x01);
        buf.push(0x2e);
        buf.push(0x40);
        buf.extend_from_slice(&16384u16.to_le_bytes());

        let decoded = decode_tail(&buf).unwrap();
        match decoded {
            TailFrame::Standard(StandardTail::TagBlink { flags, ies, .. }) => {
                assert_eq!(flags, 0xc0);
                assert_eq!(ies.len(), 2);
                assert_eq!(ies[0].key, IeKey::Vreg);
                assert!((ies[0].converted.unwrap() - 3.566).abs() < 1e-6);
                assert_eq!(ies[1].key, IeKey::Vbatt);
                assert!((ies[1].converted.unwrap() - 2.500).abs() < 1e-6);
            }
            other => panic!("unexpected decode: {other:?}"),
        }
    }

    #[test]
    fn tag_blink_roundtrips() {
        let tail = TailFrame::Standard(StandardTail::TagBlink {
            flags: 0xc0,
            cookie: Some([9u8; 16]),
            ies: vec![InformationElement {
                key: IeKey::Vreg,
                raw: IeValue::U8(0x2e),
                converted: Some(3.566),
            }],
        });
        let encoded = encode_tail(&tail);
        let decoded = decode_tail(&encoded).unwrap();
        assert_eq!(decoded, tail);
    }

    #[test]
    fn anchor_beacon_reverses_ref_bytes() {
        let tail = TailFrame::Standard(StandardTail::AnchorBeacon {
            flags: 0,
            beacon_ref: [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08],
        });
        let encoded = encode_tail(&tail);
        assert_eq!(&encoded[2..10], &[0x08, 0x07, 0x06, 0x05, 0x04, 0x03, 0x02, 0x01]);
        let decoded = decode_tail(&encoded).unwrap();
        assert_eq!(decoded, tail);
    }

    #[test]
    fn ranging_response_owr_roundtrips() {
        let tail = TailFrame::Standard(StandardTail::RangingResponse {
            owr: true,
            tx_ts: 0x0102030405,
            rx_ts: vec![],
        });
        let encoded = encode_tail(&tail);
        let decoded = decode_tail(&encoded).unwrap();
        assert_eq!(decoded, tail);
    }

    #[test]
    fn ranging_response_multi_anchor_roundtrips() {
        let tail = TailFrame::Standard(StandardTail::RangingResponse {
            owr: false,
            tx_ts: 0x0102030405,
            rx_ts: vec![
                (Addr::Short(0x1234), 0x0a0b0c0d0e),
                (Addr::Extended(Eui64::from_bytes([1, 2, 3, 4, 5, 6, 7, 8])), 0x1112131415),
            ],
        });
        let encoded = encode_tail(&tail);
        let decoded = decode_tail(&encoded).unwrap();
        assert_eq!(decoded, tail);
    }

    #[test]
    fn config_request_reset_roundtrips() {
        let tail = TailFrame::Standard(StandardTail::ConfigRequest {
            subtype: ConfigSubtype::Reset,
            payload: ConfigPayload::Empty,
        });
        let encoded = encode_tail(&tail);
        let decoded = decode_tail(&encoded).unwrap();
        assert_eq!(decoded, tail);
    }

    #[test]
    fn raw_payload_roundtrips_unrecognized_magic() {
        let tail = TailFrame::Raw(vec![0x99, 0x01, 0x02]);
        let encoded = encode_tail(&tail);
        assert_eq!(encoded, vec![0x99, 0x01, 0x02]);
        let decoded = decode_tail(&encoded).unwrap();
        assert_eq!(decoded, tail);
    }

    #[test]
    fn encrypted_payload_is_opaque() {
        let tail = TailFrame::Encrypted(vec![0xaa, 0xbb]);
        let encoded = encode_tail(&tail);
        assert_eq!(encoded[0], TAIL_MAGIC_ENC);
        let decoded = decode_tail(&encoded).unwrap();
        assert_eq!(decoded, tail);
    }
}
