//! Anchor daemon core (spec §10), transcribed from
//! `examples/original_source/anchor/anchord.py`: the module-level `TAGS`
//! registry and RPC handler functions become methods on `AnchorDaemon`;
//! `recv_wpan_rx`/`recv_wpan_tx` become the dispatch loop spawned by
//! `run`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use md5::{Digest, Md5};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use rtls_types::codec::{decode_frame, encode_frame};
use rtls_types::frame::{Addr, Frame, MacHeader, StandardTail, TailFrame};
use rtls_types::Eui64;

use crate::rpc::{Handler, RpcEndpoint};
use crate::transport::MqttTransport;
use crate::wpan::{Direction, WpanEvent, WpanInterface, DW1000_STATS};

struct TagRegistration {
    #[allow(dead_code)]
    registered_at: f64,
}

struct Shared {
    domain: String,
    uuid: Eui64,
    wpan: Arc<dyn WpanInterface>,
    transport: Arc<dyn MqttTransport>,
    tags: Mutex<HashMap<Eui64, TagRegistration>>,
}

/// One running anchor: owns the registered-tag set, the WPAN interface,
/// and the MQTT RF/RPC plumbing. Construct with [`AnchorDaemon::new`],
/// register it against an [`RpcEndpoint`] with [`AnchorDaemon::register_handlers`],
/// then start the frame dispatch loop with [`AnchorDaemon::run`].
pub struct AnchorDaemon {
    shared: Arc<Shared>,
}

impl AnchorDaemon {
    pub fn new(domain: impl Into<String>, wpan: Arc<dyn WpanInterface>, transport: Arc<dyn MqttTransport>) -> Self {
        let uuid = wpan.eui64();
        Self {
            shared: Arc::new(Shared {
                domain: domain.into(),
                uuid,
                wpan,
                transport,
                tags: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn uuid(&self) -> Eui64 {
        self.shared.uuid
    }

    /// `anchord.py`'s `main`: `MRPC.register(...)` calls, one per RPC
    /// function name.
    pub fn register_handlers(&self, rpc: &RpcEndpoint) {
        macro_rules! bind {
            ($name:expr, $method:ident) => {{
                let shared = self.shared.clone();
                rpc.register($name, Box::new(move |args| shared.$method(args)) as Handler);
            }};
        }
        bind!("GETDWSTAT", rpc_get_dwstat);
        bind!("GETDWSTATS", rpc_get_dwstats);
        bind!("GETDTATTR", rpc_get_dtattr);
        bind!("GETDWATTR", rpc_get_dwattr);
        bind!("SETDWATTR", rpc_set_dwattr);
        bind!("GETDWCONFIG", rpc_get_dwconfig);
        bind!("RESET", rpc_reset_tags);
        bind!("REGISTER", rpc_register_tag);
        bind!("UNREGISTER", rpc_unregister_tag);
        bind!("WPAN-XMIT", wpan_xmit_frame);
        bind!("WPAN-BEACON", wpan_xmit_beacon);
    }

    /// `socket_loop`'s dispatch half: spawns a thread draining WPAN
    /// events and forwarding/reacting to them. The `select.poll` I/O
    /// multiplexing itself has no counterpart — `WpanInterface::subscribe`
    /// already delivers events as they occur.
    pub fn run(&self) {
        let rx = self.shared.wpan.subscribe();
        let shared = self.shared.clone();
        std::thread::Builder::new()
            .name("anchord-wpan".into())
            .spawn(move || {
                for event in rx {
                    match event.direction {
                        Direction::Rx => shared.recv_wpan_rx(event),
                        Direction::Tx => shared.recv_wpan_tx(event),
                    }
                }
            })
            .expect("spawn wpan dispatch thread");
    }
}

fn now_secs() -> f64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs_f64()
}

impl Shared {
    fn rpc_reset_tags(&self, _args: Value) -> Value {
        self.tags.lock().unwrap().clear();
        Value::Null
    }

    fn rpc_register_tag(&self, args: Value) -> Value {
        let Some(eui) = parse_eui64_arg(&args) else {
            warn!("REGISTER: malformed EUI64 arg");
            return Value::Null;
        };
        self.tags.lock().unwrap().insert(eui, TagRegistration { registered_at: now_secs() });
        Value::Null
    }

    fn rpc_unregister_tag(&self, args: Value) -> Value {
        if let Some(eui) = parse_eui64_arg(&args) {
            self.tags.lock().unwrap().remove(&eui);
        }
        Value::Null
    }

    fn rpc_get_dtattr(&self, args: Value) -> Value {
        let attr = args.get("ATTR").and_then(Value::as_str).unwrap_or_default();
        let format = args.get("FORMAT").and_then(Value::as_str).unwrap_or_default();
        self.wpan.get_dtattr(attr, format).unwrap_or(Value::Null)
    }

    fn rpc_get_dwstat(&self, args: Value) -> Value {
        let attr = args.get("ATTR").and_then(Value::as_str).unwrap_or_default();
        self.wpan.get_dwstats(attr).unwrap_or(Value::Null)
    }

    fn rpc_get_dwstats(&self, _args: Value) -> Value {
        let mut out = serde_json::Map::new();
        for key in DW1000_STATS {
            out.insert((*key).to_string(), self.wpan.get_dwstats(key).unwrap_or(Value::Null));
        }
        Value::Object(out)
    }

    fn rpc_get_dwattr(&self, args: Value) -> Value {
        let attr = args.get("ATTR").and_then(Value::as_str).unwrap_or_default();
        self.wpan.get_dwattr(attr).unwrap_or(Value::Null)
    }

    fn rpc_set_dwattr(&self, args: Value) -> Value {
        let attr = args.get("ATTR").and_then(Value::as_str).unwrap_or_default();
        let value = args.get("VALUE").cloned().unwrap_or(Value::Null);
        if let Err(err) = self.wpan.set_dwattr(attr, value) {
            warn!("SETDWATTR {attr}: {err}");
        }
        self.wpan.get_dwattr(attr).unwrap_or(Value::Null)
    }

    fn rpc_get_dwconfig(&self, _args: Value) -> Value {
        let mut out = serde_json::Map::new();
        for key in ["channel", "pcode", "prf", "rate", "txpsr", "tx_power"] {
            out.insert(key.to_string(), self.wpan.get_dwattr(key).unwrap_or(Value::Null));
        }
        Value::Object(out)
    }

    fn wpan_xmit_frame(&self, args: Value) -> Value {
        let Some(hex_frame) = args.get("FRAME").and_then(Value::as_str) else {
            warn!("WPAN-XMIT: missing FRAME arg");
            return Value::Null;
        };
        let Ok(bytes) = hex::decode(hex_frame) else {
            warn!("WPAN-XMIT: malformed FRAME hex");
            return Value::Null;
        };
        match decode_frame(&bytes) {
            Ok(frame) => {
                if let Err(err) = self.wpan.send(&frame) {
                    error!("WPAN-XMIT: send failed: {err}");
                }
            }
            Err(err) => warn!("WPAN-XMIT: decode failed: {err}"),
        }
        Value::Null
    }

    /// `wpan_xmit_beacon`: builds a broadcast `ANCHOR_BEACON` Tail frame
    /// carrying the given ranging reference.
    fn wpan_xmit_beacon(&self, args: Value) -> Value {
        let Some(bref_hex) = args.get("BREF").and_then(Value::as_str) else {
            warn!("WPAN-BEACON: missing BREF arg");
            return Value::Null;
        };
        let Ok(bref_bytes) = hex::decode(bref_hex) else {
            warn!("WPAN-BEACON: malformed BREF hex");
            return Value::Null;
        };
        let Ok(beacon_ref): Result<[u8; 8], _> = bref_bytes.try_into() else {
            warn!("WPAN-BEACON: BREF is not 8 bytes");
            return Value::Null;
        };
        let flags = args.get("FLAGS").and_then(Value::as_u64).unwrap_or(0) as u8;
        self.xmit_beacon(beacon_ref, flags);
        Value::Null
    }

    fn xmit_beacon(&self, beacon_ref: [u8; 8], flags: u8) {
        let frame = Frame {
            mac: MacHeader {
                frame_type: 1,
                security: false,
                pending: false,
                ack_req: false,
                panid_comp: true,
                frame_version: 0,
                seqnum: 0,
                dst_pan: None,
                dst_addr: Some(Addr::Extended(Eui64::BROADCAST)),
                src_pan: None,
                src_addr: Some(Addr::Extended(self.uuid)),
            },
            tail: Some(TailFrame::Standard(StandardTail::AnchorBeacon { flags, beacon_ref })),
        };
        if let Err(err) = self.wpan.send(&frame) {
            error!("xmit_beacon: send failed: {err}");
        }
    }

    /// `recv_wpan_rx`: forwards every standard-Tail RX frame as an MQTT RF
    /// message, then auto-beacons a registered tag's blink.
    fn recv_wpan_rx(&self, event: WpanEvent) {
        debug!("recv_wpan_rx: {:?}", event.frame);
        let Some(TailFrame::Standard(tail)) = &event.frame.tail else {
            return;
        };
        self.send_mqtt_rf_msg("RX", &event);
        if let StandardTail::TagBlink { .. } = tail {
            let Some(src) = event.frame.mac.src_eui64() else { return };
            if self.tags.lock().unwrap().contains_key(&src) {
                let seq = event.frame.mac.seqnum;
                let ranging_ref = make_ranging_ref(src, seq);
                self.xmit_beacon(ranging_ref, 0);
            }
        }
    }

    /// `recv_wpan_tx`: every standard-Tail TX completion is mirrored to
    /// MQTT so the server sees both legs of the exchange.
    fn recv_wpan_tx(&self, event: WpanEvent) {
        debug!("recv_wpan_tx: {:?}", event.frame);
        if matches!(&event.frame.tail, Some(TailFrame::Standard(_))) {
            self.send_mqtt_rf_msg("TX", &event);
        }
    }

    fn send_mqtt_rf_msg(&self, dir: &str, event: &WpanEvent) {
        #[derive(Serialize)]
        struct RfTimes {
            #[serde(rename = "SW")]
            sw: u64,
            #[serde(rename = "HW")]
            hw: u64,
            #[serde(rename = "HI")]
            hi: u64,
        }

        let payload = json!({
            "ANCHOR": hex::encode(self.uuid.as_bytes()),
            "DIR": dir,
            "TIMES": RfTimes { sw: event.times.sw, hw: event.times.hw, hi: event.times.hi },
            "FRAME": hex::encode(encode_frame(&event.frame)),
            "FINFO": hex::encode(event.finfo.encode()),
        });
        let topic = format!("TAIL/RF/{}/{}", self.domain, self.uuid);
        self.transport.publish(&topic, &serde_json::to_vec(&payload).expect("serialize RF message"));
    }
}

/// `make_ranging_ref`: `md5(eui64_bytes || seq)[..8]`, identical to the
/// server side's `RFEvent.make_ranging_ref` (spec §4.2).
fn make_ranging_ref(addr: Eui64, seq: u8) -> [u8; 8] {
    let mut hasher = Md5::new();
    hasher.update(addr.as_bytes());
    hasher.update([seq]);
    let digest = hasher.finalize();
    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

fn parse_eui64_arg(args: &Value) -> Option<Eui64> {
    let hex_str = args.get("EUI64").and_then(Value::as_str)?;
    let bytes = hex::decode(hex_str).ok()?;
    let arr: [u8; 8] = bytes.as_slice().try_into().ok()?;
    Some(Eui64::from_bytes(arr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;
    use crate::wpan::SimulatedWpan;

    fn daemon() -> (AnchorDaemon, Arc<LoopbackTransport>, Arc<SimulatedWpan>) {
        let wpan = Arc::new(SimulatedWpan::new(Eui64::from_bytes([9, 9, 9, 9, 9, 9, 9, 9])));
        let transport = Arc::new(LoopbackTransport::new());
        let daemon = AnchorDaemon::new("test", wpan.clone() as Arc<dyn WpanInterface>, transport.clone() as Arc<dyn MqttTransport>);
        (daemon, transport, wpan)
    }

    #[test]
    fn register_then_unregister_clears_tag() {
        let (daemon, _transport, _wpan) = daemon();
        let tag = Eui64::from_bytes([1, 2, 3, 4, 5, 6, 7, 8]);
        daemon.shared.rpc_register_tag(json!({ "EUI64": tag.to_string() }));
        assert!(daemon.shared.tags.lock().unwrap().contains_key(&tag));
        daemon.shared.rpc_unregister_tag(json!({ "EUI64": tag.to_string() }));
        assert!(!daemon.shared.tags.lock().unwrap().contains_key(&tag));
    }

    #[test]
    fn blink_from_registered_tag_triggers_auto_beacon() {
        let (daemon, _transport, wpan) = daemon();
        let tag = Eui64::from_bytes([1, 2, 3, 4, 5, 6, 7, 8]);
        daemon.shared.rpc_register_tag(json!({ "EUI64": tag.to_string() }));

        let blink = Frame {
            mac: MacHeader {
                frame_type: 1,
                security: false,
                pending: false,
                ack_req: false,
                panid_comp: true,
                frame_version: 0,
                seqnum: 7,
                dst_pan: None,
                dst_addr: Some(Addr::Extended(Eui64::BROADCAST)),
                src_pan: None,
                src_addr: Some(Addr::Extended(tag)),
            },
            tail: Some(TailFrame::Standard(StandardTail::TagBlink { flags: 0, cookie: None, ies: vec![] })),
        };

        let tx_events = wpan.subscribe();
        daemon.shared.recv_wpan_rx(WpanEvent {
            direction: Direction::Rx,
            frame: blink,
            times: Default::default(),
            finfo: Default::default(),
        });

        let beacon_event = tx_events.recv_timeout(std::time::Duration::from_millis(100)).unwrap();
        let Some(TailFrame::Standard(StandardTail::AnchorBeacon { beacon_ref, .. })) = beacon_event.frame.tail else {
            panic!("expected an anchor beacon frame");
        };
        assert_eq!(beacon_ref, make_ranging_ref(tag, 7));
    }

    #[test]
    fn rx_frame_is_forwarded_as_rf_message() {
        let (daemon, transport, _wpan) = daemon();
        let rf_rx = transport.subscribe("TAIL/RF/test/#");

        let blink = Frame {
            mac: MacHeader {
                frame_type: 1,
                security: false,
                pending: false,
                ack_req: false,
                panid_comp: true,
                frame_version: 0,
                seqnum: 1,
                dst_pan: None,
                dst_addr: Some(Addr::Extended(Eui64::BROADCAST)),
                src_pan: None,
                src_addr: Some(Addr::Extended(Eui64::from_bytes([1, 1, 1, 1, 1, 1, 1, 1]))),
            },
            tail: Some(TailFrame::Standard(StandardTail::TagBlink { flags: 0, cookie: None, ies: vec![] })),
        };
        daemon.shared.recv_wpan_rx(WpanEvent {
            direction: Direction::Rx,
            frame: blink,
            times: Default::default(),
            finfo: Default::default(),
        });

        let msg = rf_rx.recv_timeout(std::time::Duration::from_millis(100)).unwrap();
        let value: Value = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(value["DIR"], "RX");
    }
}
