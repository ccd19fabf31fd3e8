//! Server orchestration (spec §5 / `SPEC_FULL.md` §9), grounded in
//! `examples/original_source/server/server.py`'s `Server` class: anchor/
//! tag/ranging registries behind locks, RF message dispatch by Tail frame
//! type, and the ranging-session lookup-or-insert that seeds a solver per
//! `config.ranging.algorithm`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use tracing::{debug, warn};

use rtls_types::frame::StandardTail;
use rtls_types::{decode_frame, Eui64, RtlsError, TimestampInfo};

use crate::anchor::Anchor;
use crate::config::RtlsConfig;
use crate::ranging::RangingSession;
use crate::rf_event::{Direction, EventTimes, RfEvent};
use crate::rpc::RpcClient;
use crate::tag::Tag;
use crate::timer::{TimerWheel, TimerWheelHandle};
use crate::transport::MqttTransport;

pub struct Server {
    pub domain: String,
    pub config: RtlsConfig,
    pub transport: Arc<dyn MqttTransport>,
    pub rpc: Arc<RpcClient>,
    pub timers: TimerWheel,
    timer_handle: Mutex<Option<TimerWheelHandle>>,
    anchors: Mutex<HashMap<Eui64, Arc<Anchor>>>,
    tags: Mutex<HashMap<Eui64, Arc<Tag>>>,
    rangings: Mutex<HashMap<[u8; 8], Arc<RangingSession>>>,
}

impl Server {
    /// Mirrors `Server.__init__`: connects the transport, subscribes to
    /// the domain's RF topic, starts the timer thread, then registers
    /// every configured anchor and tag (each anchor spawns its own
    /// maintenance thread as soon as it's added).
    pub fn new(config: RtlsConfig, transport: Arc<dyn MqttTransport>) -> Arc<Self> {
        let domain = config.rtls.mqtt_domain.clone();
        let rpcid = config.rtls.mqrpc_id.clone();
        let rpc = Arc::new(RpcClient::new(transport.clone(), rpcid));
        let handle = TimerWheel::spawn();
        let timers = handle.wheel().clone();

        let anchors_cfg = config.anchors.clone();
        let tags_cfg = config.tags.clone();

        let server = Arc::new(Self {
            domain,
            config,
            transport,
            rpc,
            timers,
            timer_handle: Mutex::new(Some(handle)),
            anchors: Mutex::new(HashMap::new()),
            tags: Mutex::new(HashMap::new()),
            rangings: Mutex::new(HashMap::new()),
        });

        for entry in &anchors_cfg {
            match entry.parsed_eui64() {
                Ok(eui64) => server.add_anchor(entry.name.clone(), eui64, entry.parsed_coord()),
                Err(err) => warn!("skipping anchor {}: {err}", entry.name),
            }
        }
        for entry in &tags_cfg {
            match entry.parsed_eui64() {
                Ok(eui64) => server.add_tag(entry.name.clone(), eui64),
                Err(err) => warn!("skipping tag {}: {err}", entry.name),
            }
        }

        server
    }

    pub fn stop(&self) {
        debug!("stopping server");
        for anchor in self.anchors.lock().unwrap().values() {
            anchor.stop();
        }
        if let Some(handle) = self.timer_handle.lock().unwrap().take() {
            drop(handle);
        }
    }

    pub fn add_anchor(self: &Arc<Self>, name: String, eui64: Eui64, coord: rtls_types::Coord3) {
        debug!("add_anchor {name} <{eui64}>");
        let anchor = Arc::new(Anchor::spawn(name, eui64, coord, self.rpc.clone()));
        self.anchors.lock().unwrap().insert(eui64, anchor);
    }

    pub fn rem_anchor(&self, eui64: Eui64) {
        debug!("rem_anchor <{eui64}>");
        self.anchors.lock().unwrap().remove(&eui64);
    }

    pub fn get_anchor(&self, key: Eui64) -> Option<Arc<Anchor>> {
        self.anchors.lock().unwrap().get(&key).cloned()
    }

    pub fn get_anchor_by_name(&self, name: &str) -> Option<Arc<Anchor>> {
        self.anchors.lock().unwrap().values().find(|a| a.name == name).cloned()
    }

    pub fn anchors_snapshot(&self) -> Vec<Arc<Anchor>> {
        self.anchors.lock().unwrap().values().cloned().collect()
    }

    pub fn anchor_keys(&self) -> Vec<Eui64> {
        self.anchors.lock().unwrap().keys().copied().collect()
    }

    pub fn add_tag(self: &Arc<Self>, name: String, eui64: Eui64) {
        debug!("add_tag {name} <{eui64}>");
        let coord_cfg = &self.config.coord;
        let tag = Arc::new(Tag::new(
            name,
            eui64,
            self.domain.clone(),
            self.transport.clone(),
            coord_cfg.filter_len,
            coord_cfg.qc_filter_len,
            coord_cfg.qc_filter_dev,
        ));
        self.tags.lock().unwrap().insert(eui64, tag);
    }

    pub fn rem_tag(&self, eui64: Eui64) {
        debug!("rem_tag <{eui64}>");
        self.tags.lock().unwrap().remove(&eui64);
    }

    pub fn get_tag(&self, key: Eui64) -> Option<Arc<Tag>> {
        self.tags.lock().unwrap().get(&key).cloned()
    }

    pub fn get_tag_by_name(&self, name: &str) -> Option<Arc<Tag>> {
        self.tags.lock().unwrap().values().find(|t| t.name == name).cloned()
    }

    /// `Server.get_lat_algo`: resolves the configured algorithm to a
    /// constructor. `wls3d` really constructs the 3D solver here — the
    /// source maps it to `LatWLS2D`, recorded as a fixed bug in
    /// `DESIGN.md` (spec §9 Open Question #1).
    fn get_lat_algo(self: &Arc<Self>, rangid: [u8; 8]) -> Option<Arc<RangingSession>> {
        let algo = self.config.ranging.algorithm()?;
        Some(Arc::new(RangingSession::new(self.clone(), rangid, algo)))
    }

    /// `Server.get_ranging`: lookup-or-insert keyed consistently by the
    /// ranging reference (spec §9 Open Question #2 — the source keys
    /// insertion by `ref` but deletion by `rng.rangid`, a latent bug this
    /// resolves by using one key throughout).
    fn get_ranging(self: &Arc<Self>, rangid: [u8; 8]) -> Option<Arc<RangingSession>> {
        let mut rangings = self.rangings.lock().unwrap();
        if let Some(existing) = rangings.get(&rangid) {
            return Some(existing.clone());
        }
        drop(rangings);
        let session = self.get_lat_algo(rangid)?;
        session.start();
        self.rangings.lock().unwrap().insert(rangid, session.clone());
        Some(session)
    }

    pub fn finish_ranging(&self, rangid: &[u8; 8]) {
        self.rangings.lock().unwrap().remove(rangid);
    }

    fn recv_tag_blink(self: &Arc<Self>, evnt: RfEvent) {
        let Some(rangid) = evnt.get_ranging_ref() else { return };
        if let Some(rng) = self.get_ranging(rangid) {
            rng.add_blink(evnt);
        }
    }

    fn recv_anchor_beacon(self: &Arc<Self>, evnt: RfEvent) {
        let Some(rangid) = evnt.get_ranging_ref() else { return };
        if let Some(rng) = self.get_ranging(rangid) {
            rng.add_beacon(evnt);
        }
    }

    fn recv_ranging_req(self: &Arc<Self>, evnt: RfEvent) {
        let Some(rangid) = evnt.get_ranging_ref() else { return };
        if let Some(rng) = self.get_ranging(rangid) {
            rng.add_request(evnt);
        }
    }

    fn recv_ranging_resp(self: &Arc<Self>, evnt: RfEvent) {
        let Some(rangid) = evnt.get_ranging_ref() else { return };
        if let Some(rng) = self.get_ranging(rangid) {
            rng.add_response(evnt);
        }
    }

    /// `Server.recv_rf_msg`: decodes the wire frame, builds an `RfEvent`,
    /// and dispatches by Tail frame type. Parse/decode failures are
    /// logged and dropped, never propagated (spec §7).
    pub fn recv_rf_msg(
        self: &Arc<Self>,
        anchor: Eui64,
        direction: Direction,
        times: EventTimes,
        frame_bytes: &[u8],
        finfo_bytes: &[u8],
    ) {
        let Some(anchor_dev) = self.get_anchor(anchor) else {
            warn!("recv_rf_msg: unknown anchor <{anchor}>");
            return;
        };
        let _ = &anchor_dev;

        let frame = match decode_frame(frame_bytes) {
            Ok(frame) => frame,
            Err(err) => {
                warn!("recv_rf_msg: frame decode failed: {err}");
                return;
            }
        };
        let Some(finfo) = TimestampInfo::decode(finfo_bytes) else {
            warn!("recv_rf_msg: finfo decode failed");
            return;
        };

        let evnt = RfEvent::new(anchor, direction, times, frame, finfo);
        debug!("{anchor} <{direction:?}> {:?}", evnt.frame.tail);

        let Some(rtls_types::TailFrame::Standard(tail)) = evnt.frame.tail.as_ref() else {
            return;
        };
        match tail {
            StandardTail::TagBlink { .. } => self.recv_tag_blink(evnt),
            StandardTail::AnchorBeacon { .. } => self.recv_anchor_beacon(evnt),
            StandardTail::RangingRequest { .. } => self.recv_ranging_req(evnt),
            StandardTail::RangingResponse { .. } => self.recv_ranging_resp(evnt),
            StandardTail::ConfigRequest { .. } | StandardTail::ConfigResponse { .. } => {}
            StandardTail::AnchorAux { .. } => {
                warn!("recv_rf_msg: ANCHOR_AUX frames are not dispatched by the correlator");
            }
        }
    }

    pub fn mqtt_publish(&self, topic: &str, payload: &[u8]) -> Result<(), RtlsError> {
        self.transport.publish(topic, payload);
        Ok(())
    }

    /// `Server.__init__`'s `mqtt.subscribe('TAIL/RF/{domain}/#')` plus
    /// `mqtt_on_rf_message`: subscribes to the domain's RF topic and
    /// spawns a dispatch thread that decodes each JSON RF message and
    /// feeds `recv_rf_msg`. Malformed messages are logged and dropped
    /// (`mqtt_on_rf_message`'s bare `except Exception`).
    pub fn start_rf_listener(self: &Arc<Self>) {
        let topic = format!("TAIL/RF/{}/#", self.domain);
        let rx = self.transport.subscribe(&topic);
        let server = self.clone();
        std::thread::Builder::new()
            .name("rtls-rf-listener".into())
            .spawn(move || {
                for msg in rx {
                    match serde_json::from_slice::<RfMessage>(&msg.payload) {
                        Ok(rf) => server.handle_rf_message(rf),
                        Err(err) => warn!("unable to handle RF message on {}: {err}", msg.topic),
                    }
                }
            })
            .expect("spawn rf listener thread");
    }

    fn handle_rf_message(self: &Arc<Self>, rf: RfMessage) {
        let Ok(anchor_bytes) = hex::decode(&rf.anchor) else {
            warn!("recv_rf_msg: malformed ANCHOR {}", rf.anchor);
            return;
        };
        let Ok(anchor_arr): Result<[u8; 8], _> = anchor_bytes.try_into() else {
            warn!("recv_rf_msg: ANCHOR is not 8 bytes");
            return;
        };
        let direction = match rf.dir.as_str() {
            "RX" => Direction::Rx,
            "TX" => Direction::Tx,
            other => {
                warn!("recv_rf_msg: unknown DIR {other}");
                return;
            }
        };
        let Ok(frame_bytes) = hex::decode(&rf.frame) else {
            warn!("recv_rf_msg: malformed FRAME hex");
            return;
        };
        let Ok(finfo_bytes) = hex::decode(&rf.finfo) else {
            warn!("recv_rf_msg: malformed FINFO hex");
            return;
        };
        self.recv_rf_msg(
            Eui64::from_bytes(anchor_arr),
            direction,
            EventTimes { sw: rf.times.sw, hw: rf.times.hw, hi: rf.times.hi },
            &frame_bytes,
            &finfo_bytes,
        );
    }
}

#[derive(Debug, Deserialize)]
struct RfTimes {
    #[serde(rename = "SW", default)]
    sw: u64,
    #[serde(rename = "HW", default)]
    hw: u64,
    #[serde(rename = "HI", default)]
    hi: u64,
}

#[derive(Debug, Deserialize)]
struct RfMessage {
    #[serde(rename = "ANCHOR")]
    anchor: String,
    #[serde(rename = "DIR")]
    dir: String,
    #[serde(rename = "TIMES")]
    times: RfTimes,
    #[serde(rename = "FRAME")]
    frame: String,
    #[serde(rename = "FINFO")]
    finfo: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtls_types::frame::{Addr, MacHeader, TailFrame};
    use rtls_types::{encode_frame, Coord3, Frame};

    use crate::config::{AnchorEntry, CoordSection, Dw1000Section, RangingSection, RtlsSection, TagEntry};

    fn anchor_key(n: u8) -> Eui64 {
        Eui64::from_bytes([0, 0, 0, 0, 0, 0, 0, n])
    }

    fn tag_key(n: u8) -> Eui64 {
        Eui64::from_bytes([0xa0, 0, 0, 0, 0, 0, 0, n])
    }

    fn test_config(anchor_names: &[(&str, Eui64)], tag_names: &[(&str, Eui64)]) -> RtlsConfig {
        RtlsConfig {
            rtls: RtlsSection { mqtt_domain: "test".into(), mqrpc_id: "rtls-server".into() },
            dw1000: Dw1000Section { channel: 5, prf: 64, verbose: false },
            ranging: RangingSection {
                algorithm: "wls2d".into(),
                ranging_timer: 0.1,
                timeout_timer: 5.0,
                max_dist: 100.0,
                force_beacon: None,
                force_common: None,
            },
            coord: CoordSection { filter_len: 8, qc_filter_len: 32, qc_filter_dev: 1.0 },
            anchors: anchor_names
                .iter()
                .map(|(name, eui)| AnchorEntry { name: (*name).to_string(), eui64: eui.to_string(), coord: [0.0, 0.0, 0.0] })
                .collect(),
            tags: tag_names.iter().map(|(name, eui)| TagEntry { name: (*name).to_string(), eui64: eui.to_string() }).collect(),
        }
    }

    fn blink_wire(src: Eui64, seq: u8) -> (Vec<u8>, Vec<u8>) {
        let frame = Frame {
            mac: MacHeader {
                frame_type: 1,
                security: false,
                pending: false,
                ack_req: false,
                panid_comp: true,
                frame_version: 0,
                seqnum: seq,
                dst_pan: Some(0x2a),
                dst_addr: Some(Addr::Short(0xffff)),
                src_pan: Some(0x2a),
                src_addr: Some(Addr::Extended(src)),
            },
            tail: Some(TailFrame::Standard(StandardTail::TagBlink { flags: 0, cookie: None, ies: vec![] })),
        };
        (encode_frame(&frame), TimestampInfo { rawts: 12345, ..Default::default() }.encode())
    }

    #[test]
    fn recv_rf_msg_creates_a_ranging_session_for_a_known_tag_blink() {
        let anchor = anchor_key(1);
        let tag = tag_key(1);
        let config = test_config(&[("anc0", anchor)], &[("tag0", tag)]);
        let server = Server::new(config, Arc::new(crate::transport::LoopbackTransport::new()));

        let (frame_bytes, finfo_bytes) = blink_wire(tag, 7);
        server.recv_rf_msg(anchor, Direction::Rx, EventTimes::default(), &frame_bytes, &finfo_bytes);

        assert_eq!(server.rangings.lock().unwrap().len(), 1);
        server.stop();
    }

    #[test]
    fn recv_rf_msg_drops_frames_from_an_unregistered_anchor() {
        let anchor = anchor_key(1);
        let unknown = anchor_key(99);
        let tag = tag_key(1);
        let config = test_config(&[("anc0", anchor)], &[("tag0", tag)]);
        let server = Server::new(config, Arc::new(crate::transport::LoopbackTransport::new()));

        let (frame_bytes, finfo_bytes) = blink_wire(tag, 1);
        server.recv_rf_msg(unknown, Direction::Rx, EventTimes::default(), &frame_bytes, &finfo_bytes);

        assert!(server.rangings.lock().unwrap().is_empty());
        server.stop();
    }

    #[test]
    fn get_ranging_reuses_the_same_session_for_the_same_blink() {
        let anchor = anchor_key(1);
        let tag = tag_key(1);
        let config = test_config(&[("anc0", anchor)], &[("tag0", tag)]);
        let server = Server::new(config, Arc::new(crate::transport::LoopbackTransport::new()));

        let (frame_bytes, finfo_bytes) = blink_wire(tag, 3);
        server.recv_rf_msg(anchor, Direction::Rx, EventTimes::default(), &frame_bytes, &finfo_bytes);
        server.recv_rf_msg(anchor, Direction::Rx, EventTimes::default(), &frame_bytes, &finfo_bytes);

        assert_eq!(server.rangings.lock().unwrap().len(), 1);
        server.stop();
    }

    #[test]
    fn finish_ranging_removes_the_session_from_the_registry() {
        let anchor = anchor_key(1);
        let tag = tag_key(1);
        let config = test_config(&[("anc0", anchor)], &[("tag0", tag)]);
        let server = Server::new(config, Arc::new(crate::transport::LoopbackTransport::new()));

        let rangid = [9u8; 8];
        let session = server.get_lat_algo(rangid).expect("wls2d resolves to a solver");
        session.start();
        server.rangings.lock().unwrap().insert(rangid, session);

        server.finish_ranging(&rangid);
        assert!(server.rangings.lock().unwrap().is_empty());
        server.stop();
    }

    #[test]
    fn add_anchor_and_get_anchor_by_name_round_trip() {
        let config = test_config(&[], &[]);
        let server = Server::new(config, Arc::new(crate::transport::LoopbackTransport::new()));
        let eui = anchor_key(5);
        server.add_anchor("north".into(), eui, Coord3::new(1.0, 2.0, 3.0));

        let anchor = server.get_anchor_by_name("north").expect("anchor should be registered");
        assert_eq!(anchor.eui64, eui);
        assert_eq!(server.get_anchor(eui).expect("lookup by key").coord, Coord3::new(1.0, 2.0, 3.0));

        server.stop();
    }
}
