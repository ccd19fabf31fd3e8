//! Ranging-session correlator (spec §4.2), grounded in
//! `examples/original_source/server/lateration.py`'s `Lateration`/`OWR`/
//! `OWRExt`/`LatWLS2D`/`LatWLS3D`/`LatSWLS` hierarchy: collects per-anchor
//! blink/beacon/response observations into three phase buckets, elects a
//! beacon (and, for SWLS, a common anchor), and on expiry runs the TDOA
//! solve and updates the tag's coordinate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use nalgebra::{DMatrix, DVector};
use rand::Rng;
use tracing::{debug, warn};

use rtls_types::ranging::RangingAlgorithm;
use rtls_types::tdoa::{hyperlater_2d, hyperlater_3d, woodoo, DEFAULT_MAX_ITER, DEFAULT_THETA};
use rtls_types::Eui64;

use crate::anchor::Anchor;
use crate::rf_event::RfEvent;
use crate::server::Server;
use crate::timer::TimerId;

const TDOA_SIGMA: f64 = 0.1;

/// Three observation buckets, in arrival order: blinks (tag → all
/// anchors), beacons-or-requests (elected anchor → all anchors),
/// responses (all anchors → elected anchor). Mirrors `Lateration.blinks`.
#[derive(Default)]
struct Buckets {
    blinks: HashMap<Eui64, RfEvent>,
    middle: HashMap<Eui64, RfEvent>,
    responses: HashMap<Eui64, RfEvent>,
}

pub struct RangingSession {
    pub rangid: [u8; 8],
    server: Arc<Server>,
    algorithm: RangingAlgorithm,
    active: AtomicBool,
    buckets: Mutex<Buckets>,
    device: Mutex<Option<Eui64>>,
    start_time: Mutex<Instant>,
    ranging_timer_id: Mutex<Option<TimerId>>,
    timeout_timer_id: Mutex<Option<TimerId>>,
}

impl RangingSession {
    pub fn new(server: Arc<Server>, rangid: [u8; 8], algorithm: RangingAlgorithm) -> Self {
        Self {
            rangid,
            server,
            algorithm,
            active: AtomicBool::new(false),
            buckets: Mutex::new(Buckets::default()),
            device: Mutex::new(None),
            start_time: Mutex::new(Instant::now()),
            ranging_timer_id: Mutex::new(None),
            timeout_timer_id: Mutex::new(None),
        }
    }

    /// `Lateration.start`: arms the timeout timer and marks active.
    pub fn start(self: &Arc<Self>) {
        *self.start_time.lock().unwrap() = Instant::now();
        self.active.store(true, Ordering::Relaxed);
        let weak: Weak<Self> = Arc::downgrade(self);
        let delay = Duration::from_secs_f64(self.server.config.ranging.timeout_timer);
        let id = self.server.timers.arm(delay, move || {
            if let Some(session) = weak.upgrade() {
                session.timeout_expire();
            }
        });
        *self.timeout_timer_id.lock().unwrap() = Some(id);
        debug!("ranging {:x?}: start", self.rangid);
    }

    /// `Lateration.finish`: disarms both timers and drops the session
    /// from the server's registry.
    fn finish(self: &Arc<Self>) {
        if let Some(id) = self.ranging_timer_id.lock().unwrap().take() {
            self.server.timers.unarm(id);
        }
        if let Some(id) = self.timeout_timer_id.lock().unwrap().take() {
            self.server.timers.unarm(id);
        }
        self.active.store(false, Ordering::Relaxed);
        self.server.finish_ranging(&self.rangid);
        debug!("ranging {:x?}: finish @ {:?}", self.rangid, self.start_time.lock().unwrap().elapsed());
    }

    fn ranging_expire(self: &Arc<Self>) {
        debug!("ranging {:x?}: ranging_expire", self.rangid);
        if let Some(id) = self.ranging_timer_id.lock().unwrap().take() {
            self.server.timers.unarm(id);
        }
        if let Some(id) = self.timeout_timer_id.lock().unwrap().take() {
            self.server.timers.unarm(id);
        }
        let session = self.clone();
        std::thread::Builder::new()
            .name("rtls-laterate".into())
            .spawn(move || session.laterate())
            .expect("spawn laterate thread");
    }

    fn timeout_expire(self: &Arc<Self>) {
        debug!("ranging {:x?}: timeout_expire", self.rangid);
        self.finish();
    }

    /// Rearms the ranging timer from now, matching `Timer.arm()`'s
    /// re-trigger-from-now semantics (distinct from `PeriodicTimer`'s
    /// chained rearm used elsewhere).
    fn rearm_ranging_timer(self: &Arc<Self>) {
        let mut guard = self.ranging_timer_id.lock().unwrap();
        if let Some(old) = guard.take() {
            self.server.timers.unarm(old);
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        let delay = Duration::from_secs_f64(self.server.config.ranging.ranging_timer);
        let id = self.server.timers.arm(delay, move || {
            if let Some(session) = weak.upgrade() {
                session.ranging_expire();
            }
        });
        *guard = Some(id);
    }

    pub fn add_blink(&self, evnt: RfEvent) {
        if !self.active.load(Ordering::Relaxed) {
            return;
        }
        {
            let mut device = self.device.lock().unwrap();
            if device.is_none() {
                *device = evnt.frame.mac.src_eui64();
            }
        }
        self.buckets.lock().unwrap().blinks.insert(evnt.anchor, evnt);
    }

    pub fn add_beacon(&self, evnt: RfEvent) {
        if !self.active.load(Ordering::Relaxed) {
            return;
        }
        self.buckets.lock().unwrap().middle.insert(evnt.anchor, evnt);
    }

    pub fn add_request(&self, _evnt: RfEvent) {
        // Two-way ranging is an acknowledged non-goal (`TWR.laterate` in
        // the source is an unimplemented stub); requests never join a
        // one-way session.
        warn!("ranging {:x?}: two-way ranging request ignored", self.rangid);
    }

    pub fn add_response(self: &Arc<Self>, evnt: RfEvent) {
        if !self.active.load(Ordering::Relaxed) {
            return;
        }
        self.buckets.lock().unwrap().responses.insert(evnt.anchor, evnt);
        self.rearm_ranging_timer();
    }

    /// `Lateration.find_beacon`: plurality vote over bucket[1]'s
    /// transmitting EUI (the anchor that won the previous round's
    /// election and broadcast the beacon the others overheard).
    fn find_beacon(&self) -> Option<Arc<Anchor>> {
        let buckets = self.buckets.lock().unwrap();
        let mut counts: HashMap<Eui64, usize> = HashMap::new();
        let mut order: Vec<Eui64> = Vec::new();
        for evnt in buckets.middle.values() {
            let Some(src) = evnt.frame.mac.src_eui64() else { continue };
            if !counts.contains_key(&src) {
                order.push(src);
            }
            *counts.entry(src).or_insert(0) += 1;
        }
        drop(buckets);
        let winner = order.into_iter().max_by_key(|k| counts[k])?;
        self.server.get_anchor(winner)
    }

    /// `OWR.select_beacon`: the persistent beacon assignment a tag is
    /// registered against, distinct from `find_beacon`'s per-solve
    /// election. `force_beacon` may name an anchor or the literal
    /// `"RANDOM"`; absent that, the anchor with the best RX level of the
    /// tag's blink wins.
    fn select_beacon(&self) -> Option<Arc<Anchor>> {
        let cfg = &self.server.config.ranging;
        if let Some(force) = &cfg.force_beacon {
            if force == "RANDOM" {
                let anchors = self.server.anchors_snapshot();
                if anchors.is_empty() {
                    return None;
                }
                let i = rand::thread_rng().gen_range(0..anchors.len());
                return Some(anchors[i].clone());
            } else if !force.is_empty() {
                return self.server.get_anchor_by_name(force);
            }
        }
        let buckets = self.buckets.lock().unwrap();
        let prf = self.server.config.dw1000.prf;
        buckets
            .blinks
            .iter()
            .max_by(|(_, a), (_, b)| a.get_rx_level(prf).total_cmp(&b.get_rx_level(prf)))
            .and_then(|(key, _)| self.server.get_anchor(*key))
    }

    /// `OWRExt.select_common`: among anchors distinct from `beacon` with
    /// observations in all three buckets, the one with the greatest
    /// summed RX level wins. The source reads its own not-yet-assigned
    /// `self.beacon` field here (always `None` at this point in
    /// `laterate`, effectively disabling the RX-sum branch); this takes
    /// the session's already-elected beacon explicitly instead, which is
    /// the only way this election can ever select anything — see
    /// `DESIGN.md`.
    fn select_common(&self, beacon: &Arc<Anchor>) -> Option<Arc<Anchor>> {
        let cfg = &self.server.config.ranging;
        if let Some(force) = &cfg.force_common {
            if force == "RANDOM" {
                let anchors = self.server.anchors_snapshot();
                if anchors.is_empty() {
                    return None;
                }
                let i = rand::thread_rng().gen_range(0..anchors.len());
                return Some(anchors[i].clone());
            } else if !force.is_empty() {
                return self.server.get_anchor_by_name(force);
            }
        }
        let buckets = self.buckets.lock().unwrap();
        let prf = self.server.config.dw1000.prf;
        let mut best: Option<(Eui64, f64)> = None;
        for key in self.server.anchor_keys() {
            if key == beacon.eui64 {
                continue;
            }
            let (Some(b), Some(m), Some(r)) =
                (buckets.blinks.get(&key), buckets.middle.get(&key), buckets.responses.get(&key))
            else {
                continue;
            };
            let level = b.get_rx_level(prf) + m.get_rx_level(prf) + r.get_rx_level(prf);
            if best.map(|(_, l)| level > l).unwrap_or(true) {
                best = Some((key, level));
            }
        }
        drop(buckets);
        best.and_then(|(key, _)| self.server.get_anchor(key))
    }

    fn laterate(self: Arc<Self>) {
        let device = *self.device.lock().unwrap();
        if let Some(tag_key) = device {
            if let Some(tag) = self.server.get_tag(tag_key) {
                let result = match self.algorithm {
                    RangingAlgorithm::Wls2d => self.solve_wls2d(),
                    RangingAlgorithm::Wls3d => self.solve_wls3d(),
                    RangingAlgorithm::Swls => self.solve_swls(),
                };
                match result {
                    Ok(Some(coord)) => tag.update_coord(coord),
                    Ok(None) => debug!("ranging {:x?}: underdetermined, no solve", self.rangid),
                    Err(err) => warn!("ranging {:x?}: solve failed: {err}", self.rangid),
                }
            }
        }

        if let Some(beacon) = self.select_beacon() {
            if let Some(tag_key) = device {
                if let Some(tag) = self.server.get_tag(tag_key) {
                    if let Some((old, new)) = tag.set_beacon(Some(beacon.eui64)) {
                        if let Some(old_eui) = old {
                            if let Some(old_anchor) = self.server.get_anchor(old_eui) {
                                let _ = old_anchor.unregister_tag(tag_key);
                            }
                        }
                        if let Some(new_eui) = new {
                            if let Some(new_anchor) = self.server.get_anchor(new_eui) {
                                let _ = new_anchor.register_tag(tag_key);
                            }
                        }
                    }
                }
            }
        }

        self.finish();
    }

    fn six_times(buckets: &Buckets, akey: Eui64, bkey: Eui64) -> Option<[f64; 6]> {
        Some([
            buckets.blinks.get(&akey)?.timestamp(),
            buckets.blinks.get(&bkey)?.timestamp(),
            buckets.middle.get(&bkey)?.timestamp(),
            buckets.middle.get(&akey)?.timestamp(),
            buckets.responses.get(&akey)?.timestamp(),
            buckets.responses.get(&bkey)?.timestamp(),
        ])
    }

    /// `LatWLS2D.laterate`: TDOA against the majority-elected beacon, 2D
    /// hyperlateration over the horizontal plane.
    fn solve_wls2d(&self) -> Result<Option<rtls_types::Coord3>, rtls_types::RtlsError> {
        let Some(beacon) = self.find_beacon() else { return Ok(None) };
        let max_dist = self.server.config.ranging.max_dist;
        let buckets = self.buckets.lock().unwrap();

        let mut coords = Vec::new();
        let mut ranges = Vec::new();
        for anchor in self.server.anchors_snapshot() {
            if anchor.eui64 == beacon.eui64 {
                continue;
            }
            let Some(t) = Self::six_times(&buckets, anchor.eui64, beacon.eui64) else { continue };
            let c = beacon.distance_to(&anchor);
            let Ok(l) = woodoo(&t) else { continue };
            let d = c - 2.0 * l;
            if d.abs() < max_dist {
                coords.push((anchor.coord.x, anchor.coord.y));
                ranges.push(d);
            }
        }
        drop(buckets);

        if coords.len() < 3 {
            return Ok(None);
        }
        let ref_coord = DVector::from_vec(vec![beacon.coord.x, beacon.coord.y]);
        let coord_mat = DMatrix::from_fn(coords.len(), 2, |r, c| if c == 0 { coords[r].0 } else { coords[r].1 });
        let range_vec = DVector::from_vec(ranges.clone());
        let sigma_vec = DVector::from_element(ranges.len(), TDOA_SIGMA);
        let (coord, _cond) = hyperlater_2d(&ref_coord, &coord_mat, &range_vec, &sigma_vec, Some(0.01), DEFAULT_THETA, DEFAULT_MAX_ITER)?;
        Ok(Some(coord))
    }

    /// `LatWLS3D.laterate`: same as `solve_wls2d` but full 3D.
    fn solve_wls3d(&self) -> Result<Option<rtls_types::Coord3>, rtls_types::RtlsError> {
        let Some(beacon) = self.find_beacon() else { return Ok(None) };
        let max_dist = self.server.config.ranging.max_dist;
        let buckets = self.buckets.lock().unwrap();

        let mut coords = Vec::new();
        let mut ranges = Vec::new();
        for anchor in self.server.anchors_snapshot() {
            if anchor.eui64 == beacon.eui64 {
                continue;
            }
            let Some(t) = Self::six_times(&buckets, anchor.eui64, beacon.eui64) else { continue };
            let c = beacon.distance_to(&anchor);
            let Ok(l) = woodoo(&t) else { continue };
            let d = c - 2.0 * l;
            if d.abs() < max_dist {
                coords.push(anchor.coord);
                ranges.push(d);
            }
        }
        drop(buckets);

        if coords.len() < 5 {
            return Ok(None);
        }
        let ref_coord = DVector::from_vec(vec![beacon.coord.x, beacon.coord.y, beacon.coord.z]);
        let coord_mat = DMatrix::from_fn(coords.len(), 3, |r, c| coords[r].to_array()[c]);
        let range_vec = DVector::from_vec(ranges.clone());
        let sigma_vec = DVector::from_element(ranges.len(), TDOA_SIGMA);
        let (coord, _cond) = hyperlater_3d(&ref_coord, &coord_mat, &range_vec, &sigma_vec, Some(0.01), DEFAULT_THETA, DEFAULT_MAX_ITER)?;
        Ok(Some(coord))
    }

    /// `LatSWLS.laterate`: TDOA against a common anchor relative to the
    /// beacon, full 3D hyperlateration.
    fn solve_swls(&self) -> Result<Option<rtls_types::Coord3>, rtls_types::RtlsError> {
        let Some(beacon) = self.find_beacon() else { return Ok(None) };
        let Some(common) = self.select_common(&beacon) else { return Ok(None) };
        let max_dist = self.server.config.ranging.max_dist;
        let buckets = self.buckets.lock().unwrap();

        let mut coords = Vec::new();
        let mut ranges = Vec::new();
        let b_to_c = beacon.distance_to(&common);
        for anchor in self.server.anchors_snapshot() {
            if anchor.eui64 == beacon.eui64 || anchor.eui64 == common.eui64 {
                continue;
            }
            let Some(t) = Self::six_times(&buckets, anchor.eui64, common.eui64) else { continue };
            let c = beacon.distance_to(&anchor);
            let Ok(l) = woodoo(&t) else { continue };
            let d = (c - b_to_c) - 2.0 * l;
            if d.abs() < max_dist {
                coords.push(anchor.coord);
                ranges.push(d);
            }
        }
        drop(buckets);

        if coords.len() < 5 {
            return Ok(None);
        }
        let ref_coord = DVector::from_vec(vec![beacon.coord.x, beacon.coord.y, beacon.coord.z]);
        let coord_mat = DMatrix::from_fn(coords.len(), 3, |r, c| coords[r].to_array()[c]);
        let range_vec = DVector::from_vec(ranges.clone());
        let sigma_vec = DVector::from_element(ranges.len(), TDOA_SIGMA);
        let (coord, _cond) = hyperlater_3d(&ref_coord, &coord_mat, &range_vec, &sigma_vec, Some(0.01), DEFAULT_THETA, DEFAULT_MAX_ITER)?;
        Ok(Some(coord))
    }
}
