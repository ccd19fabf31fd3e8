//! Tag device (spec §5), grounded in
//! `examples/original_source/server/tag.py`: owns a quality-gated
//! coordinate filter and republishes its solved position whenever the
//! ranging correlator hands it an updated coordinate.

use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing::debug;

use rtls_types::filter::{CoordinateFilter, GeoFilter, QcFilter};
use rtls_types::{Coord3, Eui64};

use crate::transport::MqttTransport;

pub struct Tag {
    pub name: String,
    pub eui64: Eui64,
    coord: Mutex<Coord3>,
    filter: Mutex<QcFilter>,
    beacon: Mutex<Option<Eui64>>,
    domain: String,
    transport: Arc<dyn MqttTransport>,
}

impl Tag {
    pub fn new(
        name: impl Into<String>,
        eui64: Eui64,
        domain: impl Into<String>,
        transport: Arc<dyn MqttTransport>,
        filter_len: usize,
        qc_filter_len: usize,
        qc_filter_dev: f64,
    ) -> Self {
        Self {
            name: name.into(),
            eui64,
            coord: Mutex::new(Coord3::ZERO),
            filter: Mutex::new(QcFilter::new(
                Box::new(GeoFilter::new(filter_len)),
                Box::new(GeoFilter::new(qc_filter_len)),
                qc_filter_dev,
            )),
            beacon: Mutex::new(None),
            domain: domain.into(),
            transport,
        }
    }

    /// `Tag.update_coord`: stores the raw solve, folds it into the
    /// quality-gated filter, and republishes both.
    pub fn update_coord(&self, new_coord: Coord3) {
        debug!("tag {} coord: {:?}", self.name, new_coord);
        *self.coord.lock().unwrap() = new_coord;
        self.filter.lock().unwrap().update(new_coord);
        self.report_coord();
    }

    pub fn coord(&self) -> Coord3 {
        *self.coord.lock().unwrap()
    }

    pub fn filtered_coord(&self) -> Coord3 {
        self.filter.lock().unwrap().value()
    }

    fn report_coord(&self) {
        let coord = self.coord();
        let filtered = self.filtered_coord();
        let topic = format!("TAIL/TAG/{}/{}/COORD", self.domain, self.eui64);
        let payload = json!({
            "TAG": self.eui64.to_string(),
            "NAME": self.name,
            "COORD": coord.to_array(),
            "FILTERED": filtered.to_array(),
        });
        self.transport.publish(&topic, &serde_json::to_vec(&payload).expect("serialize coord report"));
    }

    /// `Tag.update_beacon`: swaps the tag's persistent beacon anchor if
    /// it changed, returning the (old, new) keys so the caller — which
    /// owns the anchor registry — can issue the unregister/register RPCs
    /// `update_beacon` calls directly in the source.
    pub fn set_beacon(&self, beacon: Option<Eui64>) -> Option<(Option<Eui64>, Option<Eui64>)> {
        let mut current = self.beacon.lock().unwrap();
        if *current == beacon {
            return None;
        }
        let old = *current;
        *current = beacon;
        Some((old, beacon))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::transport::LoopbackTransport;

    use super::*;

    fn tag_key(n: u8) -> Eui64 {
        Eui64::from_bytes([0xa0, 0, 0, 0, 0, 0, 0, n])
    }

    fn test_tag(transport: Arc<dyn MqttTransport>) -> Tag {
        Tag::new("tag-1", tag_key(1), "default", transport, 8, 32, 1.0)
    }

    #[test]
    fn update_coord_stores_and_publishes_the_raw_solve() {
        let transport = Arc::new(LoopbackTransport::new());
        let rx = transport.subscribe(&format!("TAIL/TAG/default/{}/COORD", tag_key(1)));
        let tag = test_tag(transport);

        let coord = Coord3::new(1.0, 2.0, 3.0);
        tag.update_coord(coord);

        assert_eq!(tag.coord(), coord);

        let msg = rx.recv_timeout(Duration::from_millis(100)).expect("coord report published");
        let payload: serde_json::Value = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(payload["COORD"], serde_json::json!([1.0, 2.0, 3.0]));
        assert_eq!(payload["NAME"], "tag-1");
    }

    #[test]
    fn filtered_coord_tracks_a_single_reading() {
        let transport = Arc::new(LoopbackTransport::new());
        let tag = test_tag(transport);
        let coord = Coord3::new(5.0, -5.0, 0.0);
        tag.update_coord(coord);
        assert_eq!(tag.filtered_coord(), coord);
    }

    #[test]
    fn set_beacon_reports_no_change_when_unchanged() {
        let transport = Arc::new(LoopbackTransport::new());
        let tag = test_tag(transport);
        assert_eq!(tag.set_beacon(None), None);

        let first = tag.set_beacon(Some(tag_key(9)));
        assert_eq!(first, Some((None, Some(tag_key(9)))));

        assert_eq!(tag.set_beacon(Some(tag_key(9))), None);
    }

    #[test]
    fn set_beacon_returns_old_and_new_keys_on_change() {
        let transport = Arc::new(LoopbackTransport::new());
        let tag = test_tag(transport);
        tag.set_beacon(Some(tag_key(9)));

        let changed = tag.set_beacon(Some(tag_key(10)));
        assert_eq!(changed, Some((Some(tag_key(9)), Some(tag_key(10)))));
    }
}
