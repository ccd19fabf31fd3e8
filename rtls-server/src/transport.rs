//! MQTT transport abstraction (spec §1 / `SPEC_FULL.md` §9). Real MQTT is
//! an external collaborator the spec deliberately keeps outside this
//! crate's scope — no MQTT client crate exists anywhere in the retrieval
//! pack, so the wire boundary is a trait instead of a fabricated
//! dependency. `LoopbackTransport` is the only concrete implementation
//! shipped, useful for same-process tests and single-binary deployments.

use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

/// A single published message: topic plus raw payload bytes (the RPC
/// layer JSON-encodes/decodes on top of this).
#[derive(Debug, Clone)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// Minimal publish/subscribe surface `rpc::RpcClient` needs. A real
/// implementation would wrap an MQTT client crate; this workspace ships
/// only the in-process `LoopbackTransport`.
pub trait MqttTransport: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8]);
    /// Subscribe to an exact topic, receiving every future publish to it.
    fn subscribe(&self, topic: &str) -> Receiver<MqttMessage>;
}

struct Subscription {
    topic: String,
    tx: Sender<MqttMessage>,
}

/// In-process pub/sub over `std::sync::mpsc`, standing in for the broker.
/// Every subscriber with a matching topic gets a clone of each publish.
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    subs: Arc<Mutex<Vec<Subscription>>>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MqttTransport for LoopbackTransport {
    fn publish(&self, topic: &str, payload: &[u8]) {
        let subs = self.subs.lock().unwrap();
        for sub in subs.iter().filter(|s| topic_matches(&s.topic, topic)) {
            let _ = sub.tx.send(MqttMessage {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            });
        }
    }

    fn subscribe(&self, topic: &str) -> Receiver<MqttMessage> {
        let (tx, rx) = std::sync::mpsc::channel();
        self.subs.lock().unwrap().push(Subscription {
            topic: topic.to_string(),
            tx,
        });
        rx
    }
}

/// MQTT topic-filter match: `#` is a trailing multi-level wildcard, `+`
/// matches exactly one level, otherwise levels must match literally.
fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');
    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return true,
            (Some("+"), Some(_)) => continue,
            (Some(f), Some(t)) if f == t => continue,
            (Some(_), _) => return false,
            (None, None) => return true,
            (None, Some(_)) => return false,
        }
    }
}
