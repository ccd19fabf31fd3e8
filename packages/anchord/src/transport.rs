//! MQTT transport abstraction, mirroring `rtls-server::transport` (see
//! `DESIGN.md`): real MQTT is an external collaborator outside this
//! crate's scope, so the wire boundary is a trait. `LoopbackTransport`
//! is the only concrete implementation shipped.

use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

pub trait MqttTransport: Send + Sync {
    fn publish(&self, topic: &str, payload: &[u8]);
    fn subscribe(&self, topic: &str) -> Receiver<MqttMessage>;
}

struct Subscription {
    topic: String,
    tx: Sender<MqttMessage>,
}

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

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn subscriber_receives_matching_publish() {
        let transport = LoopbackTransport::new();
        let rx = transport.subscribe("TAIL/RPC/anchor-1");
        transport.publish("TAIL/RPC/anchor-1", b"hello");
        let msg = rx.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(msg.payload, b"hello");
    }
}
