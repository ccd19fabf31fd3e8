//! Anchor device (spec §5), grounded in
//! `examples/original_source/server/anchor.py`: a maintenance thread pings
//! the anchor's RPC endpoint every 10s, flipping `active` on success/
//! failure and triggering a one-time `RESET` on (re)activation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::debug;

use rtls_types::{Coord3, Eui64, RtlsError};

use crate::rpc::RpcClient;

const PING_INTERVAL: Duration = Duration::from_secs(10);

pub struct Anchor {
    pub name: String,
    pub eui64: Eui64,
    pub coord: Coord3,
    rpc: Arc<RpcClient>,
    active: Arc<AtomicBool>,
    exit: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Anchor {
    /// Starts the maintenance thread immediately, matching
    /// `Anchor.__init__`'s unconditional `self.thread.start()`.
    pub fn spawn(name: impl Into<String>, eui64: Eui64, coord: Coord3, rpc: Arc<RpcClient>) -> Self {
        let name = name.into();
        let active = Arc::new(AtomicBool::new(false));
        let exit = Arc::new(AtomicBool::new(false));

        let thread_rpc = rpc.clone();
        let thread_active = active.clone();
        let thread_exit = exit.clone();
        let thread_name = name.clone();
        let thread = std::thread::Builder::new()
            .name(format!("rtls-anchor-{thread_name}"))
            .spawn(move || Self::run(thread_name, eui64, thread_rpc, thread_active, thread_exit))
            .expect("spawn anchor maintenance thread");

        Self { name, eui64, coord, rpc, active, exit, thread: Some(thread) }
    }

    fn run(name: String, eui64: Eui64, rpc: Arc<RpcClient>, active: Arc<AtomicBool>, exit: Arc<AtomicBool>) {
        debug!("anchor {name} <{eui64}> registered");
        let peer = eui64.to_string();
        while !exit.load(Ordering::Relaxed) {
            match rpc.call(&peer, "PING", json!({})) {
                Ok(_) => {
                    if !active.swap(true, Ordering::Relaxed) {
                        debug!("activating anchor {name} <{eui64}>");
                        let _ = rpc.call(&peer, "RESET", json!({}));
                    }
                }
                Err(_) => {
                    if active.swap(false, Ordering::Relaxed) {
                        debug!("deactivating anchor {name} <{eui64}>");
                    }
                }
            }
            std::thread::sleep(PING_INTERVAL);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.exit.store(true, Ordering::Relaxed);
    }

    fn rpc_call(&self, func: &str, args: Value) -> Result<Value, RtlsError> {
        if self.is_active() {
            self.rpc.call(&self.eui64.to_string(), func, args)
        } else {
            Err(RtlsError::RpcTimeout { peer: self.eui64.to_string() })
        }
    }

    pub fn register_tag(&self, tag: Eui64) -> Result<Value, RtlsError> {
        self.rpc_call("REGISTER", json!({ "EUI64": tag.to_string() }))
    }

    pub fn unregister_tag(&self, tag: Eui64) -> Result<Value, RtlsError> {
        self.rpc_call("UNREGISTER", json!({ "EUI64": tag.to_string() }))
    }

    pub fn xmit_beacon(&self, bref: &[u8; 8]) -> Result<Value, RtlsError> {
        self.rpc_call("WPAN-BEACON", json!({ "BREF": hex::encode(bref) }))
    }

    pub fn get_dwattr(&self, attr: &str) -> Result<Value, RtlsError> {
        self.rpc_call("GETDWATTR", json!({ "ATTR": attr }))
    }

    pub fn get_dwstats(&self) -> Result<Value, RtlsError> {
        self.rpc_call("GETDWSTATS", json!({}))
    }

    pub fn distance_to(&self, other: &Anchor) -> f64 {
        self.coord.distance_to(&other.coord)
    }
}

impl Drop for Anchor {
    fn drop(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use serde_json::Value;

    use crate::transport::{LoopbackTransport, MqttTransport};

    use super::*;

    fn anchor_key(n: u8) -> Eui64 {
        Eui64::from_bytes([0, 0, 0, 0, 0, 0, 0, n])
    }

    /// Spawns a thread that answers every `TAIL/RPC/{anchor}` envelope with
    /// a hand-built `__RETURN__`, standing in for the anchord daemon's own
    /// `RpcEndpoint` responder. `Envelope` is private to `rpc.rs`, so the
    /// fake speaks the wire schema directly rather than constructing one.
    fn spawn_fake_anchor_responder(
        transport: Arc<LoopbackTransport>,
        anchor: Eui64,
        reset_count: Arc<AtomicUsize>,
    ) {
        let topic = format!("TAIL/RPC/{anchor}");
        let rx = transport.subscribe(&topic);
        std::thread::spawn(move || {
            for msg in rx {
                let Ok(envelope) = serde_json::from_slice::<Value>(&msg.payload) else { continue };
                let Some(src) = envelope.get("SRC").and_then(Value::as_str) else { continue };
                let Some(uid) = envelope.get("UID").and_then(Value::as_str) else { continue };
                if envelope.get("FUNC").and_then(Value::as_str) == Some("RESET") {
                    reset_count.fetch_add(1, Ordering::Relaxed);
                }
                let reply = serde_json::json!({
                    "SRC": anchor.to_string(),
                    "DST": src,
                    "VER": "MQRPC/1.0",
                    "UID": uid,
                    "FUNC": "__RETURN__",
                    "ARGS": {},
                });
                transport.publish(&format!("TAIL/RPC/{src}"), &serde_json::to_vec(&reply).unwrap());
            }
        });
    }

    #[test]
    fn is_active_is_false_with_no_responder_on_the_transport() {
        let transport: Arc<dyn MqttTransport> = Arc::new(LoopbackTransport::new());
        let rpc = Arc::new(RpcClient::new(transport, "rtls-server"));
        let anchor = Anchor::spawn("north", anchor_key(1), Coord3::ZERO, rpc);
        assert!(!anchor.is_active());
        anchor.stop();
    }

    #[test]
    fn rpc_call_fails_fast_while_inactive() {
        let transport: Arc<dyn MqttTransport> = Arc::new(LoopbackTransport::new());
        let rpc = Arc::new(RpcClient::new(transport, "rtls-server"));
        let anchor = Anchor::spawn("north", anchor_key(1), Coord3::ZERO, rpc);

        let result = anchor.register_tag(anchor_key(2));
        match result {
            Err(RtlsError::RpcTimeout { peer }) => assert_eq!(peer, anchor.eui64.to_string()),
            other => panic!("expected RpcTimeout, got {other:?}"),
        }
        anchor.stop();
    }

    #[test]
    fn responding_peer_activates_the_anchor_and_triggers_one_reset() {
        let transport = Arc::new(LoopbackTransport::new());
        let eui = anchor_key(3);
        let reset_count = Arc::new(AtomicUsize::new(0));
        spawn_fake_anchor_responder(transport.clone(), eui, reset_count.clone());

        let rpc_transport: Arc<dyn MqttTransport> = transport;
        let rpc = Arc::new(RpcClient::new(rpc_transport, "rtls-server"));
        let anchor = Anchor::spawn("south", eui, Coord3::ZERO, rpc);

        std::thread::sleep(Duration::from_millis(300));
        assert!(anchor.is_active());
        assert_eq!(reset_count.load(Ordering::Relaxed), 1);

        let result = anchor.get_dwstats();
        assert!(result.is_ok());

        anchor.stop();
    }
}
