//! RPC over the MQTT transport (spec §5 / `SPEC_FULL.md` §9), transcribed
//! from `mqrpc.py`'s `MQRPC` class: JSON envelopes on `TAIL/RPC/<id>` and
//! `TAIL/RPC/BROADCAST`, a `UID`-keyed pending-call table completed by a
//! `__RETURN__` envelope, and a name-keyed handler table for inbound
//! calls.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::transport::MqttTransport;
use rtls_types::RtlsError;

const VERSION: &str = "MQRPC/1.0";
const PREFIX: &str = "TAIL/RPC";
const BROADCAST: &str = "BROADCAST";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "SRC")]
    src: String,
    #[serde(rename = "DST")]
    dst: String,
    #[serde(rename = "VER")]
    ver: String,
    #[serde(rename = "UID")]
    uid: Option<String>,
    #[serde(rename = "FUNC")]
    func: String,
    #[serde(rename = "ARGS")]
    args: Value,
}

pub type Handler = Box<dyn Fn(Value) -> Value + Send + Sync>;

#[derive(Default)]
struct PendingCall {
    args: Option<Value>,
    done: bool,
}

struct Shared {
    rpcid: String,
    transport: Arc<dyn MqttTransport>,
    pending: Mutex<HashMap<String, Arc<(Mutex<PendingCall>, Condvar)>>>,
    handlers: Mutex<HashMap<String, Handler>>,
    timeout: Duration,
}

/// One node's RPC endpoint: owns its inbound subscriptions and a dispatch
/// thread per subscription, matching `MQRPC.__init__`'s two
/// `message_callback_add` registrations.
pub struct RpcClient {
    shared: Arc<Shared>,
}

impl RpcClient {
    pub fn new(transport: Arc<dyn MqttTransport>, rpcid: impl Into<String>) -> Self {
        let shared = Arc::new(Shared {
            rpcid: rpcid.into(),
            transport,
            pending: Mutex::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
            timeout: DEFAULT_TIMEOUT,
        });
        shared.handlers.lock().unwrap().insert(
            "PING".into(),
            Box::new(|args| args) as Handler,
        );

        let own_topic = format!("{PREFIX}/{}", shared.rpcid);
        let broadcast_topic = format!("{PREFIX}/{BROADCAST}");
        for topic in [own_topic, broadcast_topic] {
            let rx = shared.transport.subscribe(&topic);
            let worker = shared.clone();
            std::thread::Builder::new()
                .name(format!("rtls-rpc-{}", worker.rpcid))
                .spawn(move || {
                    for msg in rx {
                        if let Ok(envelope) = serde_json::from_slice::<Envelope>(&msg.payload) {
                            worker.dispatch(envelope);
                        } else {
                            warn!("rpc: malformed envelope on {}", msg.topic);
                        }
                    }
                })
                .expect("spawn rpc dispatch thread");
        }

        Self { shared }
    }

    pub fn register(&self, name: impl Into<String>, handler: Handler) {
        self.shared.handlers.lock().unwrap().insert(name.into(), handler);
    }

    pub fn unregister(&self, name: &str) {
        self.shared.handlers.lock().unwrap().remove(name);
    }

    /// Blocking call, completed by the peer's `__RETURN__`. Times out per
    /// `RtlsError::RpcTimeout` if nothing arrives within the configured
    /// window (`mqrpc.py`'s `wait_call` raising `TimeoutError`).
    pub fn call(&self, remote: &str, func: &str, args: Value) -> Result<Value, RtlsError> {
        let uid = uuid::Uuid::new_v4().to_string();
        let slot = Arc::new((Mutex::new(PendingCall::default()), Condvar::new()));
        self.shared.pending.lock().unwrap().insert(uid.clone(), slot.clone());

        self.shared.send(remote, Some(uid.clone()), func, args);

        let (lock, cv) = &*slot;
        let mut call = lock.lock().unwrap();
        let timeout = self.shared.timeout;
        while !call.done {
            let (guard, result) = cv.wait_timeout(call, timeout).unwrap();
            call = guard;
            if result.timed_out() && !call.done {
                self.shared.pending.lock().unwrap().remove(&uid);
                return Err(RtlsError::RpcTimeout { peer: remote.to_string() });
            }
        }
        self.shared.pending.lock().unwrap().remove(&uid);
        Ok(call.args.take().unwrap_or(Value::Null))
    }

    pub fn post(&self, remote: &str, func: &str, args: Value) {
        self.shared.send(remote, None, func, args);
    }

    pub fn bcast(&self, func: &str, args: Value) {
        self.shared.send(BROADCAST, None, func, args);
    }
}

impl Shared {
    fn send(&self, dst: &str, uid: Option<String>, func: &str, args: Value) {
        let envelope = Envelope {
            src: self.rpcid.clone(),
            dst: dst.to_string(),
            ver: VERSION.to_string(),
            uid,
            func: func.to_string(),
            args,
        };
        let topic = format!("{PREFIX}/{dst}");
        let payload = serde_json::to_vec(&envelope).expect("serialize rpc envelope");
        debug!("rpc: sendrpc {envelope:?}");
        self.transport.publish(&topic, &payload);
    }

    fn dispatch(&self, envelope: Envelope) {
        if envelope.ver != VERSION {
            let err = RtlsError::VersionMismatch { got: envelope.ver.clone(), want: VERSION };
            warn!("rpc: {err}");
            return;
        }
        if envelope.func == "__RETURN__" {
            if let Some(uid) = &envelope.uid {
                if let Some(slot) = self.pending.lock().unwrap().get(uid) {
                    let (lock, cv) = &**slot;
                    let mut call = lock.lock().unwrap();
                    call.args = Some(envelope.args);
                    call.done = true;
                    cv.notify_all();
                }
            }
            return;
        }
        let handlers = self.handlers.lock().unwrap();
        let Some(handler) = handlers.get(&envelope.func) else {
            debug!("rpc: no handler registered for {}", envelope.func);
            return;
        };
        let ret = handler(envelope.args);
        drop(handlers);
        if let Some(uid) = envelope.uid {
            self.send(&envelope.src, Some(uid), "__RETURN__", ret);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LoopbackTransport;
    use serde_json::json;

    #[test]
    fn call_roundtrips_through_handler() {
        let transport: Arc<dyn MqttTransport> = Arc::new(LoopbackTransport::new());
        let server = RpcClient::new(transport.clone(), "anchor-1");
        server.register(
            "GETDWATTR",
            Box::new(|args| json!({ "echo": args })),
        );
        let client = RpcClient::new(transport, "server");
        let result = client.call("anchor-1", "GETDWATTR", json!({ "key": "prf" })).unwrap();
        assert_eq!(result, json!({ "echo": { "key": "prf" } }));
    }

    #[test]
    fn call_times_out_without_a_peer() {
        let transport: Arc<dyn MqttTransport> = Arc::new(LoopbackTransport::new());
        let client = RpcClient::new(transport, "server");
        let result = client.call("nobody", "PING", json!({}));
        assert!(matches!(result, Err(RtlsError::RpcTimeout { .. })));
    }
}
