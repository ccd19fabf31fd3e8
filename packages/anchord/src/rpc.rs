//! RPC endpoint, mirroring `rtls-server::rpc::RpcClient` (itself
//! transcribed from `mqrpc.py`'s `MQRPC`): JSON envelopes on
//! `TAIL/RPC/<id>` and `TAIL/RPC/BROADCAST`, dispatched to a name-keyed
//! handler table. `anchord.py` never originates an RPC call of its own —
//! it only answers the server's — so this trims the blocking `call`
//! machinery `rtls-server`'s copy needs and keeps only registration and
//! inbound dispatch (see `DESIGN.md`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::transport::MqttTransport;
use rtls_types::RtlsError;

const VERSION: &str = "MQRPC/1.0";
const PREFIX: &str = "TAIL/RPC";
const BROADCAST: &str = "BROADCAST";

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

struct Shared {
    rpcid: String,
    transport: Arc<dyn MqttTransport>,
    handlers: Mutex<HashMap<String, Handler>>,
}

pub struct RpcEndpoint {
    shared: Arc<Shared>,
}

impl RpcEndpoint {
    pub fn new(transport: Arc<dyn MqttTransport>, rpcid: impl Into<String>) -> Self {
        let shared = Arc::new(Shared {
            rpcid: rpcid.into(),
            transport,
            handlers: Mutex::new(HashMap::new()),
        });
        shared.handlers.lock().unwrap().insert("PING".into(), Box::new(|args| args) as Handler);

        let own_topic = format!("{PREFIX}/{}", shared.rpcid);
        let broadcast_topic = format!("{PREFIX}/{BROADCAST}");
        for topic in [own_topic, broadcast_topic] {
            let rx = shared.transport.subscribe(&topic);
            let worker = shared.clone();
            std::thread::Builder::new()
                .name(format!("anchord-rpc-{}", worker.rpcid))
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
            // anchord never places a call, so it has nothing pending to
            // complete; drop silently like the source's absent handler.
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
    fn registered_handler_replies_with_return_envelope() {
        let transport = Arc::new(LoopbackTransport::new());
        let endpoint = RpcEndpoint::new(transport.clone() as Arc<dyn MqttTransport>, "anchor-1");
        endpoint.register("GETDWATTR", Box::new(|args| json!({ "echo": args })));

        let reply_rx = transport.subscribe("TAIL/RPC/server");
        let call = Envelope {
            src: "server".into(),
            dst: "anchor-1".into(),
            ver: VERSION.to_string(),
            uid: Some("u1".into()),
            func: "GETDWATTR".into(),
            args: json!({ "key": "prf" }),
        };
        transport.publish("TAIL/RPC/anchor-1", &serde_json::to_vec(&call).unwrap());

        let msg = reply_rx.recv_timeout(std::time::Duration::from_millis(200)).unwrap();
        let reply: Envelope = serde_json::from_slice(&msg.payload).unwrap();
        assert_eq!(reply.func, "__RETURN__");
        assert_eq!(reply.args, json!({ "echo": { "key": "prf" } }));
    }
}
