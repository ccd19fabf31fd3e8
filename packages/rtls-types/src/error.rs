//! Error kind taxonomy (spec §7). Each variant is propagated or swallowed by
//! its caller according to a fixed policy — see the doc comment on each
//! variant and `SPEC_FULL.md` §2.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RtlsError {
    /// Malformed MAC or Tail payload. Logged and dropped by the dispatcher;
    /// never propagates past frame decode.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Recognized container, unrecognized content (unknown subtype, EIEs,
    /// security bit). Logged and dropped, same as `ParseError`.
    #[error("unsupported frame: {0}")]
    UnsupportedFrame(String),

    /// TDOA denominator zero, or a required timestamp bucket missing for an
    /// anchor. The offending anchor is skipped; the session continues.
    #[error("bad ranging times")]
    BadTimes,

    /// RF spline evaluated outside its tabulated domain.
    #[error("{spline} spline: x={x} out of range")]
    OutOfRange { spline: &'static str, x: f64 },

    /// Fewer than the minimum anchor count survived filtering. The session
    /// completes without publishing a coordinate.
    #[error("solve underdetermined: have {have}, need {need}")]
    SolveUnderdetermined { have: usize, need: usize },

    /// An RPC call did not receive a `__RETURN__` within its timeout.
    #[error("rpc timeout waiting on {peer}")]
    RpcTimeout { peer: String },

    /// RPC envelope declared a `VER` other than `MQRPC/1.0`. Fatal for that
    /// message only.
    #[error("rpc version mismatch: got {got}, want {want}")]
    VersionMismatch { got: String, want: &'static str },

    /// Socket or transport failure. The only kind allowed to unwind a
    /// thread's main loop.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}
