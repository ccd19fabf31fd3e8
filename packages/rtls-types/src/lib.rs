//! # rtls-types
//!
//! Shared wire and domain types for the Tail RTLS system.
//!
//! These types are used by:
//! - `rtls-server`: decoding RF events forwarded by anchors, correlating
//!   ranging sessions, solving tag coordinates
//! - `anchord`: encoding/decoding frames at the radio edge, forwarding
//!   timestamped observations to the server
//!
//! This crate does no I/O and spawns no threads — it is pure data and pure
//! math, the same role `uwb-types` plays for the Regatta backend/simulator
//! pair this workspace was adapted from.

pub mod codec;
pub mod coord;
pub mod error;
pub mod eui64;
pub mod filter;
pub mod frame;
pub mod ranging;
pub mod rf;
pub mod tdoa;
pub mod timestamp;

pub use codec::{decode_frame, encode_frame};
pub use coord::Coord3;
pub use error::RtlsError;
pub use eui64::Eui64;
pub use frame::{Frame, MacHeader, TailFrame};
pub use ranging::RangingAlgorithm;
pub use timestamp::{Timestamp, TimestampInfo};
