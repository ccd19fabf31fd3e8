//! Ranging algorithm / method identifiers shared between `rtls-server`'s
//! correlator and its configuration loader. The session state machine
//! itself lives in `rtls-server::ranging` since it owns timers and a
//! server back-reference.

use serde::{Deserialize, Serialize};

/// Which TDOA solver a `RangingSession` uses once its buckets are full.
/// Resolves spec §9's first Open Question: the source's `get_lat_algo`
/// maps `'wls3d'` to `LatWLS2D` (apparently a bug); here `Wls3d` is kept
/// distinct and resolves to the 3D solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangingAlgorithm {
    /// `wls2d` (alias `wls`): one-way ranging, 2D hyperlateration.
    Wls2d,
    /// `wls3d`: one-way ranging, full 3D hyperlateration.
    Wls3d,
    /// `swls`: one-way ranging against a common anchor, 2D.
    Swls,
}

impl RangingAlgorithm {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "wls2d" | "wls" => Some(Self::Wls2d),
            "wls3d" => Some(Self::Wls3d),
            "swls" => Some(Self::Swls),
            _ => None,
        }
    }
}

/// Whether a session collects anchor beacons (one-way) or ranging
/// requests (two-way) into bucket[1].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangingMethod {
    NoWay,
    OneWay,
    TwoWay,
}

impl RangingAlgorithm {
    pub fn method(&self) -> RangingMethod {
        match self {
            RangingAlgorithm::Wls2d | RangingAlgorithm::Wls3d | RangingAlgorithm::Swls => RangingMethod::OneWay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wls3d_is_distinct_from_wls2d() {
        assert_eq!(RangingAlgorithm::parse("wls3d"), Some(RangingAlgorithm::Wls3d));
        assert_ne!(RangingAlgorithm::Wls3d, RangingAlgorithm::Wls2d);
    }

    #[test]
    fn wls_aliases_wls2d() {
        assert_eq!(RangingAlgorithm::parse("wls"), Some(RangingAlgorithm::Wls2d));
    }
}
