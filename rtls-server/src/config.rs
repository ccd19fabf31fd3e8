//! Configuration loading (spec §6), grounded in
//! `examples/original_source/python/config.py`'s dotted-attribute `Config`
//! object loaded from YAML. No YAML crate exists anywhere in the retrieval
//! pack (checked exhaustively), so this loads the identical key set from
//! TOML via `serde`/`toml`, both already in the dependency graph — see
//! `DESIGN.md` for the Open Question resolution.

use std::path::Path;

use serde::Deserialize;

use rtls_types::{Coord3, Eui64, RangingAlgorithm};

#[derive(Debug, Clone, Deserialize)]
pub struct RtlsSection {
    pub mqtt_domain: String,
    pub mqrpc_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Dw1000Section {
    pub channel: u8,
    pub prf: u16,
    #[serde(default)]
    pub verbose: bool,
}

fn default_max_dist() -> f64 {
    100.0
}

fn default_ranging_timer() -> f64 {
    0.1
}

fn default_timeout_timer() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct RangingSection {
    pub algorithm: String,
    #[serde(default = "default_ranging_timer")]
    pub ranging_timer: f64,
    #[serde(default = "default_timeout_timer")]
    pub timeout_timer: f64,
    #[serde(default = "default_max_dist")]
    pub max_dist: f64,
    /// Either a configured anchor name or the literal `"RANDOM"`.
    pub force_beacon: Option<String>,
    pub force_common: Option<String>,
}

impl RangingSection {
    pub fn algorithm(&self) -> Option<RangingAlgorithm> {
        RangingAlgorithm::parse(&self.algorithm)
    }
}

fn default_qc_filter_dev() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoordSection {
    pub filter_len: usize,
    pub qc_filter_len: usize,
    #[serde(default = "default_qc_filter_dev")]
    pub qc_filter_dev: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnchorEntry {
    pub name: String,
    pub eui64: String,
    pub coord: [f64; 3],
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagEntry {
    pub name: String,
    pub eui64: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RtlsConfig {
    pub rtls: RtlsSection,
    pub dw1000: Dw1000Section,
    pub ranging: RangingSection,
    pub coord: CoordSection,
    #[serde(default)]
    pub anchors: Vec<AnchorEntry>,
    #[serde(default)]
    pub tags: Vec<TagEntry>,
}

impl RtlsConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let cfg: RtlsConfig = toml::from_str(&text)?;
        Ok(cfg)
    }
}

fn parse_eui64(s: &str) -> anyhow::Result<Eui64> {
    let bytes = hex::decode(s)?;
    let arr: [u8; 8] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("eui64 '{s}' is not 8 bytes"))?;
    Ok(Eui64::from_bytes(arr))
}

impl AnchorEntry {
    pub fn parsed_eui64(&self) -> anyhow::Result<Eui64> {
        parse_eui64(&self.eui64)
    }

    pub fn parsed_coord(&self) -> Coord3 {
        Coord3::new(self.coord[0], self.coord[1], self.coord[2])
    }
}

impl TagEntry {
    pub fn parsed_eui64(&self) -> anyhow::Result<Eui64> {
        parse_eui64(&self.eui64)
    }
}
