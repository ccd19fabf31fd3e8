//! Configuration loading (spec §10), grounded in
//! `examples/original_source/anchor/anchord.py`'s `config.anchor`/
//! `config.dw1000` sections. TOML via `serde`/`toml`, the same choice
//! made for `rtls-server::config` (see `DESIGN.md`).

use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AnchorSection {
    pub mqtt_domain: String,
}

fn default_pcode() -> u8 {
    9
}

fn default_rate() -> u8 {
    0
}

fn default_txpsr() -> u8 {
    0
}

fn default_smart_power() -> bool {
    true
}

fn default_power() -> u32 {
    0
}

#[derive(Debug, Clone, Deserialize)]
pub struct Dw1000Section {
    pub channel: u8,
    pub prf: u16,
    #[serde(default = "default_pcode")]
    pub pcode: u8,
    #[serde(default = "default_rate")]
    pub rate: u8,
    #[serde(default = "default_txpsr")]
    pub txpsr: u8,
    #[serde(default = "default_smart_power")]
    pub smart_power: bool,
    #[serde(default = "default_power")]
    pub power: u32,
    pub profile: Option<String>,
    #[serde(default)]
    pub verbose: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnchordConfig {
    pub anchor: AnchorSection,
    pub dw1000: Dw1000Section,
}

impl AnchordConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let cfg: AnchordConfig = toml::from_str(&text)?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[anchor]
mqtt_domain = "test"

[dw1000]
channel = 5
prf = 64
pcode = 10
verbose = true
"#;

    #[test]
    fn parses_sample_with_defaults() {
        let cfg: AnchordConfig = toml::from_str(SAMPLE).unwrap();
        assert_eq!(cfg.anchor.mqtt_domain, "test");
        assert_eq!(cfg.dw1000.pcode, 10);
        assert_eq!(cfg.dw1000.rate, default_rate());
        assert!(cfg.dw1000.smart_power);
    }
}
