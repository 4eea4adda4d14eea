//! Process configuration (SPEC_FULL §2 "Process bootstrap & CLI"): a small
//! TOML file overriding the defaults each component otherwise ships with.
//! Loaded the same way the teacher's `control::config::ControlConfig` loads
//! `config.toml` — `std::fs::read_to_string` + `toml::from_str` — folded into
//! an `anyhow` chain at the process boundary rather than a panic.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// Tunables every rank may override; all fields are optional so a deployment
/// can ship a partial file (or none at all — `ProcessConfig::default()` is
/// used in that case).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ProcessConfig {
    /// Reception threshold in dBm, converted to the engine's linear watts
    /// floor (spec GLOSSARY "Reception threshold"). Defaults to -100 dBm.
    pub reception_threshold_dbm: Option<f64>,
    /// Wall-clock timeout for the stub's `attach(radio)` round trip (spec
    /// §4.5). Defaults to 1000ms.
    pub registration_timeout_ms: Option<u64>,
    /// Minimum movement, in meters, before `notify_position_changed` emits a
    /// `POSITION_UPDATE` (spec §4.5). Defaults to 1.0.
    pub position_epsilon_m: Option<f64>,
    /// Interval between `HEARTBEAT` emissions (SPEC_FULL supplemented
    /// feature). Defaults to 5000ms.
    pub heartbeat_interval_ms: Option<u64>,
    /// Interval between fabric poll ticks on both processor and stub.
    /// Defaults to 5ms.
    pub poll_interval_ms: Option<u64>,
}

impl ProcessConfig {
    /// Load from a TOML file. Missing fields fall back to each component's
    /// own default (see `ProcessConfig::default()` plus the `Default` impls
    /// of [`crate::propagation::PropagationEngine`] and
    /// [`crate::channel_stub::ChannelStub`]).
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn reception_threshold_w(&self) -> Option<f64> {
        self.reception_threshold_dbm.map(crate::wire::units::dbm_to_watts)
    }
}
