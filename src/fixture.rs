//! Static topology fixture loader (SPEC_FULL §2, test/demo tooling only).
//!
//! A small `Scene`-shaped JSON file describing device positions, supported
//! frequencies, and antenna gain, mirroring the shape (if not the breadth) of
//! the teacher's own `Scene` fixture and its `serde_json::from_str` loader
//! (`common::scene::load_scene`). `src/fabric/local.rs`'s test harness and the
//! `--replay` demo mode load it to exercise the propagation engine end to end
//! without a live multi-process deployment. This is not a production feature:
//! a real deployment gets its topology from `DEVICE_REGISTER`/`POSITION_UPDATE`
//! traffic, never from a file.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

use crate::registry::{AntennaParams, Position};

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceFixture {
    pub node_id: u32,
    pub owning_rank: u32,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    #[serde(default)]
    pub antenna_gain_dbi: f64,
    /// Not currently plumbed through registration: `DEVICE_REGISTER` carries
    /// no frequency field, so a device registered via the wire path always
    /// ends up with an empty (wildcard) frequency set regardless of what's
    /// declared here. Kept on the fixture for forward compatibility.
    #[serde(default)]
    pub frequencies_hz: Vec<u32>,
}

impl DeviceFixture {
    pub fn position(&self) -> Position {
        Position { x: self.x, y: self.y, z: self.z }
    }

    pub fn antenna(&self) -> AntennaParams {
        AntennaParams { gain_dbi: self.antenna_gain_dbi }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SceneFixture {
    pub devices: Vec<DeviceFixture>,
}

impl SceneFixture {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path).with_context(|| format!("reading fixture file {}", path.display()))?;
        let scene: SceneFixture =
            serde_json::from_str(&data).with_context(|| format!("parsing fixture file {}", path.display()))?;
        if scene.devices.is_empty() {
            anyhow::bail!("fixture {} declares zero devices", path.display());
        }
        Ok(scene)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_scene() {
        let json = r#"{
            "devices": [
                {"node_id": 1, "owning_rank": 1, "x": 0.0, "y": 0.0, "z": 0.0},
                {"node_id": 2, "owning_rank": 2, "x": 10.0, "y": 0.0, "z": 0.0, "frequencies_hz": [2400000000]}
            ]
        }"#;
        let scene: SceneFixture = serde_json::from_str(json).unwrap();
        assert_eq!(scene.devices.len(), 2);
        assert_eq!(scene.devices[1].frequencies_hz, vec![2_400_000_000]);
        assert_eq!(scene.devices[0].frequencies_hz, Vec::<u32>::new());
    }

    #[test]
    fn rejects_empty_device_list() {
        let dir = std::env::temp_dir().join(format!("yanswifi-fixture-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("empty.json");
        fs::write(&path, r#"{"devices": []}"#).unwrap();
        assert!(SceneFixture::load(&path).is_err());
        let _ = fs::remove_dir_all(&dir);
    }
}
