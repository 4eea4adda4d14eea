//! Propagation engine (spec §4.3): a pure function over a registry snapshot
//! that turns one transmission into zero or more receptions.
//!
//! Loss and delay are consumed only through the `evaluate(...)` capability
//! interface spec §9 describes; the engine never introspects a model's wire
//! representation beyond the `model_type_hash` used to pick which concrete
//! model a `CONFIG_LOSS_MODEL`/`CONFIG_DELAY_MODEL` message selects.

use crate::registry::{DeviceRecord, Position};
use crate::wire::units::{SPEED_OF_LIGHT_MPS, dbm_to_watts, watts_to_dbm};

/// Transmission descriptor (spec §3): ephemeral, lives for one call into the
/// engine.
#[derive(Debug, Clone)]
pub struct TransmissionDescriptor {
    pub transmitter_device_id: u32,
    pub tx_power_w: f64,
    pub frequency_hz: u32,
    pub payload: Vec<u8>,
    pub tx_vector: Vec<u8>,
    pub tx_timestamp_ns: u64,
    pub sequence_number: u32,
}

/// Reception descriptor (spec §3): one per candidate receiver, lives for one
/// `RX_NOTIFICATION`.
#[derive(Debug, Clone)]
pub struct ReceptionDescriptor {
    pub target_device_id: u32,
    pub target_rank: u32,
    pub rx_power_w: f64,
    pub path_loss_db: f64,
    pub distance_m: f64,
    pub propagation_delay_ns: u64,
    pub reception_timestamp_ns: u64,
    pub payload: Vec<u8>,
    pub tx_vector: Vec<u8>,
}

/// `evaluate(tx_pos, rx_pos, tx_power, frequency) -> (rx_power_w, path_loss_db)`
/// (spec §9). Implementations must be pure and deterministic: same inputs,
/// same output, every time.
pub trait LossModel: Send + Sync {
    fn evaluate(&self, tx_pos: Position, rx_pos: Position, tx_power_w: f64, frequency_hz: u32) -> (f64, f64);
}

/// `evaluate(tx_pos, rx_pos) -> propagation_delay_ns` (spec §9).
pub trait DelayModel: Send + Sync {
    fn evaluate(&self, tx_pos: Position, rx_pos: Position) -> u64;
}

/// Default loss model used only when no external model is configured (spec
/// §4.3): free-space path loss, `L_dB = 20*log10(4*pi*d*f/c)`.
pub struct FreeSpaceLossModel;

impl LossModel for FreeSpaceLossModel {
    fn evaluate(&self, tx_pos: Position, rx_pos: Position, tx_power_w: f64, frequency_hz: u32) -> (f64, f64) {
        let distance = tx_pos.distance_to(&rx_pos);
        if distance == 0.0 {
            return (tx_power_w, 0.0);
        }
        let path_loss_db = 20.0 * (4.0 * std::f64::consts::PI * distance * frequency_hz as f64 / SPEED_OF_LIGHT_MPS).log10();
        let tx_power_dbm = watts_to_dbm(tx_power_w);
        let rx_power_dbm = tx_power_dbm - path_loss_db;
        (dbm_to_watts(rx_power_dbm), path_loss_db)
    }
}

/// Deterministic log-distance loss model, selectable via `CONFIG_LOSS_MODEL`
/// (spec §9 extension point). Grounded on the corpus's own log-distance path
/// loss formula, with the shadowing term dropped: the engine's determinism
/// requirement (spec §4.3) rules out sampling a random shadowing draw on
/// every call.
pub struct LogDistanceLossModel {
    pub path_loss_exponent: f64,
    pub path_loss_at_reference_distance_db: f64,
}

impl LossModel for LogDistanceLossModel {
    fn evaluate(&self, tx_pos: Position, rx_pos: Position, tx_power_w: f64, _frequency_hz: u32) -> (f64, f64) {
        let distance = tx_pos.distance_to(&rx_pos);
        let path_loss_db = if distance < 1.0 {
            self.path_loss_at_reference_distance_db
        } else {
            self.path_loss_at_reference_distance_db + 10.0 * self.path_loss_exponent * distance.log10()
        };
        let tx_power_dbm = watts_to_dbm(tx_power_w);
        let rx_power_dbm = tx_power_dbm - path_loss_db;
        (dbm_to_watts(rx_power_dbm), path_loss_db)
    }
}

/// Default delay model used only when no external model is configured (spec
/// §4.3): `distance / c`.
pub struct SpeedOfLightDelayModel;

impl DelayModel for SpeedOfLightDelayModel {
    fn evaluate(&self, tx_pos: Position, rx_pos: Position) -> u64 {
        let distance = tx_pos.distance_to(&rx_pos);
        ((distance / SPEED_OF_LIGHT_MPS) * 1e9).round() as u64
    }
}

/// Speed-of-light propagation plus a fixed extra latency, selectable via
/// `CONFIG_DELAY_MODEL` (spec §9 extension point) — e.g. to model a constant
/// processing/queueing delay a real radio front-end adds on top of pure
/// propagation time.
pub struct FixedExtraDelayModel {
    pub extra_delay_ns: u64,
}

impl DelayModel for FixedExtraDelayModel {
    fn evaluate(&self, tx_pos: Position, rx_pos: Position) -> u64 {
        let distance = tx_pos.distance_to(&rx_pos);
        let propagation_ns = ((distance / SPEED_OF_LIGHT_MPS) * 1e9).round() as u64;
        propagation_ns.saturating_add(self.extra_delay_ns)
    }
}

/// Configuration consumed by the engine: the reception threshold (spec §4.3
/// step 4) plus the currently configured models.
pub struct PropagationEngine {
    pub loss_model: Box<dyn LossModel>,
    pub delay_model: Box<dyn DelayModel>,
    /// Linear-power floor below which a receiver is skipped (spec GLOSSARY
    /// "Reception threshold").
    pub reception_threshold_w: f64,
}

impl Default for PropagationEngine {
    fn default() -> Self {
        PropagationEngine {
            loss_model: Box::new(FreeSpaceLossModel),
            delay_model: Box::new(SpeedOfLightDelayModel),
            reception_threshold_w: 1e-13, // -100 dBm
        }
    }
}

impl PropagationEngine {
    /// Evaluate one transmission against a registry snapshot (spec §4.3).
    /// `candidates` must already be in device-id ascending order (the
    /// registry's `snapshot_all` guarantees this) so the emitted receptions
    /// come out in the deterministic order spec §8 requires.
    pub fn evaluate(&self, tx: &TransmissionDescriptor, candidates: &[&DeviceRecord]) -> Vec<ReceptionDescriptor> {
        if tx.tx_power_w <= 0.0 {
            log::warn!("zero/negative transmit power from device {}, dropping transmission", tx.transmitter_device_id);
            return Vec::new();
        }

        let transmitter = match candidates.iter().find(|d| d.device_id == tx.transmitter_device_id) {
            Some(d) => *d,
            None => {
                log::warn!("transmitter device {} not found in registry snapshot", tx.transmitter_device_id);
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        for receiver in candidates {
            if receiver.device_id == transmitter.device_id {
                continue;
            }
            if !receiver.frequencies_hz.is_empty() && !receiver.frequencies_hz.contains(&tx.frequency_hz) {
                continue;
            }

            let distance = transmitter.position.distance_to(&receiver.position);
            if !distance.is_finite() {
                log::warn!(
                    "distance between transmitter {} and receiver {} is not finite, skipping",
                    transmitter.device_id,
                    receiver.device_id
                );
                continue;
            }

            let (rx_power_w, path_loss_db) = if distance == 0.0 {
                (tx.tx_power_w, 0.0)
            } else {
                self.loss_model.evaluate(transmitter.position, receiver.position, tx.tx_power_w, tx.frequency_hz)
            };

            if rx_power_w < self.reception_threshold_w {
                continue;
            }

            let propagation_delay_ns = if distance == 0.0 {
                0
            } else {
                self.delay_model.evaluate(transmitter.position, receiver.position)
            };

            out.push(ReceptionDescriptor {
                target_device_id: receiver.device_id,
                target_rank: receiver.owning_rank,
                rx_power_w,
                path_loss_db,
                distance_m: distance,
                propagation_delay_ns,
                reception_timestamp_ns: tx.tx_timestamp_ns + propagation_delay_ns,
                payload: tx.payload.clone(),
                tx_vector: tx.tx_vector.clone(),
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AntennaParams;

    fn device(id: u32, rank: u32, x: f64, freqs: Vec<u32>) -> DeviceRecord {
        DeviceRecord {
            device_id: id,
            owning_rank: rank,
            node_id: id,
            position: Position { x, y: 0.0, z: 0.0 },
            antenna: AntennaParams { gain_dbi: 0.0 },
            frequencies_hz: freqs,
            last_seen_ns: 0,
            active: true,
        }
    }

    fn tx(device_id: u32, tx_power_w: f64, frequency_hz: u32) -> TransmissionDescriptor {
        TransmissionDescriptor {
            transmitter_device_id: device_id,
            tx_power_w,
            frequency_hz,
            payload: vec![1, 2, 3],
            tx_vector: vec![],
            tx_timestamp_ns: 1_000_000,
            sequence_number: 1,
        }
    }

    #[test]
    fn single_receiver_free_space_scenario_1() {
        let engine = PropagationEngine::default();
        let d1 = device(1, 1, 0.0, vec![]);
        let d2 = device(2, 2, 10.0, vec![]);
        let candidates = vec![&d1, &d2];
        let t = tx(1, 0.1, 2_400_000_000); // 20 dBm = 100 mW
        let rx = engine.evaluate(&t, &candidates);
        assert_eq!(rx.len(), 1);
        let r = &rx[0];
        assert_eq!(r.target_device_id, 2);
        assert!((r.distance_m - 10.0).abs() < 1e-9);
        assert_eq!(r.propagation_delay_ns, 33);
        assert!((r.path_loss_db - 60.05).abs() < 0.1, "path_loss_db={}", r.path_loss_db);
    }

    #[test]
    fn three_receivers_ascending_fan_out_scenario_2() {
        let engine = PropagationEngine::default();
        let d1 = device(1, 1, 0.0, vec![]);
        let d2 = device(2, 2, 10.0, vec![]);
        let d3 = device(3, 3, 20.0, vec![]);
        let d4 = device(4, 4, 30.0, vec![]);
        let candidates = vec![&d1, &d2, &d3, &d4];
        let t = tx(1, dbm_to_watts(16.0), 2_400_000_000);
        let rx = engine.evaluate(&t, &candidates);
        assert_eq!(rx.len(), 3);
        let ids: Vec<u32> = rx.iter().map(|r| r.target_device_id).collect();
        assert_eq!(ids, vec![2, 3, 4]);
        for pair in rx.windows(2) {
            assert!(pair[0].distance_m < pair[1].distance_m);
            assert!(pair[0].propagation_delay_ns < pair[1].propagation_delay_ns);
        }
    }

    #[test]
    fn frequency_mismatch_yields_zero_receptions_scenario_3() {
        let engine = PropagationEngine::default();
        let d1 = device(1, 1, 0.0, vec![]);
        let d2 = device(2, 2, 10.0, vec![5_000_000_000]);
        let candidates = vec![&d1, &d2];
        let t = tx(1, dbm_to_watts(20.0), 2_400_000_000);
        assert!(engine.evaluate(&t, &candidates).is_empty());
    }

    #[test]
    fn same_position_has_zero_loss_and_zero_delay() {
        let engine = PropagationEngine::default();
        let d1 = device(1, 1, 5.0, vec![]);
        let d2 = device(2, 2, 5.0, vec![]);
        let candidates = vec![&d1, &d2];
        let t = tx(1, dbm_to_watts(10.0), 2_400_000_000);
        let rx = engine.evaluate(&t, &candidates);
        assert_eq!(rx.len(), 1);
        assert_eq!(rx[0].path_loss_db, 0.0);
        assert_eq!(rx[0].propagation_delay_ns, 0);
        assert!((watts_to_dbm(rx[0].rx_power_w) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn single_device_registry_emits_nothing_boundary() {
        let engine = PropagationEngine::default();
        let d1 = device(1, 1, 0.0, vec![]);
        let candidates = vec![&d1];
        let t = tx(1, dbm_to_watts(20.0), 2_400_000_000);
        assert!(engine.evaluate(&t, &candidates).is_empty());
    }

    #[test]
    fn non_positive_power_is_dropped() {
        let engine = PropagationEngine::default();
        let d1 = device(1, 1, 0.0, vec![]);
        let d2 = device(2, 2, 10.0, vec![]);
        let candidates = vec![&d1, &d2];
        let t = tx(1, 0.0, 2_400_000_000);
        assert!(engine.evaluate(&t, &candidates).is_empty());
    }

    #[test]
    fn below_threshold_receiver_is_skipped() {
        let mut engine = PropagationEngine::default();
        engine.reception_threshold_w = 1.0; // absurdly high floor
        let d1 = device(1, 1, 0.0, vec![]);
        let d2 = device(2, 2, 10.0, vec![]);
        let candidates = vec![&d1, &d2];
        let t = tx(1, dbm_to_watts(20.0), 2_400_000_000);
        assert!(engine.evaluate(&t, &candidates).is_empty());
    }

    #[test]
    fn log_distance_model_has_no_randomness() {
        let model = LogDistanceLossModel {
            path_loss_exponent: 2.0,
            path_loss_at_reference_distance_db: 40.0,
        };
        let tx_pos = Position { x: 0.0, y: 0.0, z: 0.0 };
        let rx_pos = Position { x: 50.0, y: 0.0, z: 0.0 };
        let a = model.evaluate(tx_pos, rx_pos, 0.1, 2_400_000_000);
        let b = model.evaluate(tx_pos, rx_pos, 0.1, 2_400_000_000);
        assert_eq!(a, b, "deterministic model must return identical output for identical input");
    }

    #[test]
    fn fixed_extra_delay_model_adds_constant_latency_to_propagation_delay() {
        let tx_pos = Position { x: 0.0, y: 0.0, z: 0.0 };
        let rx_pos = Position { x: 10.0, y: 0.0, z: 0.0 };
        let base = SpeedOfLightDelayModel.evaluate(tx_pos, rx_pos);
        let with_extra = FixedExtraDelayModel { extra_delay_ns: 500 }.evaluate(tx_pos, rx_pos);
        assert_eq!(with_extra, base + 500);
    }
}
