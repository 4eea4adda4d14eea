//! Device registry (spec §4.2): the channel processor's exclusive table of
//! registered devices. Pure data structure with mutation rules; no wire or
//! fabric concerns here.

use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn distance_to(&self, other: &Position) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AntennaParams {
    pub gain_dbi: f64,
}

/// One live device as owned exclusively by the channel processor.
#[derive(Debug, Clone)]
pub struct DeviceRecord {
    pub device_id: u32,
    pub owning_rank: u32,
    pub node_id: u32,
    pub position: Position,
    pub antenna: AntennaParams,
    /// Empty set means "all frequencies supported" (spec §4.3 step 2).
    pub frequencies_hz: Vec<u32>,
    pub last_seen_ns: u64,
    pub active: bool,
}

/// Key used to detect a re-registration of the same logical device (spec
/// §4.2: "Idempotent at the level of (source_rank, node_id, phy_index)").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RegistrationKey {
    source_rank: u32,
    node_id: u32,
    phy_index: u32,
}

pub struct DeviceRegistry {
    channel_rank: u32,
    next_device_id: u32,
    devices: HashMap<u32, DeviceRecord>,
    by_registration_key: HashMap<RegistrationKey, u32>,
}

impl DeviceRegistry {
    pub fn new(channel_rank: u32) -> Self {
        DeviceRegistry {
            channel_rank,
            next_device_id: 1,
            devices: HashMap::new(),
            by_registration_key: HashMap::new(),
        }
    }

    /// Register a device, or refresh an existing registration for the same
    /// (source_rank, node_id, phy_index) tuple (spec §4.2).
    ///
    /// Returns `None` (and logs) if `source_rank == channel_rank`: the
    /// channel rank holds no radios (spec §3 invariant).
    pub fn register(
        &mut self,
        source_rank: u32,
        node_id: u32,
        phy_index: u32,
        position: Position,
        antenna: AntennaParams,
        frequencies_hz: Vec<u32>,
        event_timestamp_ns: u64,
    ) -> Option<u32> {
        if source_rank == self.channel_rank {
            log::error!("refusing registration from the channel rank itself (rank={source_rank})");
            return None;
        }

        let key = RegistrationKey { source_rank, node_id, phy_index };
        if let Some(&existing_id) = self.by_registration_key.get(&key) {
            if let Some(record) = self.devices.get_mut(&existing_id) {
                record.position = position;
                record.frequencies_hz = frequencies_hz;
                record.last_seen_ns = record.last_seen_ns.max(event_timestamp_ns);
                record.active = true;
                return Some(existing_id);
            }
        }

        let device_id = self.next_device_id;
        self.next_device_id += 1;

        self.devices.insert(
            device_id,
            DeviceRecord {
                device_id,
                owning_rank: source_rank,
                node_id,
                position,
                antenna,
                frequencies_hz,
                last_seen_ns: event_timestamp_ns,
                active: true,
            },
        );
        self.by_registration_key.insert(key, device_id);
        Some(device_id)
    }

    /// Remove a record. Unknown ids are logged and otherwise ignored (spec §4.2).
    pub fn deregister(&mut self, device_id: u32) {
        match self.devices.remove(&device_id) {
            Some(record) => {
                self.by_registration_key.retain(|_, &mut id| id != device_id);
                log::info!("device {device_id} (node {}) deregistered", record.node_id);
            }
            None => log::warn!("deregister of unknown device_id={device_id} ignored"),
        }
    }

    /// Remove every device owned by a rank that the host simulator has
    /// declared gone (spec §3: "Destroyed when ... the owning rank is
    /// declared gone").
    pub fn deregister_rank(&mut self, rank: u32) {
        let dead: Vec<u32> = self.devices.values().filter(|d| d.owning_rank == rank).map(|d| d.device_id).collect();
        for device_id in dead {
            self.deregister(device_id);
        }
    }

    /// Update position iff `event_timestamp_ns >= last_seen_ns` (spec §4.2:
    /// an older update is discarded).
    pub fn update_position(&mut self, device_id: u32, new_position: Position, event_timestamp_ns: u64) {
        let Some(record) = self.devices.get_mut(&device_id) else {
            log::warn!("position update for unknown device_id={device_id} ignored");
            return;
        };
        if event_timestamp_ns < record.last_seen_ns {
            log::debug!(
                "stale position update for device {device_id}: event_ts={event_timestamp_ns} < last_seen={}",
                record.last_seen_ns
            );
            return;
        }
        record.position = new_position;
        record.last_seen_ns = event_timestamp_ns;
    }

    pub fn get(&self, device_id: u32) -> Option<&DeviceRecord> {
        self.devices.get(&device_id)
    }

    /// Read-only projection consumed by the propagation engine. Iteration
    /// order is device-id ascending for the determinism spec §4.3 requires.
    pub fn snapshot_all(&self) -> Vec<&DeviceRecord> {
        let mut all: Vec<&DeviceRecord> = self.devices.values().collect();
        all.sort_by_key(|d| d.device_id);
        all
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(x: f64) -> Position {
        Position { x, y: 0.0, z: 0.0 }
    }

    fn antenna() -> AntennaParams {
        AntennaParams { gain_dbi: 0.0 }
    }

    #[test]
    fn device_ids_are_monotone_and_never_reused() {
        let mut reg = DeviceRegistry::new(0);
        let a = reg.register(1, 10, 0, pos(0.0), antenna(), vec![], 0).unwrap();
        let b = reg.register(1, 11, 0, pos(1.0), antenna(), vec![], 0).unwrap();
        assert!(b > a);
        reg.deregister(a);
        let c = reg.register(1, 12, 0, pos(2.0), antenna(), vec![], 0).unwrap();
        assert!(c > b, "ids must never be recycled even after deregistration");
    }

    #[test]
    fn reregistration_with_same_key_is_idempotent() {
        let mut reg = DeviceRegistry::new(0);
        let first = reg.register(1, 10, 0, pos(0.0), antenna(), vec![2_400_000_000], 0).unwrap();
        let second = reg.register(1, 10, 0, pos(5.0), antenna(), vec![5_000_000_000], 10).unwrap();
        assert_eq!(first, second, "same (source_rank, node_id, phy_index) must return the same id");
        let rec = reg.get(first).unwrap();
        assert_eq!(rec.position, pos(5.0));
        assert_eq!(rec.frequencies_hz, vec![5_000_000_000]);
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn channel_rank_cannot_register_a_device() {
        let mut reg = DeviceRegistry::new(0);
        assert!(reg.register(0, 1, 0, pos(0.0), antenna(), vec![], 0).is_none());
    }

    #[test]
    fn stale_position_update_is_discarded() {
        let mut reg = DeviceRegistry::new(0);
        let id = reg.register(1, 10, 0, pos(0.0), antenna(), vec![], 100).unwrap();
        reg.update_position(id, pos(50.0), 50); // older than last_seen=100
        assert_eq!(reg.get(id).unwrap().position, pos(0.0));
        reg.update_position(id, pos(50.0), 150);
        assert_eq!(reg.get(id).unwrap().position, pos(50.0));
    }

    #[test]
    fn deregister_unknown_id_is_a_noop() {
        let mut reg = DeviceRegistry::new(0);
        reg.deregister(999); // must not panic
        assert_eq!(reg.len(), 0);
    }

    #[test]
    fn register_then_deregister_restores_prior_state_except_id_counter() {
        let mut reg = DeviceRegistry::new(0);
        let before_next = reg.next_device_id;
        let id = reg.register(1, 10, 0, pos(0.0), antenna(), vec![], 0).unwrap();
        reg.deregister(id);
        assert_eq!(reg.len(), 0);
        assert_ne!(reg.next_device_id, before_next, "the id counter must have advanced");
    }

    #[test]
    fn snapshot_all_is_device_id_ascending() {
        let mut reg = DeviceRegistry::new(0);
        reg.register(1, 10, 0, pos(0.0), antenna(), vec![], 0).unwrap();
        reg.register(2, 11, 0, pos(1.0), antenna(), vec![], 0).unwrap();
        reg.register(1, 12, 1, pos(2.0), antenna(), vec![], 0).unwrap();
        let snap = reg.snapshot_all();
        let ids: Vec<u32> = snap.iter().map(|d| d.device_id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn deregister_rank_removes_only_that_ranks_devices() {
        let mut reg = DeviceRegistry::new(0);
        let a = reg.register(1, 10, 0, pos(0.0), antenna(), vec![], 0).unwrap();
        let b = reg.register(2, 11, 0, pos(1.0), antenna(), vec![], 0).unwrap();
        reg.deregister_rank(1);
        assert!(reg.get(a).is_none());
        assert!(reg.get(b).is_some());
    }
}
