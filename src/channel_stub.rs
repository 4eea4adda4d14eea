//! Channel stub (spec §4.5): the per-device-process object that presents the
//! same operation surface as the in-process channel so existing radios and
//! helpers attach to it transparently. Every operation either emits a wire
//! message or is satisfied from local shadow state; no propagation math
//! happens here.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::error::{CoreError, ErrorKind, Result};
use crate::fabric::{FabricAdapter, Inbound, Tag};
use crate::registry::{AntennaParams, Position};
use crate::wire::body::*;
use crate::wire::header::{HEADER_VERSION, Header, MessageType};
use crate::wire::{Body, Message};

/// Opaque handle the caller uses to name its own local radio object. The
/// stub never dereferences it; it only threads it through the bidirectional
/// device-id index (spec §3 "Radio registration (stub side)").
pub type RadioHandle = u32;

const DEFAULT_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_POSITION_EPSILON_M: f64 = 1.0;
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// Everything `attach(radio)` needs to gather from the local radio before
/// emitting `DEVICE_REGISTER` (spec §4.5 step 1).
#[derive(Debug, Clone)]
pub struct RadioAttachment {
    pub node_id: u32,
    pub phy_id: u32,
    pub phy_type: u32,
    pub channel_number: u32,
    pub channel_width_mhz: u32,
    pub position: Position,
    pub antenna: AntennaParams,
    pub frequencies_hz: Vec<u32>,
}

/// What the stub hands back to the caller on `RX_NOTIFICATION` (spec §4.5
/// "construct a reception object equivalent to what the monolithic channel
/// would have delivered").
#[derive(Debug, Clone)]
pub struct Reception {
    pub transmitter_device_id: u32,
    pub phy_id: u32,
    pub rx_power_w: f64,
    pub rx_power_dbm: f64,
    pub path_loss_db: f64,
    pub distance_m: f64,
    pub frequency_hz: u32,
    pub reception_timestamp_ns: u64,
    pub delay_ns: u64,
    pub payload: Vec<u8>,
}

/// Per-device-process object that forwards radio operations over the fabric
/// and delivers remote results back (spec §4.5). Generic over the fabric for
/// the same reason as [`crate::channel_processor::ChannelProcessor`]: the
/// same logic runs distributed (over [`crate::fabric::tcp::TcpFabric`]) or in
/// fallback mode (over [`crate::fabric::local::LocalFabric`], with a
/// `ChannelProcessor` running in the same process against the other end of
/// the same hub).
pub struct ChannelStub<F: FabricAdapter> {
    fabric: F,
    local_rank: u32,
    channel_rank: u32,
    registration_timeout: Duration,
    position_epsilon_m: f64,
    heartbeat_interval: Duration,
    last_heartbeat_at: Instant,

    handle_to_device: HashMap<RadioHandle, u32>,
    device_to_handle: HashMap<u32, RadioHandle>,
    pending_registrations: HashMap<u32, (RadioHandle, u32)>,
    device_phy_id: HashMap<u32, u32>,
    last_sent_position: HashMap<RadioHandle, Position>,

    outbound_sequences: HashMap<u32, u32>,
    inbound_sequences: HashMap<u32, u32>,

    loss_model_shadow: Option<ConfigBody>,
    delay_model_shadow: Option<ConfigBody>,

    /// Count of non-fatal dropped messages (spec §7/§8 "per-run summary").
    dropped_count: u64,
}

impl<F: FabricAdapter> ChannelStub<F> {
    /// Bootstrap with `(local_rank, channel_rank)` (spec §6 "Process-level
    /// surface"); fails fast if they're equal, since the stub and the
    /// processor can never be colocated as the same logical rank.
    pub fn init(local_rank: u32, channel_rank: u32, fabric: F) -> Result<Self> {
        if local_rank == channel_rank {
            return Err(CoreError::new_local(
                ErrorKind::ProtocolViolation,
                format!("channel stub init called with local_rank == channel_rank ({local_rank})"),
            ));
        }
        Ok(ChannelStub {
            fabric,
            local_rank,
            channel_rank,
            registration_timeout: DEFAULT_REGISTRATION_TIMEOUT,
            position_epsilon_m: DEFAULT_POSITION_EPSILON_M,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            last_heartbeat_at: Instant::now(),
            handle_to_device: HashMap::new(),
            device_to_handle: HashMap::new(),
            pending_registrations: HashMap::new(),
            device_phy_id: HashMap::new(),
            last_sent_position: HashMap::new(),
            outbound_sequences: HashMap::new(),
            inbound_sequences: HashMap::new(),
            loss_model_shadow: None,
            delay_model_shadow: None,
            dropped_count: 0,
        })
    }

    /// Non-fatal drops observed so far (spec §7/§8 "per-run summary").
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count
    }

    /// Release local state (spec §4.5 "shutdown" counterpart). Logs the
    /// per-run summary spec §7 requires for non-fatal drops.
    pub fn shutdown(self) {
        log::info!(
            "channel stub on rank {} shutting down: {} radios attached, {} messages dropped",
            self.local_rank,
            self.handle_to_device.len(),
            self.dropped_count
        );
    }

    pub fn with_registration_timeout(mut self, timeout: Duration) -> Self {
        self.registration_timeout = timeout;
        self
    }

    pub fn with_position_epsilon_m(mut self, epsilon_m: f64) -> Self {
        self.position_epsilon_m = epsilon_m;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn device_id_for(&self, handle: RadioHandle) -> Option<u32> {
        self.handle_to_device.get(&handle).copied()
    }

    fn next_outbound_sequence(&mut self, message_type: MessageType) -> u32 {
        let seq = self.outbound_sequences.entry(message_type.as_u32()).or_insert(0);
        *seq += 1;
        *seq
    }

    fn send_message(&mut self, message_type: MessageType, tag: Tag, body: Body, device_id: u32) -> Result<u32> {
        let sequence_number = self.next_outbound_sequence(message_type);
        let header = Header {
            message_type,
            total_length: 0,
            source_rank: self.local_rank,
            destination_rank: self.channel_rank,
            timestamp_ns: self.fabric.barrier_time_ns(),
            sequence_number,
            device_id,
            header_version: HEADER_VERSION,
            body_checksum: 0,
        };
        let message = Message { header, body };
        let bytes = message
            .serialize()
            .map_err(|e| CoreError::fabric_error(format!("serialize {message_type:?}: {e}")))?;
        self.fabric.send(self.channel_rank, bytes, tag)?;
        Ok(sequence_number)
    }

    /// `attach(radio)` (spec §4.5): synchronously obtain a device id, failing
    /// loudly if no `CONFIG_ACK` arrives within the registration timeout.
    /// Drives the fabric's own `drain()` while waiting, so it works whether
    /// the channel processor lives in another process or is simply being
    /// pumped by a test harness over a shared [`crate::fabric::local::LocalFabric`].
    pub fn attach(&mut self, handle: RadioHandle, descriptor: RadioAttachment) -> Result<u32> {
        let body = DeviceRegisterBody {
            phy_id: descriptor.phy_id,
            phy_type: descriptor.phy_type,
            channel_number: descriptor.channel_number,
            channel_width_mhz: descriptor.channel_width_mhz,
            node_id: descriptor.node_id,
            pos_x: descriptor.position.x,
            pos_y: descriptor.position.y,
            pos_z: descriptor.position.z,
        };
        let sequence_number = self.send_message(MessageType::DeviceRegister, Tag::Register, Body::DeviceRegister(body), 0)?;
        self.pending_registrations.insert(sequence_number, (handle, descriptor.phy_id));

        let deadline = Instant::now() + self.registration_timeout;
        loop {
            self.pump_inbound()?;
            if let Some(&device_id) = self.handle_to_device.get(&handle) {
                return Ok(device_id);
            }
            if Instant::now() >= deadline {
                self.pending_registrations.remove(&sequence_number);
                return Err(CoreError::registration_timeout(format!(
                    "no CONFIG_ACK for DEVICE_REGISTER sequence {sequence_number} (node_id={}) within {:?}",
                    descriptor.node_id, self.registration_timeout
                )));
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn detach(&mut self, handle: RadioHandle) {
        if let Some(device_id) = self.handle_to_device.remove(&handle) {
            self.device_to_handle.remove(&device_id);
            self.device_phy_id.remove(&device_id);
            self.last_sent_position.remove(&handle);
            let body = DeviceRemoveBody;
            let header = Header {
                message_type: MessageType::DeviceRemove,
                total_length: 0,
                source_rank: self.local_rank,
                destination_rank: self.channel_rank,
                timestamp_ns: self.fabric.barrier_time_ns(),
                sequence_number: self.next_outbound_sequence(MessageType::DeviceRemove),
                device_id,
                header_version: HEADER_VERSION,
                body_checksum: 0,
            };
            let message = Message { header, body: Body::DeviceRemove(body) };
            if let Ok(bytes) = message.serialize() {
                let _ = self.fabric.send(self.channel_rank, bytes, Tag::Remove);
            }
        }
    }

    /// `send(sender_radio, payload, tx_power, tx_vector)` (spec §4.5): emits
    /// `TX_REQUEST` at the current simulation time. Never touches a local
    /// channel object; this process holds no propagation state.
    pub fn send(&mut self, handle: RadioHandle, tx_power_dbm: f64, payload: Vec<u8>, tx_vector: Vec<u8>) -> Result<()> {
        let device_id = self
            .handle_to_device
            .get(&handle)
            .copied()
            .ok_or_else(|| CoreError::unknown_device(format!("send() on unattached radio handle {handle}")))?;
        let body = TxRequestBody {
            device_id,
            phy_id: self.device_phy_id.get(&device_id).copied().unwrap_or(0),
            tx_power_pw: crate::wire::units::watts_to_picowatts(crate::wire::units::dbm_to_watts(tx_power_dbm)),
            payload,
            tx_vector,
        };
        self.send_message(MessageType::TxRequest, Tag::Tx, Body::TxRequest(body), device_id)?;
        Ok(())
    }

    /// `set_loss_model(model)` (spec §4.5): emits `CONFIG_LOSS_MODEL` and
    /// keeps a local shadow copy so any future local query sees a consistent
    /// value even before the channel rank has acknowledged it.
    pub fn set_loss_model(&mut self, model_type_hash: u32, params: Vec<u8>) -> Result<()> {
        let body = ConfigBody { config_type: ConfigType::Loss, model_type_hash, params };
        self.loss_model_shadow = Some(body.clone());
        self.send_message(MessageType::ConfigLossModel, Tag::Config, Body::ConfigLossModel(body), 0)?;
        Ok(())
    }

    pub fn set_delay_model(&mut self, model_type_hash: u32, params: Vec<u8>) -> Result<()> {
        let body = ConfigBody { config_type: ConfigType::Delay, model_type_hash, params };
        self.delay_model_shadow = Some(body.clone());
        self.send_message(MessageType::ConfigDelayModel, Tag::Config, Body::ConfigDelayModel(body), 0)?;
        Ok(())
    }

    pub fn current_loss_model(&self) -> Option<&ConfigBody> {
        self.loss_model_shadow.as_ref()
    }

    pub fn current_delay_model(&self) -> Option<&ConfigBody> {
        self.delay_model_shadow.as_ref()
    }

    /// `notify_position_changed(radio, new_position)` (spec §4.5): suppressed
    /// unless the radio has moved more than `position_epsilon_m` since the
    /// last update actually sent on the wire.
    pub fn notify_position_changed(&mut self, handle: RadioHandle, new_position: Position) -> Result<()> {
        let device_id = self
            .handle_to_device
            .get(&handle)
            .copied()
            .ok_or_else(|| CoreError::unknown_device(format!("notify_position_changed() on unattached radio handle {handle}")))?;

        if let Some(last) = self.last_sent_position.get(&handle) {
            if last.distance_to(&new_position) <= self.position_epsilon_m {
                return Ok(());
            }
        }

        let body = PositionUpdateBody {
            device_id,
            pos_x: new_position.x,
            pos_y: new_position.y,
            pos_z: new_position.z,
            velocity: 0.0,
            heading: 0.0,
        };
        self.send_message(MessageType::PositionUpdate, Tag::Position, Body::PositionUpdate(body), device_id)?;
        self.last_sent_position.insert(handle, new_position);
        Ok(())
    }

    /// Emit a `HEARTBEAT` if the configured interval has elapsed since the
    /// last one (supplemented feature: liveness signal only, no protocol
    /// meaning is attached to it by this core).
    pub fn maybe_emit_heartbeat(&mut self) -> Result<()> {
        if self.last_heartbeat_at.elapsed() < self.heartbeat_interval {
            return Ok(());
        }
        self.send_message(MessageType::Heartbeat, Tag::Heartbeat, Body::Heartbeat, 0)?;
        self.last_heartbeat_at = Instant::now();
        Ok(())
    }

    /// Drive the downward fabric receive loop once (spec §4.5 "Operations
    /// driven downward from the fabric receive loop"). `deliver` is called
    /// once per `RX_NOTIFICATION` addressed to one of this rank's attached
    /// radios. Returns `Err` only for a fatal condition (causal violation,
    /// sequence regression, fabric error); the caller terminates the process
    /// on `Err`, matching the channel processor's own contract.
    pub fn run_once(&mut self, deliver: &mut dyn FnMut(RadioHandle, Reception)) -> Result<()> {
        self.pump_inbound_with(deliver)
    }

    fn pump_inbound(&mut self) -> Result<()> {
        self.pump_inbound_with(&mut |_, _| {})
    }

    fn pump_inbound_with(&mut self, deliver: &mut dyn FnMut(RadioHandle, Reception)) -> Result<()> {
        let mut inbound: Vec<Inbound> = Vec::new();
        self.fabric.drain(&mut |msg| inbound.push(msg));

        for frame in inbound {
            let message = match Message::parse(&frame.bytes) {
                Ok(m) => m,
                Err(e) => {
                    log::warn!("channel stub rank {}: dropping unparseable message: {e}", self.local_rank);
                    self.dropped_count += 1;
                    continue;
                }
            };
            if message.header.source_rank != self.channel_rank {
                log::warn!(
                    "channel stub rank {}: dropping message claiming source_rank={} (expected channel rank {})",
                    self.local_rank,
                    message.header.source_rank,
                    self.channel_rank
                );
                self.dropped_count += 1;
                continue;
            }

            match self.check_sequence(message.header.message_type.as_u32(), message.header.sequence_number) {
                SequenceOutcome::Regression(prev) => {
                    return Err(CoreError::new_fatal(
                        ErrorKind::ProtocolViolation,
                        format!(
                            "sequence regression from channel rank {} type {:?}: saw {} after {}",
                            self.channel_rank, message.header.message_type, message.header.sequence_number, prev
                        ),
                    ));
                }
                SequenceOutcome::Duplicate => {
                    self.dropped_count += 1;
                    continue;
                }
                SequenceOutcome::Advanced => {}
            }

            self.dispatch_downward(message, deliver)?;
        }
        Ok(())
    }

    fn check_sequence(&mut self, message_type: u32, sequence_number: u32) -> SequenceOutcome {
        match self.inbound_sequences.get(&message_type).copied() {
            None => {
                self.inbound_sequences.insert(message_type, sequence_number);
                SequenceOutcome::Advanced
            }
            Some(prev) if sequence_number == prev => SequenceOutcome::Duplicate,
            Some(prev) if sequence_number < prev => SequenceOutcome::Regression(prev),
            Some(_) => {
                self.inbound_sequences.insert(message_type, sequence_number);
                SequenceOutcome::Advanced
            }
        }
    }

    fn dispatch_downward(&mut self, message: Message, deliver: &mut dyn FnMut(RadioHandle, Reception)) -> Result<()> {
        match message.body {
            Body::ConfigAck(ack) => {
                if let Some((handle, phy_id)) = self.pending_registrations.remove(&ack.echoed_sequence_number) {
                    self.handle_to_device.insert(handle, ack.assigned_device_id);
                    self.device_to_handle.insert(ack.assigned_device_id, handle);
                    self.device_phy_id.insert(ack.assigned_device_id, phy_id);
                    log::info!(
                        "rank {}: radio handle {handle} attached as device {}",
                        self.local_rank,
                        ack.assigned_device_id
                    );
                } else {
                    log::debug!("rank {}: CONFIG_ACK for unknown pending sequence {}", self.local_rank, ack.echoed_sequence_number);
                }
                Ok(())
            }
            Body::RxNotification(rx) => {
                let Some(&handle) = self.device_to_handle.get(&rx.receiver_device_id) else {
                    log::warn!("rank {}: RX_NOTIFICATION for unattached device {}", self.local_rank, rx.receiver_device_id);
                    self.dropped_count += 1;
                    return Ok(());
                };
                let now = self.fabric.barrier_time_ns();
                let reception_timestamp_ns = rx.tx_timestamp_ns + rx.propagation_delay_ns;
                if reception_timestamp_ns < now {
                    return Err(CoreError::causal_violation(format!(
                        "RX_NOTIFICATION for device {} would deliver at {reception_timestamp_ns}, before now={now}",
                        rx.receiver_device_id
                    )));
                }
                let delay_ns = reception_timestamp_ns - now;
                deliver(
                    handle,
                    Reception {
                        transmitter_device_id: rx.transmitter_device_id,
                        phy_id: rx.phy_id,
                        rx_power_w: crate::wire::units::picowatts_to_watts(rx.rx_power_pw),
                        rx_power_dbm: rx.rx_power_dbm,
                        path_loss_db: rx.path_loss_db,
                        distance_m: rx.distance_m,
                        frequency_hz: rx.frequency_hz,
                        reception_timestamp_ns,
                        delay_ns,
                        payload: rx.payload,
                    },
                );
                Ok(())
            }
            Body::ErrorNotify(err) => {
                let kind = crate::error::ErrorKind::from_wire_code(err.error_kind);
                log::error!(
                    "rank {}: ERROR_NOTIFY from channel rank: kind={:?} context_sequence={} message={}",
                    self.local_rank,
                    kind,
                    err.context_sequence,
                    err.message
                );
                if matches!(kind, Some(ErrorKind::CausalViolation) | Some(ErrorKind::FabricError)) {
                    return Err(CoreError::new_fatal(
                        kind.unwrap(),
                        format!("channel rank reported fatal error: {}", err.message),
                    ));
                }
                Ok(())
            }
            Body::Heartbeat => Ok(()),
            other => {
                log::warn!("rank {}: unexpected downward message {:?}", self.local_rank, other);
                self.dropped_count += 1;
                Ok(())
            }
        }
    }
}

enum SequenceOutcome {
    Advanced,
    Duplicate,
    Regression(u32),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel_processor::ChannelProcessor;
    use crate::fabric::local::LocalFabricHub;

    fn descriptor(node_id: u32, x: f64) -> RadioAttachment {
        RadioAttachment {
            node_id,
            phy_id: 0,
            phy_type: 0,
            channel_number: 6,
            channel_width_mhz: 20,
            position: Position { x, y: 0.0, z: 0.0 },
            antenna: AntennaParams { gain_dbi: 0.0 },
            frequencies_hz: vec![],
        }
    }

    /// Fallback mode (spec §4.5): stub and processor share a `LocalFabric`
    /// hub in one process, with no real transport involved.
    struct Fallback {
        processor: ChannelProcessor<crate::fabric::local::LocalFabric>,
        stub: ChannelStub<crate::fabric::local::LocalFabric>,
    }

    fn fallback(world_size: u32) -> Fallback {
        let hub = LocalFabricHub::new(world_size);
        let processor = ChannelProcessor::init(0, 0, hub.handle(0, world_size)).unwrap();
        let stub = ChannelStub::init(1, 0, hub.handle(1, world_size)).unwrap();
        Fallback { processor, stub }
    }

    /// Run `attach` to completion by pumping the processor on a background
    /// thread for its duration; a real deployment runs the processor as a
    /// separate OS process, here a thread stands in for that.
    fn attach_with_background_pump(processor: &mut ChannelProcessor<crate::fabric::local::LocalFabric>, stub: &mut ChannelStub<crate::fabric::local::LocalFabric>, handle: RadioHandle, descriptor: RadioAttachment) -> Result<u32> {
        let stopped = std::sync::atomic::AtomicBool::new(false);
        let result = std::thread::scope(|scope| {
            scope.spawn(|| {
                while !stopped.load(std::sync::atomic::Ordering::Relaxed) {
                    let _ = processor.run_once();
                    std::thread::sleep(Duration::from_millis(1));
                }
            });
            let result = stub.attach(handle, descriptor);
            stopped.store(true, std::sync::atomic::Ordering::Relaxed);
            result
        });
        result
    }

    #[test]
    fn attach_round_trip_scenario_6() {
        let mut f = fallback(2);
        let handle: RadioHandle = 42;
        let result = attach_with_background_pump(&mut f.processor, &mut f.stub, handle, descriptor(10, 0.0));
        assert!(result.is_ok(), "attach should succeed: {result:?}");
        assert_eq!(f.stub.device_id_for(handle), Some(1));
    }

    #[test]
    fn registration_times_out_with_no_processor_running() {
        let hub = LocalFabricHub::new(2);
        let mut stub = ChannelStub::init(1, 0, hub.handle(1, 2)).unwrap().with_registration_timeout(Duration::from_millis(20));
        let result = stub.attach(1, descriptor(10, 0.0));
        assert!(result.is_err());
        assert_eq!(result.unwrap_err().kind, ErrorKind::RegistrationTimeout);
    }

    #[test]
    fn position_update_suppressed_within_epsilon() {
        let hub = LocalFabricHub::new(2);
        let fabric1 = hub.handle(1, 2);
        let mut stub = ChannelStub::init(1, 0, fabric1).unwrap();
        stub.handle_to_device.insert(7, 99);
        stub.last_sent_position.insert(7, Position { x: 0.0, y: 0.0, z: 0.0 });

        stub.notify_position_changed(7, Position { x: 0.5, y: 0.0, z: 0.0 }).unwrap();
        let fabric0 = hub.handle(0, 2);
        let mut count = 0;
        fabric0.drain(&mut |_| count += 1);
        assert_eq!(count, 0, "a sub-epsilon move must not emit POSITION_UPDATE");

        stub.notify_position_changed(7, Position { x: 5.0, y: 0.0, z: 0.0 }).unwrap();
        fabric0.drain(&mut |_| count += 1);
        assert_eq!(count, 1, "a move past epsilon must emit exactly one POSITION_UPDATE");
    }

    #[test]
    fn unattached_rx_notification_counts_as_a_drop() {
        let hub = LocalFabricHub::new(2);
        let fabric1 = hub.handle(1, 2);
        let mut stub = ChannelStub::init(1, 0, fabric1).unwrap();
        assert_eq!(stub.dropped_count(), 0);

        let rx = RxNotificationBody {
            receiver_device_id: 99,
            transmitter_device_id: 1,
            phy_id: 0,
            rx_power_pw: 1,
            rx_power_dbm: -90.0,
            path_loss_db: 10.0,
            distance_m: 1.0,
            frequency_hz: 2_400_000_000,
            propagation_delay_ns: 0,
            tx_timestamp_ns: 0,
            payload: vec![],
        };
        let header = Header {
            message_type: MessageType::RxNotification,
            total_length: 0,
            source_rank: 0,
            destination_rank: 1,
            timestamp_ns: 0,
            sequence_number: 1,
            device_id: 99,
            header_version: HEADER_VERSION,
            body_checksum: 0,
        };
        let message = Message { header, body: Body::RxNotification(rx) };
        stub.dispatch_downward(message, &mut |_, _| {}).unwrap();
        assert_eq!(stub.dropped_count(), 1);
    }

    #[test]
    fn rx_notification_delivers_to_the_right_handle() {
        let hub = LocalFabricHub::new(3);
        let mut processor = ChannelProcessor::init(0, 0, hub.handle(0, 3)).unwrap();
        let mut tx_stub = ChannelStub::init(1, 0, hub.handle(1, 3)).unwrap();
        let mut rx_stub = ChannelStub::init(2, 0, hub.handle(2, 3)).unwrap();

        let tx_handle: RadioHandle = 1;
        let rx_handle: RadioHandle = 2;
        attach_with_background_pump(&mut processor, &mut tx_stub, tx_handle, descriptor(10, 0.0)).unwrap();
        attach_with_background_pump(&mut processor, &mut rx_stub, rx_handle, descriptor(20, 10.0)).unwrap();

        tx_stub.send(tx_handle, 20.0, vec![1, 2, 3], vec![]).unwrap();
        processor.run_once().unwrap();

        let mut delivered = None;
        rx_stub.run_once(&mut |handle, reception| delivered = Some((handle, reception))).unwrap();
        let (handle, reception) = delivered.expect("expected a delivered reception");
        assert_eq!(handle, rx_handle);
        assert!((reception.distance_m - 10.0).abs() < 1e-9);
        assert_eq!(reception.delay_ns, reception.reception_timestamp_ns);
        assert_eq!(reception.payload, vec![1, 2, 3]);
    }
}
