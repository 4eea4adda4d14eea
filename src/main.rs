//! Process entry point (SPEC_FULL §2 "Process bootstrap & CLI").
//!
//! A single binary with two subcommands: `channel` brings up the channel
//! processor (spec §4.4) on the designated channel rank, `device` brings up a
//! channel stub (spec §4.5) on a device rank. Both bind a [`fabric::tcp::TcpFabric`]
//! and drive their receive loop from a single `embassy_executor` task, the
//! same scheduling substrate the teacher uses for its own node/network tasks
//! (spec §5: single-threaded cooperative, no worker threads in the core).

mod channel_processor;
mod channel_stub;
mod config;
mod error;
mod fabric;
mod fixture;
mod propagation;
mod registry;
mod wire;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use embassy_executor::Executor;
use embassy_time::{Duration as EmbassyDuration, Timer};
use env_logger::Builder;
use log::{LevelFilter, error, info};

use channel_processor::ChannelProcessor;
use channel_stub::{ChannelStub, RadioAttachment, Reception};
use config::ProcessConfig;
use fabric::tcp::TcpFabric;

const DEFAULT_POLL_INTERVAL_MS: u64 = 5;

#[derive(Parser)]
#[command(name = "yanswifi-channeld", about = "Distributed YansWifi-style channel: processor and device-rank stub")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the channel processor (spec §4.4). Must be launched on the channel rank.
    Channel {
        /// This process's rank; must equal the configured channel rank.
        #[arg(long)]
        rank: u32,
        /// Total number of ranks in this run (channel rank + device ranks).
        #[arg(long)]
        world_size: u32,
        /// Address to bind and accept device-rank connections on.
        #[arg(long)]
        listen_addr: SocketAddr,
        /// Optional TOML file overriding default tunables (spec GLOSSARY,
        /// SPEC_FULL §2).
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Run a channel stub (spec §4.5) on a device rank.
    Device {
        /// This process's rank; must differ from the channel rank.
        #[arg(long)]
        rank: u32,
        /// Total number of ranks in this run.
        #[arg(long)]
        world_size: u32,
        /// Rank hosting the channel processor.
        #[arg(long)]
        channel_rank: u32,
        /// Address the channel rank is listening on.
        #[arg(long)]
        channel_addr: SocketAddr,
        /// Optional TOML file overriding default tunables.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Demo/test mode (SPEC_FULL §2 "Static topology fixture loader"): load a
    /// device topology from a JSON fixture and drive one transmission through
    /// an in-process channel processor + stubs, entirely over
    /// [`fabric::local::LocalFabric`]. Not a production deployment path.
    Replay {
        /// Path to a `SceneFixture` JSON file (see `fixture.rs`).
        #[arg(long)]
        scene: PathBuf,
        /// `node_id` of the device that transmits.
        #[arg(long)]
        transmitter_node_id: u32,
        /// Transmit power in dBm.
        #[arg(long, default_value_t = 20.0)]
        tx_power_dbm: f64,
    },
}

fn init_logging() {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("yanswifi_channeld"), LevelFilter::Debug)
        .parse_default_env()
        .init();
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Channel { rank, world_size, listen_addr, config } => run_channel(rank, world_size, listen_addr, config),
        Command::Device { rank, world_size, channel_rank, channel_addr, config } => {
            run_device(rank, world_size, channel_rank, channel_addr, config)
        }
        Command::Replay { scene, transmitter_node_id, tx_power_dbm } => run_replay(scene, transmitter_node_id, tx_power_dbm),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<ProcessConfig> {
    match path {
        Some(p) => ProcessConfig::load(&p),
        None => Ok(ProcessConfig::default()),
    }
}

fn run_channel(rank: u32, world_size: u32, listen_addr: SocketAddr, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let cfg = load_config(config_path)?;
    info!("channel rank {rank}: binding on {listen_addr}, expecting {} device ranks", world_size.saturating_sub(1));

    let fabric = TcpFabric::bind_channel(rank, world_size, listen_addr)
        .map_err(|e| anyhow::anyhow!("binding channel fabric: {e}"))?;
    let mut processor =
        ChannelProcessor::init(rank, rank, fabric).map_err(|e| anyhow::anyhow!("initializing channel processor: {e}"))?;

    if let Some(threshold_w) = cfg.reception_threshold_w() {
        processor.engine_mut().reception_threshold_w = threshold_w;
    }

    let poll_interval = EmbassyDuration::from_millis(cfg.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS));
    let heartbeat_interval = EmbassyDuration::from_millis(cfg.heartbeat_interval_ms.unwrap_or(5_000));

    let executor: &'static mut Executor = Box::leak(Box::new(Executor::new()));
    executor.run(|spawner| {
        spawner
            .spawn(channel_task(processor, poll_interval, heartbeat_interval))
            .expect("failed to spawn channel processor task");
    });
}

#[embassy_executor::task]
async fn channel_task(mut processor: ChannelProcessor<TcpFabric>, poll_interval: EmbassyDuration, heartbeat_interval: EmbassyDuration) {
    let mut since_heartbeat = EmbassyDuration::from_millis(0);
    loop {
        if let Err(e) = processor.run_once() {
            error!("channel processor fatal: {e}");
            processor.shutdown();
            std::process::exit(1);
        }
        since_heartbeat += poll_interval;
        if since_heartbeat >= heartbeat_interval {
            if let Err(e) = processor.broadcast_heartbeat() {
                error!("channel processor fatal during heartbeat: {e}");
                processor.shutdown();
                std::process::exit(1);
            }
            since_heartbeat = EmbassyDuration::from_millis(0);
        }
        Timer::after(poll_interval).await;
    }
}

fn run_device(rank: u32, world_size: u32, channel_rank: u32, channel_addr: SocketAddr, config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let cfg = load_config(config_path)?;
    info!("device rank {rank}: dialing channel rank {channel_rank} at {channel_addr}");

    let fabric = TcpFabric::dial_device(rank, world_size, channel_rank, channel_addr)
        .map_err(|e| anyhow::anyhow!("dialing channel fabric: {e}"))?;
    let mut stub = ChannelStub::init(rank, channel_rank, fabric).map_err(|e| anyhow::anyhow!("initializing channel stub: {e}"))?;

    if let Some(ms) = cfg.registration_timeout_ms {
        stub = stub.with_registration_timeout(std::time::Duration::from_millis(ms));
    }
    if let Some(epsilon) = cfg.position_epsilon_m {
        stub = stub.with_position_epsilon_m(epsilon);
    }
    if let Some(ms) = cfg.heartbeat_interval_ms {
        stub = stub.with_heartbeat_interval(std::time::Duration::from_millis(ms));
    }

    let poll_interval = EmbassyDuration::from_millis(cfg.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS));

    let executor: &'static mut Executor = Box::leak(Box::new(Executor::new()));
    executor.run(|spawner| {
        spawner.spawn(device_task(stub, poll_interval)).expect("failed to spawn channel stub task");
    });
}

/// Drives the stub's downward receive loop; no radios are attached here
/// because attachment is driven by the upper layer this core treats as an
/// external collaborator (spec §1). In a real deployment the upper layer
/// calls `attach`/`send`/`notify_position_changed` directly on this same
/// `ChannelStub`; this task only keeps the wire side alive and logs
/// deliveries, matching how the teacher's own `node_task` logs radio traffic
/// it doesn't otherwise act on.
#[embassy_executor::task]
async fn device_task(mut stub: ChannelStub<TcpFabric>, poll_interval: EmbassyDuration) {
    loop {
        let result = stub.run_once(&mut |handle, reception: Reception| {
            info!(
                "radio {handle}: received {} bytes from device {} at {:.1} dBm (delay={}ns)",
                reception.payload.len(),
                reception.transmitter_device_id,
                reception.rx_power_dbm,
                reception.delay_ns
            );
        });
        if let Err(e) = result {
            error!("channel stub fatal: {e}");
            stub.shutdown();
            std::process::exit(1);
        }
        if let Err(e) = stub.maybe_emit_heartbeat() {
            error!("channel stub fatal during heartbeat: {e}");
            stub.shutdown();
            std::process::exit(1);
        }
        Timer::after(poll_interval).await;
    }
}

/// Synchronous, single-process demo: attach every device from the fixture,
/// transmit once from the named device, and print every `RX_NOTIFICATION`
/// the local propagation engine produced. Exercises the same processor/stub
/// code paths a distributed deployment uses, over `fabric::local::LocalFabric`
/// instead of `fabric::tcp::TcpFabric` (spec §4.5 "Fallback mode").
fn run_replay(scene_path: PathBuf, transmitter_node_id: u32, tx_power_dbm: f64) -> anyhow::Result<()> {
    use fabric::local::LocalFabricHub;

    let scene = fixture::SceneFixture::load(&scene_path)?;
    let world_size = scene.devices.len() as u32 + 1;
    let channel_rank = 0;
    let hub = LocalFabricHub::new(world_size);

    let mut processor = ChannelProcessor::init(channel_rank, channel_rank, hub.handle(channel_rank, world_size))
        .map_err(|e| anyhow::anyhow!("initializing replay channel processor: {e}"))?;

    let mut stubs: Vec<ChannelStub<fabric::local::LocalFabric>> = Vec::new();
    let mut transmitter_handle = None;
    for (idx, device) in scene.devices.iter().enumerate() {
        let rank = device.owning_rank;
        let mut stub =
            ChannelStub::init(rank, channel_rank, hub.handle(rank, world_size)).map_err(|e| anyhow::anyhow!("initializing stub for rank {rank}: {e}"))?;

        let handle: channel_stub::RadioHandle = idx as u32;
        let attachment = RadioAttachment {
            node_id: device.node_id,
            phy_id: 0,
            phy_type: 0,
            channel_number: 0,
            channel_width_mhz: 20,
            position: device.position(),
            antenna: device.antenna(),
            frequencies_hz: device.frequencies_hz.clone(),
        };

        // Pump the processor in the background while this stub's attach()
        // blocks on its CONFIG_ACK, the same pattern the stub's own tests use.
        let device_id = std::thread::scope(|scope| -> anyhow::Result<u32> {
            let stopped = std::sync::atomic::AtomicBool::new(false);
            let processor_ref = &mut processor;
            let result = scope.spawn(|| {
                while !stopped.load(std::sync::atomic::Ordering::Relaxed) {
                    let _ = processor_ref.run_once();
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
            });
            let attach_result = stub.attach(handle, attachment);
            stopped.store(true, std::sync::atomic::Ordering::Relaxed);
            result.join().ok();
            Ok(attach_result.map_err(|e| anyhow::anyhow!("attach node {}: {e}", device.node_id))?)
        })?;

        if device.node_id == transmitter_node_id {
            transmitter_handle = Some((stubs.len(), handle, device_id));
        }
        stubs.push(stub);
    }

    let (tx_idx, tx_handle, _tx_device_id) =
        transmitter_handle.ok_or_else(|| anyhow::anyhow!("no device with node_id={transmitter_node_id} in fixture"))?;

    info!("transmitting {tx_power_dbm} dBm from node {transmitter_node_id}");
    stubs[tx_idx]
        .send(tx_handle, tx_power_dbm, b"replay payload".to_vec(), Vec::new())
        .map_err(|e| anyhow::anyhow!("send: {e}"))?;
    processor.run_once().map_err(|e| anyhow::anyhow!("processor run_once: {e}"))?;

    let mut total_receptions = 0usize;
    for (idx, stub) in stubs.iter_mut().enumerate() {
        if idx == tx_idx {
            continue;
        }
        stub.run_once(&mut |_, reception| {
            total_receptions += 1;
            println!(
                "RX device_node={} rx_power_dbm={:.2} path_loss_db={:.2} distance_m={:.2} delay_ns={}",
                scene.devices[idx].node_id, reception.rx_power_dbm, reception.path_loss_db, reception.distance_m, reception.delay_ns
            );
        })
        .map_err(|e| anyhow::anyhow!("stub run_once: {e}"))?;
    }
    info!("replay complete: {total_receptions} reception(s) delivered");

    Ok(())
}
