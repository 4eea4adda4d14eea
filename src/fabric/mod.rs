//! Fabric adapter (spec §4.6): the thin abstraction both the channel
//! processor and every channel stub drive their message traffic through.
//! Two concrete transports are provided: [`local::LocalFabric`] (in-process,
//! used by the stub's fallback mode and this crate's own tests) and
//! [`tcp::TcpFabric`] (real process-to-process transport).

pub mod local;
pub mod tcp;

use crate::error::Result;

/// Reserved tag namespace (spec §4.6). Strictly informational: the wire
/// header's `message_type` is authoritative, but a transport is free to use
/// the tag for its own demultiplexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Tag {
    Register = 0,
    Remove = 1,
    Config = 2,
    Tx = 3,
    Rx = 4,
    Position = 5,
    Heartbeat = 6,
    Ack = 7,
    Error = 8,
}

/// One fully received, still-serialized frame handed to a `drain` callback.
pub struct Inbound {
    pub source_rank: u32,
    pub tag: Tag,
    pub bytes: Vec<u8>,
}

/// Capability interface required from the host fabric (spec §4.6). `send`
/// never blocks; `drain` never blocks. Both sides of the core (processor and
/// stub) are written against this trait only, so either transport below can
/// stand in for "the fabric" without the rest of the core knowing which one
/// it got.
pub trait FabricAdapter {
    fn identity(&self) -> (u32, u32);

    /// Queue `bytes` for delivery to `target_rank`. Ownership of the buffer
    /// passes to the adapter; the caller must not assume anything about it
    /// after this call returns.
    fn send(&self, target_rank: u32, bytes: Vec<u8>, tag: Tag) -> Result<()>;

    /// Invoke `callback` once per message currently available, across all
    /// peers. Must not block if nothing is available.
    fn drain(&self, callback: &mut dyn FnMut(Inbound));

    /// Current safe simulation time under conservative synchronization (spec
    /// §4.6), used to validate timestamps on outgoing and incoming messages.
    fn barrier_time_ns(&self) -> u64;
}
