//! In-process fabric (spec §4.5 "Fallback mode"): every rank's channel is a
//! bounded `embassy_sync::channel::Channel`, the same primitive the teacher
//! uses for its node/network/UI queues. Used by the channel stub's fallback
//! mode and by this crate's own integration tests, where spawning real OS
//! processes would be overkill.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use super::{FabricAdapter, Inbound, Tag};
use crate::error::{CoreError, Result};

const LOCAL_FABRIC_QUEUE_SIZE: usize = 256;

struct RawMessage {
    source_rank: u32,
    tag: Tag,
    bytes: Vec<u8>,
}

type RawChannel = Channel<CriticalSectionRawMutex, RawMessage, LOCAL_FABRIC_QUEUE_SIZE>;

/// Shared switchboard backing every [`LocalFabric`] handle in a single
/// process. One bounded channel per rank; `send` to rank R enqueues on R's
/// channel, `drain` on rank R's own handle dequeues from it.
pub struct LocalFabricHub {
    channels: HashMap<u32, &'static RawChannel>,
    barrier_time_ns: AtomicU64,
}

impl LocalFabricHub {
    pub fn new(world_size: u32) -> Arc<Self> {
        let mut channels = HashMap::new();
        for rank in 0..world_size {
            let ch: &'static RawChannel = Box::leak(Box::new(RawChannel::new()));
            channels.insert(rank, ch);
        }
        Arc::new(LocalFabricHub {
            channels,
            barrier_time_ns: AtomicU64::new(0),
        })
    }

    /// Create the handle a given rank uses to address this hub.
    pub fn handle(self: &Arc<Self>, rank: u32, world_size: u32) -> LocalFabric {
        LocalFabric {
            hub: self.clone(),
            rank,
            world_size,
        }
    }

    /// Advance the safe simulation time visible to every handle's
    /// `barrier_time_ns()` (spec §4.6). Driven by the host scheduler in a
    /// real deployment; set directly here for fallback/test use.
    pub fn advance_barrier(&self, timestamp_ns: u64) {
        self.barrier_time_ns.store(timestamp_ns, Ordering::SeqCst);
    }
}

/// One rank's view of a [`LocalFabricHub`].
pub struct LocalFabric {
    hub: Arc<LocalFabricHub>,
    rank: u32,
    world_size: u32,
}

impl FabricAdapter for LocalFabric {
    fn identity(&self) -> (u32, u32) {
        (self.rank, self.world_size)
    }

    fn send(&self, target_rank: u32, bytes: Vec<u8>, tag: Tag) -> Result<()> {
        let channel = self
            .hub
            .channels
            .get(&target_rank)
            .ok_or_else(|| CoreError::fabric_error(format!("no such rank {target_rank} on local fabric")))?;
        channel
            .try_send(RawMessage {
                source_rank: self.rank,
                tag,
                bytes,
            })
            .map_err(|_| CoreError::fabric_error(format!("local fabric queue to rank {target_rank} is full")))
    }

    fn drain(&self, callback: &mut dyn FnMut(Inbound)) {
        let channel = self.hub.channels.get(&self.rank).expect("own rank must have a channel");
        while let Ok(raw) = channel.try_receive() {
            callback(Inbound {
                source_rank: raw.source_rank,
                tag: raw.tag,
                bytes: raw.bytes,
            });
        }
    }

    fn barrier_time_ns(&self) -> u64 {
        self.hub.barrier_time_ns.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_then_drain_delivers_in_order() {
        let hub = LocalFabricHub::new(2);
        let rank0 = hub.handle(0, 2);
        let rank1 = hub.handle(1, 2);

        rank0.send(1, vec![1], Tag::Tx).unwrap();
        rank0.send(1, vec![2], Tag::Tx).unwrap();

        let mut received = Vec::new();
        rank1.drain(&mut |inbound| received.push(inbound.bytes));
        assert_eq!(received, vec![vec![1], vec![2]]);
    }

    #[test]
    fn send_to_unknown_rank_is_a_fabric_error() {
        let hub = LocalFabricHub::new(1);
        let rank0 = hub.handle(0, 1);
        assert!(rank0.send(5, vec![1], Tag::Tx).is_err());
    }

    #[test]
    fn drain_is_nonblocking_when_empty() {
        let hub = LocalFabricHub::new(1);
        let rank0 = hub.handle(0, 1);
        let mut count = 0;
        rank0.drain(&mut |_| count += 1);
        assert_eq!(count, 0);
    }

    #[test]
    fn barrier_time_is_shared_across_handles() {
        let hub = LocalFabricHub::new(2);
        let rank0 = hub.handle(0, 2);
        let rank1 = hub.handle(1, 2);
        hub.advance_barrier(1_000);
        assert_eq!(rank0.barrier_time_ns(), 1_000);
        assert_eq!(rank1.barrier_time_ns(), 1_000);
    }
}
