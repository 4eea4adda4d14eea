//! TCP fabric (spec §4.6 concrete transport): one `TcpStream` per (channel,
//! device) pair, each set non-blocking so `send` never blocks and `drain`
//! never blocks. Framing follows the wire header's own `total_length` field
//! (spec §4.1): partial reads are buffered per-connection until a full frame
//! is available, the same length-prefixed-framing discipline the corpus's
//! own fixed-header wire formats use.
//!
//! Ordering per stream is TCP's own, which satisfies the per-(source,
//! destination) FIFO requirement of spec §5.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use super::{FabricAdapter, Inbound, Tag};
use crate::error::{CoreError, Result};
use crate::wire::header::HEADER_SIZE;

struct Connection {
    stream: TcpStream,
    read_buf: Vec<u8>,
    write_pending: Vec<u8>,
}

/// Real process-to-process transport. The channel rank binds one listener;
/// each device rank dials it once at bootstrap (spec §4.6).
pub struct TcpFabric {
    rank: u32,
    world_size: u32,
    peers: Mutex<HashMap<u32, Connection>>,
    barrier_time_ns: AtomicU64,
}

impl TcpFabric {
    /// Bind as the channel rank and accept exactly `world_size - 1`
    /// connections, one per device rank. Each connecting peer announces its
    /// rank as a 4-byte big-endian handshake before any framed traffic.
    pub fn bind_channel(rank: u32, world_size: u32, addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr).map_err(|e| CoreError::fabric_error(format!("bind {addr}: {e}")))?;
        let mut peers = HashMap::new();
        let expected = world_size.saturating_sub(1) as usize;
        for _ in 0..expected {
            let (mut stream, peer_addr) =
                listener.accept().map_err(|e| CoreError::fabric_error(format!("accept: {e}")))?;
            let peer_rank = stream
                .read_u32::<BigEndian>()
                .map_err(|e| CoreError::fabric_error(format!("handshake read from {peer_addr}: {e}")))?;
            stream
                .set_nonblocking(true)
                .map_err(|e| CoreError::fabric_error(format!("set_nonblocking: {e}")))?;
            log::info!("channel rank {rank}: accepted device rank {peer_rank} from {peer_addr}");
            peers.insert(
                peer_rank,
                Connection {
                    stream,
                    read_buf: Vec::new(),
                    write_pending: Vec::new(),
                },
            );
        }
        Ok(TcpFabric {
            rank,
            world_size,
            peers: Mutex::new(peers),
            barrier_time_ns: AtomicU64::new(0),
        })
    }

    /// Dial the channel rank from a device rank.
    pub fn dial_device(rank: u32, world_size: u32, channel_rank: u32, channel_addr: SocketAddr) -> Result<Self> {
        let mut stream = TcpStream::connect(channel_addr)
            .map_err(|e| CoreError::fabric_error(format!("connect {channel_addr}: {e}")))?;
        stream
            .write_u32::<BigEndian>(rank)
            .map_err(|e| CoreError::fabric_error(format!("handshake write: {e}")))?;
        stream
            .set_nonblocking(true)
            .map_err(|e| CoreError::fabric_error(format!("set_nonblocking: {e}")))?;
        let mut peers = HashMap::new();
        peers.insert(
            channel_rank,
            Connection {
                stream,
                read_buf: Vec::new(),
                write_pending: Vec::new(),
            },
        );
        Ok(TcpFabric {
            rank,
            world_size,
            peers: Mutex::new(peers),
            barrier_time_ns: AtomicU64::new(0),
        })
    }

    pub fn set_barrier_time_ns(&self, timestamp_ns: u64) {
        self.barrier_time_ns.store(timestamp_ns, Ordering::SeqCst);
    }

    /// Push as much of `write_pending` through the socket as the kernel
    /// accepts without blocking; leaves the remainder queued for next time.
    fn flush_pending(conn: &mut Connection) -> Result<()> {
        while !conn.write_pending.is_empty() {
            match conn.stream.write(&conn.write_pending) {
                Ok(0) => return Err(CoreError::fabric_error("peer closed connection")),
                Ok(n) => {
                    conn.write_pending.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(CoreError::fabric_error(format!("write: {e}"))),
            }
        }
        Ok(())
    }

    /// Pull whatever bytes the kernel currently has buffered for this
    /// connection, without blocking.
    fn read_available(conn: &mut Connection) -> Result<()> {
        let mut chunk = [0u8; 65536];
        loop {
            match conn.stream.read(&mut chunk) {
                Ok(0) => return Err(CoreError::fabric_error("peer closed connection")),
                Ok(n) => conn.read_buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(CoreError::fabric_error(format!("read: {e}"))),
            }
        }
        Ok(())
    }

    /// Split every complete frame (header + `total_length` body) off the
    /// front of `read_buf`, calling `callback` for each.
    fn extract_frames(peer_rank: u32, conn: &mut Connection, callback: &mut dyn FnMut(Inbound)) {
        loop {
            if conn.read_buf.len() < HEADER_SIZE {
                return;
            }
            let total_length = u32::from_be_bytes([conn.read_buf[4], conn.read_buf[5], conn.read_buf[6], conn.read_buf[7]]) as usize;
            if conn.read_buf.len() < total_length {
                return;
            }
            let frame: Vec<u8> = conn.read_buf.drain(..total_length).collect();
            callback(Inbound {
                source_rank: peer_rank,
                tag: Tag::Tx,
                bytes: frame,
            });
        }
    }
}

impl FabricAdapter for TcpFabric {
    fn identity(&self) -> (u32, u32) {
        (self.rank, self.world_size)
    }

    fn send(&self, target_rank: u32, bytes: Vec<u8>, _tag: Tag) -> Result<()> {
        let mut peers = self.peers.lock().expect("peers mutex poisoned");
        let conn = peers
            .get_mut(&target_rank)
            .ok_or_else(|| CoreError::fabric_error(format!("no connection to rank {target_rank}")))?;
        conn.write_pending.extend_from_slice(&bytes);
        Self::flush_pending(conn)
    }

    fn drain(&self, callback: &mut dyn FnMut(Inbound)) {
        let mut peers = self.peers.lock().expect("peers mutex poisoned");
        for (&peer_rank, conn) in peers.iter_mut() {
            if let Err(e) = Self::flush_pending(conn) {
                log::error!("tcp fabric: flush to rank {peer_rank} failed: {e}");
                continue;
            }
            if let Err(e) = Self::read_available(conn) {
                log::error!("tcp fabric: read from rank {peer_rank} failed: {e}");
                continue;
            }
            Self::extract_frames(peer_rank, conn, callback);
        }
    }

    fn barrier_time_ns(&self) -> u64 {
        self.barrier_time_ns.load(Ordering::SeqCst)
    }
}
