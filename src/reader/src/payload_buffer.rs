//! Per-flow byte stashes for MSS-sized segments awaiting the rest of
//! their logical message.

use std::time::{Duration, Instant};

use hashbrown::HashMap;
use parking_lot::Mutex;

use dumper::Direction;

/// Flows whose remote half went away without FIN expire after this.
pub const PACKET_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug)]
struct PayloadBuffer {
    src_to_dst: Vec<u8>,
    dst_to_src: Vec<u8>,
    unknown: Vec<u8>,
    expires: Instant,
}

impl PayloadBuffer {
    fn new(ttl: Duration) -> Self {
        PayloadBuffer {
            src_to_dst: Vec::new(),
            dst_to_src: Vec::new(),
            unknown: Vec::new(),
            expires: Instant::now() + ttl,
        }
    }

    fn refresh(&mut self, ttl: Duration) {
        self.expires = Instant::now() + ttl;
    }

    fn slot_mut(&mut self, direction: Direction) -> &mut Vec<u8> {
        match direction {
            Direction::SrcToDst | Direction::ClientToRemote => &mut self.src_to_dst,
            Direction::DstToSrc | Direction::RemoteToClient => &mut self.dst_to_src,
            Direction::Unknown => &mut self.unknown,
        }
    }

    fn size(&self) -> usize {
        self.src_to_dst.len() + self.dst_to_src.len() + self.unknown.len()
    }

    fn expired(&self, now: Instant) -> bool {
        self.expires < now
    }
}

/// All payload buffers behind one coarse mutex; the packet handler is the
/// only writer and the purger the only other reader.
pub struct PayloadBufferManager {
    ttl: Duration,
    buffers: Mutex<HashMap<String, PayloadBuffer>>,
}

impl PayloadBufferManager {
    pub fn new(ttl: Duration) -> Self {
        PayloadBufferManager {
            ttl,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn create(&self, key: &str) {
        self.buffers
            .lock()
            .insert(key.to_string(), PayloadBuffer::new(self.ttl));
    }

    pub fn remove(&self, key: &str) {
        self.buffers.lock().remove(key);
    }

    pub fn append(&self, key: &str, direction: Direction, bytes: &[u8]) {
        let mut buffers = self.buffers.lock();
        let buffer = buffers
            .entry(key.to_string())
            .or_insert_with(|| PayloadBuffer::new(self.ttl));
        buffer.refresh(self.ttl);
        buffer.slot_mut(direction).extend_from_slice(bytes);
    }

    /// Drain the buffered prefix for one direction, refreshing expiry.
    pub fn take(&self, key: &str, direction: Direction) -> Vec<u8> {
        let mut buffers = self.buffers.lock();
        match buffers.get_mut(key) {
            Some(buffer) => {
                buffer.refresh(self.ttl);
                std::mem::take(buffer.slot_mut(direction))
            }
            None => Vec::new(),
        }
    }

    /// Drop expired and empty buffers; returns purged payload bytes.
    pub fn purge(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        self.buffers.lock().retain(|_, buffer| {
            let size = buffer.size();
            if buffer.expired(now) || size == 0 {
                purged += size;
                false
            } else {
                true
            }
        });
        purged
    }

    pub fn len(&self) -> usize {
        self.buffers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.lock().is_empty()
    }

    pub fn total_bytes(&self) -> usize {
        self.buffers.lock().values().map(PayloadBuffer::size).sum()
    }
}
