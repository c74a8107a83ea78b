//! Per-connection flow tracking: direction classification, TCP lifecycle,
//! MSS-driven coalescing and decoder dispatch.

use std::sync::Arc;

use hashbrown::{HashMap, HashSet};
use tracing::{debug, warn};

use dumper::log::EventSink;
use dumper::{ConnMetadata, Direction, DumpValue, Dumper};

use crate::packet::TcpPacket;
use crate::payload_buffer::PayloadBufferManager;
use crate::proxy_protocol::parse_proxy_protocol_header;
use crate::target::Target;

pub fn new_conn_id() -> String {
    nanoid::nanoid!()
}

fn flow_key(src: &std::net::SocketAddr, dst: &std::net::SocketAddr) -> String {
    format!("{src}->{dst}")
}

/// Reconstructs per-direction byte chunks for every observed connection
/// and hands them to the dumper paired with that connection's metadata.
///
/// Exactly one task owns a tracker; only the payload-buffer manager is
/// shared (with the purger) behind its own mutex.
pub struct FlowTracker {
    dumper: Arc<dyn Dumper>,
    sink: Arc<dyn EventSink>,
    target: Target,
    tag_values: Vec<DumpValue>,
    proxy_protocol: bool,
    metadata: HashMap<String, ConnMetadata>,
    mss: HashMap<String, u16>,
    buffers: Arc<PayloadBufferManager>,
    proxy_header_seen: HashSet<String>,
}

impl FlowTracker {
    pub fn new(
        dumper: Arc<dyn Dumper>,
        sink: Arc<dyn EventSink>,
        target: Target,
        tag_values: Vec<DumpValue>,
        proxy_protocol: bool,
        buffers: Arc<PayloadBufferManager>,
    ) -> Self {
        FlowTracker {
            dumper,
            sink,
            target,
            tag_values,
            proxy_protocol,
            metadata: HashMap::new(),
            mss: HashMap::new(),
            buffers,
            proxy_header_seen: HashSet::new(),
        }
    }

    pub fn flow_count(&self) -> usize {
        self.metadata.len()
    }

    pub fn buffered_bytes(&self) -> usize {
        self.buffers.total_bytes()
    }

    pub fn handle_packet(&mut self, pkt: &TcpPacket) {
        let direction = if self.target.matches(&pkt.dst) {
            Direction::SrcToDst
        } else if self.target.matches(&pkt.src) {
            Direction::DstToSrc
        } else {
            Direction::Unknown
        };
        let forward = flow_key(&pkt.src, &pkt.dst);
        let reverse = flow_key(&pkt.dst, &pkt.src);
        let key = if direction == Direction::DstToSrc {
            reverse.clone()
        } else {
            forward.clone()
        };

        if pkt.syn && !pkt.ack {
            // client-side open; any stale state under this key is gone
            self.drop_flow(&key);
            self.install_metadata(&key);
            if let Some(mss) = pkt.mss {
                self.mss.insert(key, mss);
            }
            return;
        }

        if pkt.syn && pkt.ack {
            if !self.metadata.contains_key(&key) {
                self.install_metadata(&key);
            }
            if let Some(advertised) = pkt.mss {
                // the smaller advertised MSS is the effective segment cap
                let effective = match self.mss.get(&key) {
                    Some(&prev) => prev.min(advertised),
                    None => advertised,
                };
                self.mss.insert(key.clone(), effective);
                if let Some(metadata) = self.metadata.get_mut(&key) {
                    metadata
                        .values
                        .push(DumpValue::int("mss", i64::from(effective)));
                }
            }
            return;
        }

        if pkt.fin {
            self.drop_flow(&key);
            if direction == Direction::Unknown {
                self.drop_flow(&reverse);
            }
            return;
        }

        if pkt.payload.is_empty() {
            return;
        }

        // a segment of exactly the maximum payload size means a larger
        // logical payload straddles more packets
        if let Some(&mss) = self.mss.get(&key) {
            let max_payload = usize::from(mss).saturating_sub(pkt.tcp_header_len.saturating_sub(20));
            if max_payload > 0 && pkt.payload.len() == max_payload {
                self.buffers.append(&key, direction, &pkt.payload);
                return;
            }
        }

        let mut chunk = self.buffers.take(&key, direction);
        chunk.extend_from_slice(&pkt.payload);
        self.dispatch(&key, direction, &chunk, pkt);
    }

    /// conn dumper mode: observe connection opens only, no payload work.
    pub fn handle_packet_conn_only(&mut self, pkt: &TcpPacket) {
        if !pkt.syn || pkt.ack {
            return;
        }
        let mut event = vec![
            DumpValue::ts(),
            DumpValue::str("src_addr", pkt.src.to_string()),
            DumpValue::str("dst_addr", pkt.dst.to_string()),
        ];
        event.extend(self.tag_values.iter().cloned());
        event.push(DumpValue::str("conn_id", new_conn_id()));
        self.sink.emit(&event);
    }

    fn install_metadata(&mut self, key: &str) {
        let mut metadata = self.dumper.new_conn_metadata();
        metadata
            .values
            .insert(0, DumpValue::str("conn_id", new_conn_id()));
        self.metadata.insert(key.to_string(), metadata);
        self.buffers.create(key);
    }

    fn dispatch(&mut self, key: &str, direction: Direction, chunk: &[u8], pkt: &TcpPacket) {
        if !self.metadata.contains_key(key) {
            // capture started mid-connection; track it from here on
            self.install_metadata(key);
        }

        let mut seek = 0;
        if self.proxy_protocol
            && !direction.is_remote_side()
            && !self.proxy_header_seen.contains(key)
        {
            self.proxy_header_seen.insert(key.to_string());
            match parse_proxy_protocol_header(chunk) {
                Ok((length, values)) => {
                    seek = length;
                    if let Some(metadata) = self.metadata.get_mut(key) {
                        metadata.values.extend(values);
                    }
                }
                Err(err) => {
                    warn!("proxy protocol header parse error. flow={key} cause={err}");
                }
            }
        }

        let Some(metadata) = self.metadata.get_mut(key) else {
            return;
        };
        match self.dumper.read(&chunk[seek..], direction, metadata) {
            Ok(values) => {
                if values.is_empty() {
                    return;
                }
                let mut event = values;
                event.push(DumpValue::ts());
                event.push(DumpValue::str("src_addr", pkt.src.to_string()));
                event.push(DumpValue::str("dst_addr", pkt.dst.to_string()));
                event.extend(self.tag_values.iter().cloned());
                event.extend(metadata.values.iter().cloned());
                self.sink.emit(&event);
            }
            Err(err) if err.is_transient() => {
                debug!("dumper read dropped a chunk. flow={key} cause={err}");
            }
            Err(err) => {
                warn!(
                    "dumper read error, clearing flow state. flow={key} cause={err} metadata={:?}",
                    metadata.values
                );
                self.drop_flow(key);
            }
        }
    }

    fn drop_flow(&mut self, key: &str) {
        self.metadata.remove(key);
        self.mss.remove(key);
        self.buffers.remove(key);
        self.proxy_header_seen.remove(key);
    }
}
