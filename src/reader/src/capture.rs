//! pcap handle construction and the blocking capture loop feeding the
//! packet channel.

use pcap::{Active, Capture, Linktype, Offline};
use tokio::sync::mpsc;
use tracing::warn;

use crate::packet::{parse_packet, LinkLayer, TcpPacket};
use crate::ReaderError;

/// Options for a live capture handle. The handle has no read timeout; a
/// pcap source is read with BlockForever semantics.
#[derive(Debug, Clone)]
pub struct LiveCaptureOptions {
    pub snapshot_length: usize,
    pub buffer_size: usize,
    pub immediate_mode: bool,
    pub filter: String,
}

pub enum CaptureSource {
    Live { cap: Capture<Active>, link: LinkLayer },
    Offline { cap: Capture<Offline>, link: LinkLayer },
}

/// One step of the capture loop.
enum CaptureStep {
    Packet(Vec<u8>),
    Timeout,
    Eof,
    Fatal(String),
}

/// Message to the flow-tracker task.
pub enum CaptureEvent {
    Packet(TcpPacket),
    /// savefile fully read; a clean end
    Eof,
    /// the capture pipeline failed irrecoverably
    Fatal(String),
}

impl CaptureSource {
    pub fn open_live(interface: &str, options: &LiveCaptureOptions) -> Result<Self, ReaderError> {
        let device = pcap::Device::list()?
            .into_iter()
            .find(|d| d.name == interface)
            .ok_or_else(|| ReaderError::InterfaceNotFound(interface.to_string()))?;
        let mut cap = Capture::from_device(device)?
            .promisc(true)
            .snaplen(options.snapshot_length as i32)
            .buffer_size(options.buffer_size as i32)
            .immediate_mode(options.immediate_mode)
            .open()?;
        cap.filter(&options.filter, true)?;
        let link = link_layer(cap.get_datalink())?;
        Ok(CaptureSource::Live { cap, link })
    }

    pub fn open_offline(path: &std::path::Path, filter: &str) -> Result<Self, ReaderError> {
        let mut cap = Capture::from_file(path)?;
        if !filter.is_empty() {
            cap.filter(filter, true)?;
        }
        let link = link_layer(cap.get_datalink())?;
        Ok(CaptureSource::Offline { cap, link })
    }

    pub fn link(&self) -> LinkLayer {
        match self {
            CaptureSource::Live { link, .. } | CaptureSource::Offline { link, .. } => *link,
        }
    }

    fn step(&mut self) -> CaptureStep {
        let next = match self {
            CaptureSource::Live { cap, .. } => cap.next_packet(),
            CaptureSource::Offline { cap, .. } => cap.next_packet(),
        };
        match next {
            Ok(packet) => CaptureStep::Packet(packet.data.to_vec()),
            Err(pcap::Error::TimeoutExpired) => CaptureStep::Timeout,
            Err(pcap::Error::NoMorePackets) => CaptureStep::Eof,
            Err(err) => CaptureStep::Fatal(err.to_string()),
        }
    }

    /// Kernel-side drop counter for the live handle.
    fn dropped(&mut self) -> Option<u64> {
        match self {
            CaptureSource::Live { cap, .. } => {
                cap.stats().ok().map(|s| u64::from(s.dropped))
            }
            CaptureSource::Offline { .. } => None,
        }
    }
}

fn link_layer(datalink: Linktype) -> Result<LinkLayer, ReaderError> {
    if datalink == Linktype::ETHERNET {
        Ok(LinkLayer::Ethernet)
    } else if datalink == Linktype::NULL || datalink == Linktype::LOOP {
        Ok(LinkLayer::Loopback)
    } else if datalink == Linktype::RAW
        || datalink == Linktype::IPV4
        || datalink == Linktype::IPV6
    {
        Ok(LinkLayer::RawIp)
    } else {
        Err(ReaderError::UnsupportedDatalink(format!(
            "{} ({})",
            datalink.get_name().unwrap_or_default(),
            datalink.0
        )))
    }
}

/// Blocking producer: drains the pcap handle into the packet channel
/// until the file ends, the handle fails, or the consumer goes away.
/// Kernel drop counters are sampled every `STATS_SAMPLE_PACKETS` packets.
pub fn capture_loop(mut source: CaptureSource, tx: mpsc::Sender<CaptureEvent>) {
    const STATS_SAMPLE_PACKETS: u64 = 1000;
    let link = source.link();
    let mut seen: u64 = 0;
    let mut last_dropped: u64 = 0;
    loop {
        match source.step() {
            CaptureStep::Packet(data) => {
                seen += 1;
                if seen % STATS_SAMPLE_PACKETS == 0 {
                    if let Some(dropped) = source.dropped() {
                        if dropped > last_dropped {
                            warn!(
                                "capture handle dropping packets. dropped={} (+{})",
                                dropped,
                                dropped - last_dropped
                            );
                            last_dropped = dropped;
                        }
                    }
                }
                let Some(pkt) = parse_packet(link, &data) else {
                    continue;
                };
                if tx.blocking_send(CaptureEvent::Packet(pkt)).is_err() {
                    return;
                }
            }
            CaptureStep::Timeout => continue,
            CaptureStep::Eof => {
                let _ = tx.blocking_send(CaptureEvent::Eof);
                return;
            }
            CaptureStep::Fatal(msg) => {
                let _ = tx.blocking_send(CaptureEvent::Fatal(msg));
                return;
            }
        }
    }
}
