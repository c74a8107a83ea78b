//! Drives a flow tracker from a packet source until shutdown or EOF.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use common::ShutdownMessage;
use dumper::log::EventSink;
use dumper::{DumpValue, Dumper};

use crate::capture::{capture_loop, CaptureEvent, CaptureSource};
use crate::flow::FlowTracker;
use crate::payload_buffer::{PayloadBufferManager, PACKET_TTL};
use crate::target::Target;

#[derive(Debug, Clone)]
pub struct StreamReaderOptions {
    /// capacity of the internal packet channel
    pub internal_buffer_length: usize,
    pub proxy_protocol: bool,
    /// emit map/queue statistics every minute
    pub enable_internal_log: bool,
}

impl Default for StreamReaderOptions {
    fn default() -> Self {
        StreamReaderOptions {
            internal_buffer_length: 10_000,
            proxy_protocol: false,
            enable_internal_log: false,
        }
    }
}

const QUEUE_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
const INTERNAL_STATS_INTERVAL: Duration = Duration::from_secs(60);

/// Owns the flow tracker and the packet-source plumbing for one capture
/// run (live probe or offline read).
pub struct StreamReader {
    dumper: Arc<dyn Dumper>,
    sink: Arc<dyn EventSink>,
    tag_values: Vec<DumpValue>,
    options: StreamReaderOptions,
}

impl StreamReader {
    pub fn new(
        dumper: Arc<dyn Dumper>,
        sink: Arc<dyn EventSink>,
        tag_values: Vec<DumpValue>,
        options: StreamReaderOptions,
    ) -> Self {
        StreamReader {
            dumper,
            sink,
            tag_values,
            options,
        }
    }

    /// Run until the source is exhausted (offline), the capture pipeline
    /// fails (fatal), or shutdown is signalled.
    pub async fn read_and_dump(
        &self,
        source: CaptureSource,
        target: Target,
        mut shutdown: watch::Receiver<ShutdownMessage>,
    ) -> anyhow::Result<()> {
        let capacity = self.options.internal_buffer_length;
        let (tx, mut rx) = mpsc::channel::<CaptureEvent>(capacity);

        // the pcap read is blocking; it feeds the bounded channel and
        // applies backpressure when decoding falls behind
        let producer = tokio::task::spawn_blocking(move || capture_loop(source, tx));

        let buffers = Arc::new(PayloadBufferManager::new(PACKET_TTL));
        let purger = spawn_purger(Arc::clone(&buffers), shutdown.clone());

        let conn_only = self.dumper.name() == "conn";
        let mut tracker = FlowTracker::new(
            Arc::clone(&self.dumper),
            Arc::clone(&self.sink),
            target,
            self.tag_values.clone(),
            self.options.proxy_protocol,
            Arc::clone(&buffers),
        );

        let mut queue_tick = tokio::time::interval(QUEUE_SAMPLE_INTERVAL);
        queue_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut stats_tick = tokio::time::interval(INTERNAL_STATS_INTERVAL);
        stats_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let result = loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || shutdown.borrow().is_shutdown() {
                        break Ok(());
                    }
                }
                _ = queue_tick.tick() => {
                    let queued = rx.len();
                    if queued > capacity / 10 {
                        warn!(
                            "internal packet queue filling up. queued={queued} capacity={capacity}"
                        );
                    }
                }
                _ = stats_tick.tick(), if self.options.enable_internal_log => {
                    info!(
                        "internal stats. flows={} payload_buffers={} buffered_bytes={} queued={}",
                        tracker.flow_count(),
                        buffers.len(),
                        buffers.total_bytes(),
                        rx.len(),
                    );
                }
                event = rx.recv() => match event {
                    Some(CaptureEvent::Packet(pkt)) => {
                        if conn_only {
                            tracker.handle_packet_conn_only(&pkt);
                        } else {
                            tracker.handle_packet(&pkt);
                        }
                    }
                    Some(CaptureEvent::Eof) | None => break Ok(()),
                    Some(CaptureEvent::Fatal(msg)) => {
                        break Err(anyhow::anyhow!("capture source failed: {msg}"));
                    }
                },
            }
        };

        purger.abort();
        drop(rx);
        // the producer unblocks on its next packet once the channel is
        // closed; a silent live interface may keep it parked, which is
        // fine because process teardown follows immediately
        drop(producer);
        result
    }
}

fn spawn_purger(
    buffers: Arc<PayloadBufferManager>,
    mut shutdown: watch::Receiver<ShutdownMessage>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(buffers.ttl() / 10);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // the first tick fires immediately; skip it
        tick.tick().await;
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || shutdown.borrow().is_shutdown() {
                        return;
                    }
                }
                _ = tick.tick() => {
                    let purged = buffers.purge();
                    if purged > 0 {
                        info!("purge expired packet buffer cache. purged_size={purged}");
                    }
                }
            }
        }
    })
}
