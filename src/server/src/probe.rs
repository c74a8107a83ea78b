//! Live packet probe: passive observation of a network interface.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use common::ShutdownMessage;
use dumper::log::EventSink;
use dumper::{DumpValue, Dumper};
use reader::capture::{CaptureSource, LiveCaptureOptions};
use reader::target::Target;
use reader::{StreamReader, StreamReaderOptions};

#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub snapshot_length: usize,
    pub buffer_size: usize,
    pub immediate_mode: bool,
    pub internal_buffer_length: usize,
    /// explicit BPF filter; empty derives one from the target
    pub filter: String,
    pub proxy_protocol: bool,
    pub enable_internal_log: bool,
}

pub struct ProbeServer {
    pub interface: String,
    pub target: String,
    pub options: ProbeOptions,
    dumper: Arc<dyn Dumper>,
    sink: Arc<dyn EventSink>,
}

impl ProbeServer {
    pub fn new(
        interface: String,
        target: String,
        options: ProbeOptions,
        dumper: Arc<dyn Dumper>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        ProbeServer {
            interface,
            target,
            options,
            dumper,
            sink,
        }
    }

    pub async fn start(&self, shutdown: watch::Receiver<ShutdownMessage>) -> anyhow::Result<()> {
        let target: Target = self.target.parse()?;
        let filter = if self.options.filter.is_empty() {
            target.bpf_filter()
        } else {
            self.options.filter.clone()
        };

        let source = CaptureSource::open_live(
            &self.interface,
            &LiveCaptureOptions {
                snapshot_length: self.options.snapshot_length,
                buffer_size: self.options.buffer_size,
                immediate_mode: self.options.immediate_mode,
                filter,
            },
        )?;

        info!(
            "starting probe. interface={} target={} dumper={}",
            self.interface,
            self.target,
            self.dumper.name()
        );

        let tag_values = vec![
            DumpValue::str("interface", self.interface.clone()),
            DumpValue::str("probe_target_addr", self.target.clone()),
        ];
        let stream_reader = StreamReader::new(
            Arc::clone(&self.dumper),
            Arc::clone(&self.sink),
            tag_values,
            StreamReaderOptions {
                internal_buffer_length: self.options.internal_buffer_length,
                proxy_protocol: self.options.proxy_protocol,
                enable_internal_log: self.options.enable_internal_log,
            },
        );
        stream_reader.read_and_dump(source, target, shutdown).await
    }
}
