//! Offline mode: decode a pcap savefile and exit at EOF.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

use common::ShutdownMessage;
use dumper::log::EventSink;
use dumper::Dumper;
use reader::capture::CaptureSource;
use reader::target::Target;
use reader::{StreamReader, StreamReaderOptions};

pub async fn read_pcap(
    path: &Path,
    target_str: &str,
    dumper: Arc<dyn Dumper>,
    sink: Arc<dyn EventSink>,
    proxy_protocol: bool,
    shutdown: watch::Receiver<ShutdownMessage>,
) -> anyhow::Result<()> {
    let target: Target = target_str.parse()?;
    let source = CaptureSource::open_offline(path, &target.bpf_filter())?;

    info!(
        "reading pcap. file={} target={target_str} dumper={}",
        path.display(),
        dumper.name()
    );

    let stream_reader = StreamReader::new(
        dumper,
        sink,
        Vec::new(),
        StreamReaderOptions {
            proxy_protocol,
            ..StreamReaderOptions::default()
        },
    );
    stream_reader.read_and_dump(source, target, shutdown).await
}
