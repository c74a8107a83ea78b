pub mod capture;
pub mod flow;
pub mod packet;
pub mod payload_buffer;
pub mod proxy_protocol;
pub mod stream;
pub mod target;

pub use flow::FlowTracker;
pub use stream::{StreamReader, StreamReaderOptions};
pub use target::{Target, TargetHost};

#[derive(Debug, thiserror::Error)]
pub enum ReaderError {
    #[error("unexpected values")]
    UnexpectedValues,
    #[error("short header: need {need} bytes, {have} available")]
    ShortHeader { need: usize, have: usize },
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("interface not found: {0}")]
    InterfaceNotFound(String),
    #[error("unsupported datalink: {0}")]
    UnsupportedDatalink(String),
    #[error(transparent)]
    Pcap(#[from] pcap::Error),
}
