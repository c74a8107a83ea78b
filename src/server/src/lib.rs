pub mod pipe;
pub mod probe;
pub mod proxy;
pub mod read;

pub use probe::{ProbeOptions, ProbeServer};
pub use proxy::ProxyServer;
