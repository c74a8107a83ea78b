pub mod config;
pub mod logging;
pub mod sys_utils;

/// Shutdown broadcast carried on a `tokio::sync::watch` channel.
///
/// SIGINT asks for an immediate stop (drop in-flight connections);
/// SIGTERM/SIGQUIT drain in-flight work first.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ShutdownMessage {
    // only use in initialize.
    Init,
    Graceful(String),
    Immediate(String),
}

impl ShutdownMessage {
    pub fn is_shutdown(&self) -> bool {
        !matches!(self, ShutdownMessage::Init)
    }
}
