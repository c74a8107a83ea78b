use std::str::FromStr;

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Install the process logger. Dump events have their own writer; this
/// covers everything else (startup, warnings, purge reports).
pub fn init_tracing(log_level: Option<&str>) -> anyhow::Result<()> {
    let level = Level::from_str(log_level.unwrap_or("INFO"))?;
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("INFO"))
        .add_directive(level.into());
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
