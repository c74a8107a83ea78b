//! Dump-event output. Decoded events are ordered key/value sequences and
//! go to their own log, not through the process logger.

use std::io::Write;
use std::path::Path;
use std::str::FromStr;

use parking_lot::Mutex;
use serde_json::Map;
use strum_macros::{AsRefStr, EnumString};
use tracing::warn;

use crate::DumpValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum LogFormat {
    Console,
    Json,
    Ltsv,
}

impl LogFormat {
    pub fn parse(name: &str) -> Option<LogFormat> {
        LogFormat::from_str(name).ok()
    }
}

/// Anything that accepts finished events. The flow tracker and the proxy
/// pipes write here; tests plug in a collector instead.
pub trait EventSink: Send + Sync {
    fn emit(&self, values: &[DumpValue]);
}

/// Writes events to stdout and/or a dump-log file in the selected format.
pub struct EventLog {
    format: LogFormat,
    stdout: bool,
    file: Option<Mutex<fs_err::File>>,
}

impl EventLog {
    pub fn new(format: LogFormat, stdout: bool) -> Self {
        EventLog {
            format,
            stdout,
            file: None,
        }
    }

    pub fn with_file(mut self, path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = fs_err::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        self.file = Some(Mutex::new(file));
        Ok(self)
    }

    fn encode(&self, values: &[DumpValue]) -> String {
        match self.format {
            LogFormat::Console => values
                .iter()
                .map(|kv| format!("{}={}", kv.key, kv.value))
                .collect::<Vec<_>>()
                .join(" "),
            LogFormat::Ltsv => values
                .iter()
                .map(|kv| format!("{}:{}", kv.key, kv.value))
                .collect::<Vec<_>>()
                .join("\t"),
            LogFormat::Json => {
                let mut map = Map::with_capacity(values.len());
                for kv in values {
                    match serde_json::to_value(&kv.value) {
                        Ok(v) => {
                            map.insert(kv.key.to_string(), v);
                        }
                        Err(err) => {
                            warn!("dump value encode error. key={} cause={err}", kv.key);
                        }
                    }
                }
                serde_json::Value::Object(map).to_string()
            }
        }
    }
}

impl EventSink for EventLog {
    fn emit(&self, values: &[DumpValue]) {
        let line = self.encode(values);
        if self.stdout {
            println!("{line}");
        }
        if let Some(file) = &self.file {
            let mut file = file.lock();
            if let Err(err) = writeln!(file, "{line}") {
                warn!("dump log write error. cause={err}");
            }
        }
    }
}
