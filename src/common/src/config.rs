//! Configuration file loading. Keys mirror the CLI flag names; the dumper
//! selection is shared between `proxy` and `probe`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

const CONFIG_FILE_NAME: &str = "tcpscope.toml";

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub tcpscope: General,
    pub proxy: ProxyConfig,
    pub probe: ProbeConfig,
    pub log: LogConfig,
    pub dump_log: DumpLogConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct General {
    pub dumper: String,
    pub pidfile: String,
}

impl Default for General {
    fn default() -> Self {
        General {
            dumper: "hex".to_string(),
            pidfile: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    pub listen_addr: String,
    pub remote_addr: String,
    pub use_server_starter: bool,
    pub proxy_protocol: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            listen_addr: "localhost:8080".to_string(),
            remote_addr: "localhost:80".to_string(),
            use_server_starter: false,
            proxy_protocol: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub interface: String,
    pub target: String,
    /// pcap handle buffer, bytes
    pub buffer_size: usize,
    pub immediate_mode: bool,
    pub snapshot_length: usize,
    /// capacity of the packet channel between capture and decoding
    pub internal_buffer_length: usize,
    /// explicit BPF filter; empty derives one from the target
    pub filter: String,
    pub proxy_protocol: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            interface: String::new(),
            target: "localhost:80".to_string(),
            buffer_size: 2 * 1024 * 1024,
            immediate_mode: false,
            snapshot_length: 0xffff,
            internal_buffer_length: 10_000,
            filter: String::new(),
            proxy_protocol: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    /// emit internal map/queue statistics every minute
    pub internal: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            level: "INFO".to_string(),
            internal: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DumpLogConfig {
    pub enable: bool,
    pub stdout: bool,
    pub format: String,
    /// directory for the dump log file; empty keeps events on stdout only
    pub dir: String,
}

impl Default for DumpLogConfig {
    fn default() -> Self {
        DumpLogConfig {
            enable: true,
            stdout: true,
            format: "json".to_string(),
            dir: String::new(),
        }
    }
}

impl Config {
    /// Load the config file. An explicit path must exist; otherwise the
    /// usual locations are searched and missing files mean defaults.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<(Config, Option<PathBuf>)> {
        if let Some(path) = explicit {
            let raw = fs_err::read_to_string(path)?;
            let config = toml::from_str(&raw)?;
            return Ok((config, Some(path.to_path_buf())));
        }
        for path in Self::search_paths() {
            if path.is_file() {
                let raw = fs_err::read_to_string(&path)?;
                let config = toml::from_str(&raw)?;
                return Ok((config, Some(path)));
            }
        }
        Ok((Config::default(), None))
    }

    /// `./tcpscope.toml`, `$HOME/.tcpscope/tcpscope.toml`,
    /// `/etc/tcpscope/tcpscope.toml`, in that order.
    pub fn search_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];
        if let Some(home) = std::env::var_os("HOME") {
            paths.push(
                PathBuf::from(home)
                    .join(".tcpscope")
                    .join(CONFIG_FILE_NAME),
            );
        }
        paths.push(PathBuf::from("/etc/tcpscope").join(CONFIG_FILE_NAME));
        paths
    }

    pub fn to_toml(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
