//! Capture target parsing and the BPF filter derived from it.

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use crate::ReaderError;

const ANY_IP: &str = "0.0.0.0";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetHost {
    /// empty means any IPv4 address
    pub host: String,
    /// zero means any port
    pub port: u16,
}

impl TargetHost {
    fn is_any(&self) -> bool {
        (self.host.is_empty() || self.host == ANY_IP) && self.port == 0
    }

    fn matches(&self, addr: &SocketAddr) -> bool {
        let host_matches = self.host.is_empty()
            || self.host == ANY_IP
            || self.host == addr.ip().to_string();
        let port_matches = self.port == 0 || self.port == addr.port();
        host_matches && port_matches
    }
}

/// Ordered list of `host:port` pairs, joined by `||` in the user string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub hosts: Vec<TargetHost>,
    raw: String,
}

impl FromStr for Target {
    type Err = ReaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut hosts = Vec::new();
        for part in s.split("||") {
            hosts.push(parse_target_host(part.trim())?);
        }
        Ok(Target {
            hosts,
            raw: s.to_string(),
        })
    }
}

fn parse_target_host(target: &str) -> Result<TargetHost, ReaderError> {
    if target.is_empty() {
        return Ok(TargetHost {
            host: String::new(),
            port: 0,
        });
    }
    if target.contains(':') {
        let addr = target
            .to_socket_addrs()
            .map_err(|e| ReaderError::InvalidTarget(format!("{target}: {e}")))?
            .find(|a| a.is_ipv4())
            .ok_or_else(|| ReaderError::InvalidTarget(target.to_string()))?;
        return Ok(TargetHost {
            host: addr.ip().to_string(),
            port: addr.port(),
        });
    }
    if target.contains('.') {
        return Ok(TargetHost {
            host: target.to_string(),
            port: 0,
        });
    }
    match target.parse::<u16>() {
        Ok(port) => Ok(TargetHost {
            host: String::new(),
            port,
        }),
        // a bare word that is not a port is treated as "any"
        Err(_) => Ok(TargetHost {
            host: String::new(),
            port: 0,
        }),
    }
}

impl Target {
    /// true when `addr` matches any of the configured pairs.
    pub fn matches(&self, addr: &SocketAddr) -> bool {
        self.hosts.iter().any(|t| t.matches(addr))
    }

    /// BPF program for the target list. A fully-any entry collapses the
    /// whole filter to plain `tcp`.
    pub fn bpf_filter(&self) -> String {
        if self.hosts.is_empty() || self.hosts.iter().any(TargetHost::is_any) {
            return "tcp".to_string();
        }
        let parts: Vec<String> = self
            .hosts
            .iter()
            .map(|t| {
                let any_host = t.host.is_empty() || t.host == ANY_IP;
                if !any_host && t.port > 0 {
                    format!("(host {} and port {})", t.host, t.port)
                } else if any_host && t.port > 0 {
                    format!("(port {})", t.port)
                } else {
                    format!("(host {})", t.host)
                }
            })
            .collect();
        format!("tcp and ({})", parts.join(" or "))
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(h: &str, p: u16) -> TargetHost {
        TargetHost {
            host: h.to_string(),
            port: p,
        }
    }

    #[test]
    fn parse_and_bpf_filter() {
        let cases: &[(&str, Vec<TargetHost>, &str)] = &[
            (
                "0.0.0.0:80",
                vec![host("0.0.0.0", 80)],
                "tcp and ((port 80))",
            ),
            ("80", vec![host("", 80)], "tcp and ((port 80))"),
            (
                "127.0.0.1",
                vec![host("127.0.0.1", 0)],
                "tcp and ((host 127.0.0.1))",
            ),
            ("", vec![host("", 0)], "tcp"),
            ("0.0.0.0:0", vec![host("0.0.0.0", 0)], "tcp"),
            ("0.0.0.0", vec![host("0.0.0.0", 0)], "tcp"),
            (
                "127.0.0.1||203.0.113.1",
                vec![host("127.0.0.1", 0), host("203.0.113.1", 0)],
                "tcp and ((host 127.0.0.1) or (host 203.0.113.1))",
            ),
            (
                "127.0.0.1 || 203.0.113.1",
                vec![host("127.0.0.1", 0), host("203.0.113.1", 0)],
                "tcp and ((host 127.0.0.1) or (host 203.0.113.1))",
            ),
            (
                "127.0.0.1:80 || 203.0.113.1:80",
                vec![host("127.0.0.1", 80), host("203.0.113.1", 80)],
                "tcp and ((host 127.0.0.1 and port 80) or (host 203.0.113.1 and port 80))",
            ),
            (
                "127.0.0.1:80 || 127.0.0.1:443",
                vec![host("127.0.0.1", 80), host("127.0.0.1", 443)],
                "tcp and ((host 127.0.0.1 and port 80) or (host 127.0.0.1 and port 443))",
            ),
            (
                "80 || 127.0.0.1:443",
                vec![host("", 80), host("127.0.0.1", 443)],
                "tcp and ((port 80) or (host 127.0.0.1 and port 443))",
            ),
            (
                "0.0.0.0 || 127.0.0.1:443",
                vec![host("0.0.0.0", 0), host("127.0.0.1", 443)],
                "tcp",
            ),
        ];
        for (input, expected_hosts, expected_filter) in cases {
            let target: Target = input.parse().unwrap();
            assert_eq!(&target.hosts, expected_hosts, "parse {input:?}");
            assert_eq!(&target.bpf_filter(), expected_filter, "filter {input:?}");
        }
    }

    #[test]
    fn address_matching() {
        let target: Target = "127.0.0.1:3306".parse().unwrap();
        assert!(target.matches(&"127.0.0.1:3306".parse().unwrap()));
        assert!(!target.matches(&"127.0.0.1:3307".parse().unwrap()));
        assert!(!target.matches(&"127.0.0.2:3306".parse().unwrap()));

        let any_port: Target = "127.0.0.1".parse().unwrap();
        assert!(any_port.matches(&"127.0.0.1:1".parse().unwrap()));

        let any_host: Target = "3306".parse().unwrap();
        assert!(any_host.matches(&"10.0.0.9:3306".parse().unwrap()));
        assert!(!any_host.matches(&"10.0.0.9:3307".parse().unwrap()));
    }

    #[test]
    fn display_keeps_the_raw_form() {
        let target: Target = "3306 || 127.0.0.1:5432".parse().unwrap();
        assert_eq!(target.to_string(), "3306 || 127.0.0.1:5432");
    }
}
