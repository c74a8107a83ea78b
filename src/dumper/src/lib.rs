pub mod bytes;
pub mod conn;
pub mod hex;
pub mod log;
pub mod mysql;
pub mod pg;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Local};
use serde::{Serialize, Serializer};
use strum_macros::{AsRefStr, EnumString};

use crate::mysql::MysqlConnInternal;
use crate::pg::PgConnInternal;

/// Direction of one TCP communication half.
///
/// `ClientToRemote`/`RemoteToClient` are assigned by the proxy, which knows
/// which socket it accepted. `SrcToDst`/`DstToSrc` are resolved by the probe
/// from target-address matching; `Unknown` means neither endpoint matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    ClientToRemote,
    RemoteToClient,
    SrcToDst,
    DstToSrc,
    Unknown,
}

impl Direction {
    /// true when the bytes flow from the database client towards the server.
    pub fn is_client_side(self) -> bool {
        matches!(self, Direction::ClientToRemote | Direction::SrcToDst)
    }

    /// true when the bytes flow from the server back to the client.
    pub fn is_remote_side(self) -> bool {
        matches!(self, Direction::RemoteToClient | Direction::DstToSrc)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::ClientToRemote | Direction::SrcToDst => write!(f, "->"),
            Direction::RemoteToClient | Direction::DstToSrc => write!(f, "<-"),
            Direction::Unknown => write!(f, "?"),
        }
    }
}

/// A decoded value attached to a dump event.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Nil,
    Int(i64),
    UInt(u64),
    Float(f64),
    Float32(f32),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Time(DateTime<Local>),
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Nil => serializer.serialize_unit(),
            Value::Int(v) => serializer.serialize_i64(*v),
            Value::UInt(v) => serializer.serialize_u64(*v),
            Value::Float(v) => serializer.serialize_f64(*v),
            Value::Float32(v) => serializer.serialize_f32(*v),
            Value::Str(v) => serializer.serialize_str(v),
            Value::Bytes(v) => serializer.serialize_str(&::hex::encode(v)),
            Value::List(v) => v.serialize(serializer),
            Value::Time(v) => serializer.serialize_str(&v.to_rfc3339()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "null"),
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Float32(v) => write!(f, "{v}"),
            Value::Str(v) => write!(f, "{v}"),
            Value::Bytes(v) => write!(f, "{}", ::hex::encode(v)),
            Value::List(v) => {
                let encoded = serde_json::to_string(v).unwrap_or_default();
                write!(f, "{encoded}")
            }
            Value::Time(v) => write!(f, "{}", v.to_rfc3339()),
        }
    }
}

/// One key/value pair of a dump event. Events are ordered sequences of
/// these; the order is what the console and LTSV encoders print.
#[derive(Debug, Clone, PartialEq)]
pub struct DumpValue {
    pub key: &'static str,
    pub value: Value,
}

impl DumpValue {
    pub fn new(key: &'static str, value: Value) -> Self {
        DumpValue { key, value }
    }

    pub fn str(key: &'static str, value: impl Into<String>) -> Self {
        DumpValue::new(key, Value::Str(value.into()))
    }

    pub fn int(key: &'static str, value: i64) -> Self {
        DumpValue::new(key, Value::Int(value))
    }

    pub fn uint(key: &'static str, value: u64) -> Self {
        DumpValue::new(key, Value::UInt(value))
    }

    pub fn ts() -> Self {
        DumpValue::new("ts", Value::Time(Local::now()))
    }
}

/// Decoder-private state carried by a [`ConnMetadata`].
///
/// Each dumper operates only on its own variant; the hex and conn dumpers
/// keep no state at all.
#[derive(Debug, Clone, Default)]
pub enum ConnInternal {
    #[default]
    None,
    Mysql(MysqlConnInternal),
    Pg(PgConnInternal),
}

/// Per-TCP-connection accumulator, created when the connection is first
/// observed and dropped at FIN (or capture shutdown). `values` are attached
/// to every event emitted for this connection.
#[derive(Debug, Clone, Default)]
pub struct ConnMetadata {
    pub values: Vec<DumpValue>,
    pub internal: ConnInternal,
}

#[derive(Debug, thiserror::Error)]
pub enum DumpError {
    #[error("client is trying to connect using SSL. tcpscope {0} dumper not support SSL connection")]
    SslNotSupported(&'static str),
    #[error("short payload: need {need} bytes, {have} available")]
    ShortPayload { need: usize, have: usize },
    #[error("zlib decompress failed: {0}")]
    Decompress(#[from] std::io::Error),
    #[error("conn metadata does not belong to the {0} dumper")]
    ForeignMetadata(&'static str),
}

impl DumpError {
    /// Transient errors drop the current event only; anything else clears
    /// the per-flow decoder state.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DumpError::ShortPayload { .. } | DumpError::Decompress(_)
        )
    }
}

/// A protocol decoder. One instance serves every connection; all mutable
/// state lives in the per-connection [`ConnMetadata`].
pub trait Dumper: Send + Sync {
    fn name(&self) -> &'static str;

    fn new_conn_metadata(&self) -> ConnMetadata;

    /// Decode one reassembled chunk. Returns the values of the event to
    /// emit, or an empty vec when the chunk produced nothing observable.
    fn read(
        &self,
        payload: &[u8],
        direction: Direction,
        metadata: &mut ConnMetadata,
    ) -> Result<Vec<DumpValue>, DumpError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum DumperKind {
    Hex,
    Mysql,
    Pg,
    Conn,
}

impl DumperKind {
    pub fn parse(name: &str) -> Option<DumperKind> {
        DumperKind::from_str(name).ok()
    }
}

pub fn new_dumper(kind: DumperKind) -> Arc<dyn Dumper> {
    match kind {
        DumperKind::Hex => Arc::new(hex::HexDumper),
        DumperKind::Mysql => Arc::new(mysql::MysqlDumper),
        DumperKind::Pg => Arc::new(pg::PgDumper),
        DumperKind::Conn => Arc::new(conn::ConnDumper),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_rendering() {
        assert_eq!(Direction::ClientToRemote.to_string(), "->");
        assert_eq!(Direction::SrcToDst.to_string(), "->");
        assert_eq!(Direction::RemoteToClient.to_string(), "<-");
        assert_eq!(Direction::DstToSrc.to_string(), "<-");
        assert_eq!(Direction::Unknown.to_string(), "?");
    }

    #[test]
    fn dumper_kind_from_str() {
        assert_eq!(DumperKind::parse("mysql"), Some(DumperKind::Mysql));
        assert_eq!(DumperKind::parse("pg"), Some(DumperKind::Pg));
        assert_eq!(DumperKind::parse("hex"), Some(DumperKind::Hex));
        assert_eq!(DumperKind::parse("conn"), Some(DumperKind::Conn));
        assert_eq!(DumperKind::parse("http"), None);
    }

    #[test]
    fn value_json_encoding() {
        assert_eq!(serde_json::to_string(&Value::Nil).unwrap(), "null");
        assert_eq!(serde_json::to_string(&Value::Int(-3)).unwrap(), "-3");
        assert_eq!(
            serde_json::to_string(&Value::Float32(10.2)).unwrap(),
            "10.2"
        );
        assert_eq!(
            serde_json::to_string(&Value::List(vec![
                Value::Str("testdb".into()),
                Value::Str("comment_stars".into()),
            ]))
            .unwrap(),
            r#"["testdb","comment_stars"]"#
        );
    }
}
