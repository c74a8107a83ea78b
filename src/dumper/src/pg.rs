//! PostgreSQL frontend protocol decoder: StartupMessage, simple queries
//! and the extended-query Parse/Bind/Execute messages.
//!
//! See <https://www.postgresql.org/docs/current/protocol-message-formats.html>

use byteorder::{BigEndian, ByteOrder};

use crate::bytes::ByteReader;
use crate::{ConnInternal, ConnMetadata, Direction, DumpError, DumpValue, Dumper, Value};

const MESSAGE_QUERY: u8 = b'Q';
const MESSAGE_PARSE: u8 = b'P';
const MESSAGE_BIND: u8 = b'B';
const MESSAGE_EXECUTE: u8 = b'E';

/// Bind parameter format codes.
const FORMAT_TEXT: u16 = 0;

/// SSLRequest carries the magic version 1234.5679 instead of 3.x.
const SSL_REQUEST_MAJOR: u16 = 1234;
const SSL_REQUEST_MINOR: u16 = 5679;
const PROTOCOL_MAJOR_V3: u16 = 3;

/// Decoder state for one PostgreSQL connection.
///
/// `pending_message_len > 0` iff `long_packet_cache` is non-empty.
#[derive(Debug, Clone, Default)]
pub struct PgConnInternal {
    pub pending_message_len: u32,
    pub long_packet_cache: Vec<u8>,
}

pub struct PgDumper;

impl Dumper for PgDumper {
    fn name(&self) -> &'static str {
        "pg"
    }

    fn new_conn_metadata(&self) -> ConnMetadata {
        ConnMetadata {
            values: Vec::new(),
            internal: ConnInternal::Pg(PgConnInternal::default()),
        }
    }

    fn read(
        &self,
        payload: &[u8],
        direction: Direction,
        metadata: &mut ConnMetadata,
    ) -> Result<Vec<DumpValue>, DumpError> {
        if !matches!(metadata.internal, ConnInternal::Pg(_)) {
            return Err(DumpError::ForeignMetadata("pg"));
        }

        let (handshake_values, handshake_err) = read_handshake(payload, direction);
        metadata.values.extend(handshake_values);
        if let Some(err) = handshake_err {
            return Err(err);
        }

        if matches!(
            direction,
            Direction::RemoteToClient | Direction::DstToSrc | Direction::Unknown
        ) {
            return Ok(Vec::new());
        }

        let ConnInternal::Pg(internal) = &mut metadata.internal else {
            return Err(DumpError::ForeignMetadata("pg"));
        };

        let data: Vec<u8> = if internal.long_packet_cache.is_empty() {
            payload.to_vec()
        } else {
            let mut joined = std::mem::take(&mut internal.long_packet_cache);
            joined.extend_from_slice(payload);
            joined
        };

        if data.is_empty() {
            return Ok(Vec::new());
        }

        let message_type = data[0];

        if matches!(
            message_type,
            MESSAGE_QUERY | MESSAGE_PARSE | MESSAGE_BIND | MESSAGE_EXECUTE
        ) {
            // 4-byte big-endian length; includes itself, excludes the tag
            let message_length = if internal.pending_message_len > 0 {
                internal.pending_message_len
            } else {
                let mut len_bytes = [0u8; 4];
                let available = data.len().saturating_sub(1).min(4);
                len_bytes[..available].copy_from_slice(&data[1..1 + available]);
                BigEndian::read_u32(&len_bytes)
            };
            if ((data.len() - 1) as u32) < message_length {
                internal.pending_message_len = message_length;
                internal.long_packet_cache = data;
                return Ok(Vec::new());
            }
            internal.pending_message_len = 0;
        }

        if data.len() < 5 {
            return Ok(Vec::new());
        }

        let mut dumps = match message_type {
            MESSAGE_QUERY => {
                let query = String::from_utf8_lossy(&data[5..])
                    .trim_end_matches('\0')
                    .to_string();
                vec![DumpValue::str("query", query)]
            }
            MESSAGE_PARSE => {
                let mut r = ByteReader::new(&data[5..]);
                let stmt_name = String::from_utf8_lossy(r.read_nul_terminated()).into_owned();
                let query = String::from_utf8_lossy(r.read_nul_terminated()).into_owned();
                // parameter-type OIDs follow; nothing observable in them
                vec![
                    DumpValue::str("stmt_name", stmt_name),
                    DumpValue::str("parse_query", query),
                ]
            }
            MESSAGE_BIND => read_bind(&data[5..])?,
            MESSAGE_EXECUTE => {
                let mut r = ByteReader::new(&data[5..]);
                let portal_name = String::from_utf8_lossy(r.read_nul_terminated()).into_owned();
                vec![
                    DumpValue::str("portal_name", portal_name),
                    DumpValue::str("execute_query", ""),
                ]
            }
            _ => return Ok(Vec::new()),
        };

        dumps.push(DumpValue::str(
            "message_type",
            (message_type as char).to_string(),
        ));
        Ok(dumps)
    }
}

fn read_bind(body: &[u8]) -> Result<Vec<DumpValue>, DumpError> {
    let mut r = ByteReader::new(body);
    let portal_name = String::from_utf8_lossy(r.read_nul_terminated()).into_owned();
    let stmt_name = String::from_utf8_lossy(r.read_nul_terminated()).into_owned();

    let num_formats = usize::from(r.read_u16_be()?);
    let mut formats = Vec::with_capacity(num_formats);
    for _ in 0..num_formats {
        formats.push(r.read_u16_be()?);
    }

    let num_params = usize::from(r.read_u16_be()?);
    let mut values = Vec::with_capacity(num_params);
    for i in 0..num_params {
        let len = r.read_u32_be()? as i32;
        if len == -1 {
            // NULL parameter, no value bytes
            continue;
        }
        let raw = r.read_bytes(len as usize)?;
        // zero format codes means all-text; a single code applies to all
        let format = formats.get(i).or(formats.last()).copied().unwrap_or(FORMAT_TEXT);
        if format == FORMAT_TEXT {
            values.push(Value::Str(String::from_utf8_lossy(raw).into_owned()));
        } else {
            values.push(Value::Bytes(raw.to_vec()));
        }
    }

    Ok(vec![
        DumpValue::str("portal_name", portal_name),
        DumpValue::str("stmt_name", stmt_name),
        DumpValue::new("bind_values", Value::List(values)),
    ])
}

/// Parse the first client packet: SSLRequest is refused, StartupMessage
/// yields `user` and `database`.
fn read_handshake(payload: &[u8], direction: Direction) -> (Vec<DumpValue>, Option<DumpError>) {
    let mut values = Vec::new();
    if direction.is_remote_side() || payload.len() < 8 {
        return (values, None);
    }

    let major = BigEndian::read_u16(&payload[4..6]);
    if major == SSL_REQUEST_MAJOR {
        let minor = BigEndian::read_u16(&payload[6..8]);
        if minor == SSL_REQUEST_MINOR {
            return (values, Some(DumpError::SslNotSupported("pg")));
        }
    }
    if major != PROTOCOL_MAJOR_V3 {
        return (values, None);
    }

    // key/value parameter list, NUL-separated, ending with an empty key
    let mut fields = payload[8..].split(|&b| b == 0x00);
    while let Some(key) = fields.next() {
        if key.is_empty() {
            break;
        }
        let Some(value) = fields.next() else {
            break;
        };
        match key {
            b"user" => values.push(DumpValue::str(
                "username",
                String::from_utf8_lossy(value).into_owned(),
            )),
            b"database" => values.push(DumpValue::str(
                "database",
                String::from_utf8_lossy(value).into_owned(),
            )),
            _ => {}
        }
    }
    (values, None)
}
