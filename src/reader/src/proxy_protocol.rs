//! PROXY protocol v1/v2 header recognition.
//!
//! Load balancers (HAProxy, AWS ELB) prepend this framing to convey the
//! true client address. The parser reports how many bytes to skip before
//! the payload belongs to the database protocol again.
//!
//! See <https://www.haproxy.org/download/1.8/doc/proxy-protocol.txt>

use std::net::{Ipv4Addr, Ipv6Addr};

use byteorder::{BigEndian, ByteOrder};

use dumper::DumpValue;

use crate::ReaderError;

const V1_PREFIX: &[u8] = b"PROXY";
const V2_SIGNATURE: [u8; 12] = [
    0x0d, 0x0a, 0x0d, 0x0a, 0x00, 0x0d, 0x0a, 0x51, 0x55, 0x49, 0x54, 0x0a,
];

const V2_HEADER_LEN: usize = 16;
const V2_ADDR_LEN_INET: usize = 4 + 4 + 2 + 2;
const V2_ADDR_LEN_INET6: usize = 16 + 16 + 2 + 2;
const V2_ADDR_LEN_UNIX: usize = 108 + 108;

/// Recognize and measure a PROXY header at the start of a connection.
///
/// Returns `(0, [])` when the bytes belong to the underlying protocol and
/// nothing must be skipped.
pub fn parse_proxy_protocol_header(
    input: &[u8],
) -> Result<(usize, Vec<DumpValue>), ReaderError> {
    if input.starts_with(&V2_SIGNATURE) {
        return parse_v2(input);
    }
    if input.starts_with(V1_PREFIX) {
        return parse_v1(input);
    }
    Ok((0, Vec::new()))
}

fn parse_v1(input: &[u8]) -> Result<(usize, Vec<DumpValue>), ReaderError> {
    let Some(crlf) = input.windows(2).position(|w| w == b"\r\n") else {
        return Ok((0, Vec::new()));
    };
    let line = String::from_utf8_lossy(&input[..crlf]);
    let fields: Vec<&str> = line.split(' ').collect();
    let length = crlf + 2;

    // PROXY TCP4 <src ip> <dst ip> <src port> <dst port>
    if fields.len() != 6 {
        return Ok((length, Vec::new()));
    }
    let values = vec![
        DumpValue::str(
            "proxy_protocol_src_addr",
            format!("{}:{}", fields[2], fields[4]),
        ),
        DumpValue::str(
            "proxy_protocol_dst_addr",
            format!("{}:{}", fields[3], fields[5]),
        ),
    ];
    Ok((length, values))
}

fn parse_v2(input: &[u8]) -> Result<(usize, Vec<DumpValue>), ReaderError> {
    if input.len() < V2_HEADER_LEN {
        return Err(ReaderError::ShortHeader {
            need: V2_HEADER_LEN,
            have: input.len(),
        });
    }
    let version_command = input[12];
    if version_command != 0x20 && version_command != 0x21 {
        return Err(ReaderError::UnexpectedValues);
    }
    let family = input[13];
    let declared_len = usize::from(BigEndian::read_u16(&input[14..16]));
    let total = V2_HEADER_LEN + declared_len;
    if input.len() < total {
        return Err(ReaderError::ShortHeader {
            need: total,
            have: input.len(),
        });
    }
    let addr = &input[V2_HEADER_LEN..total];

    let values = match family >> 4 {
        0x1 => {
            if addr.len() < V2_ADDR_LEN_INET {
                return Err(ReaderError::ShortHeader {
                    need: V2_ADDR_LEN_INET,
                    have: addr.len(),
                });
            }
            let src = Ipv4Addr::new(addr[0], addr[1], addr[2], addr[3]);
            let dst = Ipv4Addr::new(addr[4], addr[5], addr[6], addr[7]);
            let src_port = BigEndian::read_u16(&addr[8..10]);
            let dst_port = BigEndian::read_u16(&addr[10..12]);
            vec![
                DumpValue::str("proxy_protocol_src_addr", format!("{src}:{src_port}")),
                DumpValue::str("proxy_protocol_dst_addr", format!("{dst}:{dst_port}")),
            ]
        }
        0x2 => {
            if addr.len() < V2_ADDR_LEN_INET6 {
                return Err(ReaderError::ShortHeader {
                    need: V2_ADDR_LEN_INET6,
                    have: addr.len(),
                });
            }
            let mut src_octets = [0u8; 16];
            src_octets.copy_from_slice(&addr[0..16]);
            let mut dst_octets = [0u8; 16];
            dst_octets.copy_from_slice(&addr[16..32]);
            let src = Ipv6Addr::from(src_octets);
            let dst = Ipv6Addr::from(dst_octets);
            let src_port = BigEndian::read_u16(&addr[32..34]);
            let dst_port = BigEndian::read_u16(&addr[34..36]);
            vec![
                DumpValue::str("proxy_protocol_src_addr", format!("{src}:{src_port}")),
                DumpValue::str("proxy_protocol_dst_addr", format!("{dst}:{dst_port}")),
            ]
        }
        0x3 => {
            if addr.len() < V2_ADDR_LEN_UNIX {
                return Err(ReaderError::ShortHeader {
                    need: V2_ADDR_LEN_UNIX,
                    have: addr.len(),
                });
            }
            let src = nul_trimmed(&addr[0..108]);
            let dst = nul_trimmed(&addr[108..216]);
            vec![
                DumpValue::str("proxy_protocol_src_addr", src),
                DumpValue::str("proxy_protocol_dst_addr", dst),
            ]
        }
        _ => return Err(ReaderError::UnexpectedValues),
    };

    Ok((total, values))
}

fn nul_trimmed(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches('\0')
        .to_string()
}
