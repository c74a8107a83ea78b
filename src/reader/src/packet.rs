//! Link/IP/TCP header walk over raw captured frames.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use byteorder::{BigEndian, ByteOrder};

/// Link layer of the capture handle, from the pcap datalink value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkLayer {
    Ethernet,
    /// BSD loopback: 4-byte host-order address family header
    Loopback,
    RawIp,
}

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86dd;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88a8;

const IP_PROTO_TCP: u8 = 6;

const TCP_FLAG_FIN: u8 = 0x01;
const TCP_FLAG_SYN: u8 = 0x02;
const TCP_FLAG_ACK: u8 = 0x10;

const TCP_OPTION_END: u8 = 0;
const TCP_OPTION_NOP: u8 = 1;
const TCP_OPTION_MSS: u8 = 2;

/// One parsed TCP segment.
#[derive(Debug, Clone)]
pub struct TcpPacket {
    pub src: SocketAddr,
    pub dst: SocketAddr,
    pub syn: bool,
    pub ack: bool,
    pub fin: bool,
    pub tcp_header_len: usize,
    /// MSS option, present on SYN segments
    pub mss: Option<u16>,
    pub payload: Vec<u8>,
}

/// Parse a captured frame down to TCP. Non-TCP and non-IP frames yield
/// `None`; the BPF filter keeps them rare.
pub fn parse_packet(link: LinkLayer, data: &[u8]) -> Option<TcpPacket> {
    match link {
        LinkLayer::Ethernet => parse_ethernet(data),
        LinkLayer::Loopback => {
            if data.len() < 4 {
                return None;
            }
            // the family word is host-endian; probe both byte orders
            let family_le = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
            let family_be = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
            if family_le == 2 || family_be == 2 {
                parse_ipv4(&data[4..])
            } else {
                parse_ipv6(&data[4..])
            }
        }
        LinkLayer::RawIp => {
            let version = data.first()? >> 4;
            match version {
                4 => parse_ipv4(data),
                6 => parse_ipv6(data),
                _ => None,
            }
        }
    }
}

fn parse_ethernet(data: &[u8]) -> Option<TcpPacket> {
    let mut offset = 14;
    if data.len() < offset {
        return None;
    }
    let mut ethertype = BigEndian::read_u16(&data[12..14]);
    // step over VLAN tags
    while ethertype == ETHERTYPE_VLAN || ethertype == ETHERTYPE_QINQ {
        if data.len() < offset + 4 {
            return None;
        }
        ethertype = BigEndian::read_u16(&data[offset + 2..offset + 4]);
        offset += 4;
    }
    match ethertype {
        ETHERTYPE_IPV4 => parse_ipv4(&data[offset..]),
        ETHERTYPE_IPV6 => parse_ipv6(&data[offset..]),
        _ => None,
    }
}

fn parse_ipv4(data: &[u8]) -> Option<TcpPacket> {
    if data.len() < 20 || data[0] >> 4 != 4 {
        return None;
    }
    let header_len = usize::from(data[0] & 0x0f) * 4;
    if header_len < 20 || data.len() < header_len {
        return None;
    }
    if data[9] != IP_PROTO_TCP {
        return None;
    }
    let total_len = usize::from(BigEndian::read_u16(&data[2..4]));
    let end = total_len.clamp(header_len, data.len());
    let src = IpAddr::V4(Ipv4Addr::new(data[12], data[13], data[14], data[15]));
    let dst = IpAddr::V4(Ipv4Addr::new(data[16], data[17], data[18], data[19]));
    parse_tcp(&data[header_len..end], src, dst)
}

fn parse_ipv6(data: &[u8]) -> Option<TcpPacket> {
    if data.len() < 40 || data[0] >> 4 != 6 {
        return None;
    }
    // extension headers are not walked; the probe's IPv6 support is
    // limited to plain TCP-over-IPv6 frames
    if data[6] != IP_PROTO_TCP {
        return None;
    }
    let payload_len = usize::from(BigEndian::read_u16(&data[4..6]));
    let end = (40 + payload_len).min(data.len());
    let mut src_octets = [0u8; 16];
    src_octets.copy_from_slice(&data[8..24]);
    let mut dst_octets = [0u8; 16];
    dst_octets.copy_from_slice(&data[24..40]);
    let src = IpAddr::V6(Ipv6Addr::from(src_octets));
    let dst = IpAddr::V6(Ipv6Addr::from(dst_octets));
    parse_tcp(&data[40..end], src, dst)
}

fn parse_tcp(data: &[u8], src_ip: IpAddr, dst_ip: IpAddr) -> Option<TcpPacket> {
    if data.len() < 20 {
        return None;
    }
    let src_port = BigEndian::read_u16(&data[0..2]);
    let dst_port = BigEndian::read_u16(&data[2..4]);
    let header_len = usize::from(data[12] >> 4) * 4;
    if header_len < 20 || data.len() < header_len {
        return None;
    }
    let flags = data[13];
    let syn = flags & TCP_FLAG_SYN != 0;

    let mss = if syn {
        read_mss_option(&data[20..header_len])
    } else {
        None
    };

    Some(TcpPacket {
        src: SocketAddr::new(src_ip, src_port),
        dst: SocketAddr::new(dst_ip, dst_port),
        syn,
        ack: flags & TCP_FLAG_ACK != 0,
        fin: flags & TCP_FLAG_FIN != 0,
        tcp_header_len: header_len,
        mss,
        payload: data[header_len..].to_vec(),
    })
}

fn read_mss_option(mut options: &[u8]) -> Option<u16> {
    while !options.is_empty() {
        match options[0] {
            TCP_OPTION_END => return None,
            TCP_OPTION_NOP => options = &options[1..],
            kind => {
                if options.len() < 2 {
                    return None;
                }
                let len = usize::from(options[1]);
                if len < 2 || options.len() < len {
                    return None;
                }
                if kind == TCP_OPTION_MSS && len == 4 {
                    return Some(BigEndian::read_u16(&options[2..4]));
                }
                options = &options[len..];
            }
        }
    }
    None
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Build an Ethernet/IPv4/TCP frame for tracker tests.
    pub fn build_frame(
        src: (Ipv4Addr, u16),
        dst: (Ipv4Addr, u16),
        flags: u8,
        mss: Option<u16>,
        payload: &[u8],
    ) -> Vec<u8> {
        let tcp_header_len: usize = if mss.is_some() { 24 } else { 20 };
        let total_len = 20 + tcp_header_len + payload.len();

        let mut frame = Vec::new();
        frame.extend_from_slice(&[0u8; 12]); // MACs
        frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());

        frame.push(0x45);
        frame.push(0);
        frame.extend_from_slice(&(total_len as u16).to_be_bytes());
        frame.extend_from_slice(&[0, 0, 0x40, 0, 64, IP_PROTO_TCP, 0, 0]);
        frame.extend_from_slice(&src.0.octets());
        frame.extend_from_slice(&dst.0.octets());

        frame.extend_from_slice(&src.1.to_be_bytes());
        frame.extend_from_slice(&dst.1.to_be_bytes());
        frame.extend_from_slice(&[0, 0, 0, 1]); // seq
        frame.extend_from_slice(&[0, 0, 0, 0]); // ack
        frame.push(((tcp_header_len / 4) as u8) << 4);
        frame.push(flags);
        frame.extend_from_slice(&[0xff, 0xff, 0, 0, 0, 0]); // window, csum, urgent
        if let Some(mss) = mss {
            frame.push(TCP_OPTION_MSS);
            frame.push(4);
            frame.extend_from_slice(&mss.to_be_bytes());
        }
        frame.extend_from_slice(payload);
        frame
    }
}
