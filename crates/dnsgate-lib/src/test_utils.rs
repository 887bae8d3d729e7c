//! Frame builders shared by the unit tests of this crate and the server crate.

use std::net::Ipv4Addr;

use crate::{checksum, DNS_PORT, UDP_PROTOCOL};

/// Addressing of a synthetic IPv4/UDP frame.
#[derive(Debug, Clone)]
pub struct FrameSpec {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub source_port: u16,
    pub destination_port: u16,
    pub ttl: u8,
    pub identification: u16,
    /// Raw IP options, must be a multiple of 4 bytes
    pub ip_options: Vec<u8>,
}

impl Default for FrameSpec {
    fn default() -> Self {
        FrameSpec {
            source: Ipv4Addr::new(10, 111, 222, 1),
            destination: Ipv4Addr::new(10, 111, 222, 3),
            source_port: 51515,
            destination_port: DNS_PORT,
            ttl: 64,
            identification: 0x1c46,
            ip_options: Vec::new(),
        }
    }
}

/// Encodes a standard recursive query for an A record of `domain`.
pub fn build_dns_query(id: u16, domain: &str) -> Vec<u8> {
    let mut message = Vec::with_capacity(12 + domain.len() + 6);
    message.extend_from_slice(&id.to_be_bytes());
    // RD
    message.extend_from_slice(&[0x01, 0x00]);
    // QDCOUNT = 1, other counts empty
    message.extend_from_slice(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    for label in domain.split('.').filter(|label| !label.is_empty()) {
        message.push(label.len() as u8);
        message.extend_from_slice(label.as_bytes());
    }
    message.push(0x00);
    // QTYPE A, QCLASS IN
    message.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
    message
}

/// Wraps `payload` into an IPv4/UDP frame with a valid header checksum.
pub fn build_ipv4_udp_frame(spec: &FrameSpec, payload: &[u8]) -> Vec<u8> {
    let header_len = 20 + spec.ip_options.len();
    let udp_len = 8 + payload.len();
    let total_len = header_len + udp_len;

    let mut frame = Vec::with_capacity(total_len);
    frame.push(0x40 | (header_len / 4) as u8);
    frame.push(0x00);
    frame.extend_from_slice(&(total_len as u16).to_be_bytes());
    frame.extend_from_slice(&spec.identification.to_be_bytes());
    // DF, no fragment offset
    frame.extend_from_slice(&[0x40, 0x00]);
    frame.push(spec.ttl);
    frame.push(UDP_PROTOCOL);
    frame.extend_from_slice(&[0x00, 0x00]);
    frame.extend_from_slice(&spec.source.octets());
    frame.extend_from_slice(&spec.destination.octets());
    frame.extend_from_slice(&spec.ip_options);

    let header_checksum = checksum(&frame[..header_len]);
    frame[10..12].copy_from_slice(&header_checksum.to_be_bytes());

    frame.extend_from_slice(&spec.source_port.to_be_bytes());
    frame.extend_from_slice(&spec.destination_port.to_be_bytes());
    frame.extend_from_slice(&(udp_len as u16).to_be_bytes());
    frame.extend_from_slice(&[0x00, 0x00]);
    frame.extend_from_slice(payload);
    frame
}

pub fn build_query_frame(spec: &FrameSpec, id: u16, domain: &str) -> Vec<u8> {
    build_ipv4_udp_frame(spec, &build_dns_query(id, domain))
}
