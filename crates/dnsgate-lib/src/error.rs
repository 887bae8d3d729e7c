use thiserror::Error;

/// Why a frame was not handed to the DNS parser.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum ClassifyError {
    #[error("frame of {len} bytes is shorter than an IPv4 header")]
    TooShort { len: usize },
    #[error("IP version {version} is not supported")]
    NotIpv4 { version: u8 },
    #[error("IP protocol {protocol} is not UDP")]
    NotUdp { protocol: u8 },
    #[error("IPv4 header length {header_len} is invalid")]
    BadHeaderLength { header_len: usize },
    #[error("frame of {len} bytes can't fit an IPv4 header of {header_len} bytes and a UDP header")]
    TruncatedUdp { len: usize, header_len: usize },
    #[error("UDP destination port {port} is not DNS")]
    NotDns { port: u16 },
}

impl ClassifyError {
    /// Whether the frame looked like it was meant to be parsed but was cut
    /// short or corrupted, as opposed to simply not being DNS traffic.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ClassifyError::BadHeaderLength { .. } | ClassifyError::TruncatedUdp { .. }
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum DnsParseError {
    #[error("malformed packet: message of {len} bytes can't fit a DNS header")]
    HeaderTooShort { len: usize },
    #[error("malformed packet: unexpected end of data at byte {at}")]
    Truncated { at: usize },
    #[error("malformed packet: compressed QNAME at byte {at} is not supported")]
    CompressedName { at: usize },
    #[error("malformed packet: label length {length} at byte {at} exceeds 63")]
    LabelTooLong { at: usize, length: u8 },
    #[error("malformed packet: QNAME label at byte {at} is not ASCII")]
    NonAsciiLabel { at: usize },
}

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum SynthError {
    #[error("query of {len} bytes can't fit a DNS header")]
    QueryTooShort { len: usize },
    #[error("original frame is not a valid IPv4/UDP datagram")]
    InvalidFrame,
    #[error("response of {len} bytes exceeds the IPv4 total length limit")]
    TooLarge { len: usize },
}
