use std::net::Ipv4Addr;

use crate::{ClassifyError, IPV4_MIN_HEADER_LEN, UDP_HEADER_LEN};

/// Borrowed view over the IPv4 header at the start of a raw frame.
///
/// Fields are read from their fixed offsets on demand, nothing is copied.
#[derive(Debug, Clone, Copy)]
pub struct Ipv4Header<'a> {
    frame: &'a [u8],
}

impl<'a> Ipv4Header<'a> {
    pub fn new(frame: &'a [u8]) -> Result<Self, ClassifyError> {
        if frame.len() < IPV4_MIN_HEADER_LEN {
            return Err(ClassifyError::TooShort { len: frame.len() });
        }
        Ok(Ipv4Header { frame })
    }

    pub fn version(&self) -> u8 {
        self.frame[0] >> 4
    }

    /// Header length in bytes (IHL * 4)
    pub fn header_len(&self) -> usize {
        ((self.frame[0] & 0x0f) as usize) * 4
    }

    pub fn total_len(&self) -> u16 {
        u16::from_be_bytes([self.frame[2], self.frame[3]])
    }

    pub fn protocol(&self) -> u8 {
        self.frame[9]
    }

    pub fn checksum(&self) -> u16 {
        u16::from_be_bytes([self.frame[10], self.frame[11]])
    }

    pub fn source(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.frame[12], self.frame[13], self.frame[14], self.frame[15])
    }

    pub fn destination(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.frame[16], self.frame[17], self.frame[18], self.frame[19])
    }

    /// Raw header bytes including options, if the frame is long enough to hold them.
    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        self.frame.get(..self.header_len())
    }
}

/// Borrowed view over an 8-byte UDP header.
#[derive(Debug, Clone, Copy)]
pub struct UdpHeader<'a> {
    bytes: &'a [u8],
}

impl<'a> UdpHeader<'a> {
    pub fn new(bytes: &'a [u8]) -> Option<Self> {
        bytes.get(..UDP_HEADER_LEN).map(|bytes| UdpHeader { bytes })
    }

    pub fn source_port(&self) -> u16 {
        u16::from_be_bytes([self.bytes[0], self.bytes[1]])
    }

    pub fn destination_port(&self) -> u16 {
        u16::from_be_bytes([self.bytes[2], self.bytes[3]])
    }

    pub fn length(&self) -> u16 {
        u16::from_be_bytes([self.bytes[4], self.bytes[5]])
    }
}

/// Internet checksum (RFC 1071): one's complement of the one's complement sum
/// of all 16-bit big-endian words, with end-around carry.
///
/// Running it over a header whose checksum field is already filled in yields 0.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u16::from_be_bytes([word[0], word[1]]) as u32;
    }
    // Odd trailing byte is padded with zero
    if let [last] = words.remainder() {
        sum += (*last as u32) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}
