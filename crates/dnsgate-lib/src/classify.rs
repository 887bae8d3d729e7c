use crate::{ClassifyError, Ipv4Header, UdpHeader, DNS_PORT, UDP_HEADER_LEN, UDP_PROTOCOL};

/// Location of a DNS message inside an IPv4/UDP frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsDatagram {
    /// IPv4 header length in bytes, options included
    pub ip_header_len: usize,
    /// Offset of the UDP payload (the DNS message) from the start of the frame
    pub payload_offset: usize,
    pub payload_len: usize,
}

impl DnsDatagram {
    pub fn payload<'a>(&self, frame: &'a [u8]) -> &'a [u8] {
        frame
            .get(self.payload_offset..self.payload_offset + self.payload_len)
            .unwrap_or_default()
    }
}

/// Cheaply filters a raw frame down to IPv4/UDP traffic aimed at port 53.
///
/// Nothing is allocated: the frame is only inspected through bounds-checked
/// reads at fixed offsets.
pub fn classify(frame: &[u8]) -> Result<DnsDatagram, ClassifyError> {
    let ip_header = Ipv4Header::new(frame)?;

    let version = ip_header.version();
    if version != 4 {
        return Err(ClassifyError::NotIpv4 { version });
    }

    let protocol = ip_header.protocol();
    if protocol != UDP_PROTOCOL {
        return Err(ClassifyError::NotUdp { protocol });
    }

    let header_len = ip_header.header_len();
    if header_len < crate::IPV4_MIN_HEADER_LEN {
        return Err(ClassifyError::BadHeaderLength { header_len });
    }

    let payload_offset = header_len + UDP_HEADER_LEN;
    if frame.len() < payload_offset {
        return Err(ClassifyError::TruncatedUdp {
            len: frame.len(),
            header_len,
        });
    }

    let udp_header = UdpHeader::new(&frame[header_len..]).ok_or(ClassifyError::TruncatedUdp {
        len: frame.len(),
        header_len,
    })?;

    let port = udp_header.destination_port();
    if port != DNS_PORT {
        return Err(ClassifyError::NotDns { port });
    }

    Ok(DnsDatagram {
        ip_header_len: header_len,
        payload_offset,
        payload_len: frame.len() - payload_offset,
    })
}
