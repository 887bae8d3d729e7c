use crate::{checksum, DnsDatagram, DnsHeader, Ipv4Header, SynthError, UdpHeader, UDP_HEADER_LEN};

const RCODE_NXDOMAIN: u8 = 3;

/// What to put in the UDP payload of the response frame.
#[derive(Debug, Clone, Copy)]
pub enum Synthesis<'a> {
    /// Raw upstream response, passed through untouched
    Relay(&'a [u8]),
    /// Negative answer derived from the original query
    Block,
}

/// Turns a query into an NXDOMAIN response by flipping the QR bit and
/// setting RCODE to 3. Every other byte, the question section included, is
/// copied verbatim and no records are added.
pub fn nxdomain_payload(query: &[u8]) -> Result<Vec<u8>, SynthError> {
    if query.len() < DnsHeader::SIZE {
        return Err(SynthError::QueryTooShort { len: query.len() });
    }

    let mut response = query.to_vec();
    response[2] |= 0x80;
    response[3] = (response[3] & 0xf0) | RCODE_NXDOMAIN;
    Ok(response)
}

/// Builds the full response frame for a query frame that was classified as
/// `datagram`.
pub fn synthesize(
    query_frame: &[u8],
    datagram: &DnsDatagram,
    mode: Synthesis<'_>,
) -> Result<Vec<u8>, SynthError> {
    match mode {
        Synthesis::Relay(upstream_response) => build_response_frame(query_frame, upstream_response),
        Synthesis::Block => {
            let payload = nxdomain_payload(datagram.payload(query_frame))?;
            build_response_frame(query_frame, &payload)
        }
    }
}

/// Wraps `payload` into a fresh IPv4/UDP frame addressed back to the sender
/// of `query_frame`.
///
/// The IP header (options included) is copied with addresses swapped, the
/// total length rewritten and the checksum recomputed. UDP ports are swapped
/// and the UDP checksum is left at zero, which IPv4 permits.
pub fn build_response_frame(query_frame: &[u8], payload: &[u8]) -> Result<Vec<u8>, SynthError> {
    let ip_header = Ipv4Header::new(query_frame).map_err(|_| SynthError::InvalidFrame)?;
    let header_len = ip_header.header_len();
    let header_bytes = ip_header
        .as_bytes()
        .filter(|bytes| bytes.len() >= crate::IPV4_MIN_HEADER_LEN)
        .ok_or(SynthError::InvalidFrame)?;
    let udp_header = query_frame
        .get(header_len..)
        .and_then(UdpHeader::new)
        .ok_or(SynthError::InvalidFrame)?;

    let udp_len = UDP_HEADER_LEN + payload.len();
    let total_len = header_len + udp_len;
    let total_len_field = u16::try_from(total_len).map_err(|_| SynthError::TooLarge { len: total_len })?;

    let mut frame = Vec::with_capacity(total_len);
    frame.extend_from_slice(header_bytes);
    frame[2..4].copy_from_slice(&total_len_field.to_be_bytes());
    frame[10..12].copy_from_slice(&[0, 0]);
    frame[12..16].copy_from_slice(&ip_header.destination().octets());
    frame[16..20].copy_from_slice(&ip_header.source().octets());

    frame.extend_from_slice(&udp_header.destination_port().to_be_bytes());
    frame.extend_from_slice(&udp_header.source_port().to_be_bytes());
    // Fits: udp_len <= total_len
    frame.extend_from_slice(&(udp_len as u16).to_be_bytes());
    frame.extend_from_slice(&[0, 0]);
    frame.extend_from_slice(payload);

    let header_checksum = checksum(&frame[..header_len]);
    frame[10..12].copy_from_slice(&header_checksum.to_be_bytes());

    Ok(frame)
}
