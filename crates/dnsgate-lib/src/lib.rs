#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

mod buf;
mod classify;
mod dns_header;
mod error;
mod ipv4;
mod message;
mod synth;

pub use buf::ByteBuf;
pub use classify::{classify, DnsDatagram};
pub use dns_header::{DnsHeader, QueryOpcode, ResponseCode};
pub use error::{ClassifyError, DnsParseError, SynthError};
pub use ipv4::{checksum, Ipv4Header, UdpHeader};
pub use message::DnsQuery;
pub use synth::{build_response_frame, nxdomain_payload, synthesize, Synthesis};

pub const IPV4_MIN_HEADER_LEN: usize = 20;
pub const UDP_HEADER_LEN: usize = 8;
pub const UDP_PROTOCOL: u8 = 17;
pub const DNS_PORT: u16 = 53;
