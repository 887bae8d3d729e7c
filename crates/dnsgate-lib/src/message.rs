use crate::{ByteBuf, DnsHeader, DnsParseError};

/// The parts of a DNS query needed to make a filtering decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsQuery<'a> {
    pub header: DnsHeader,
    /// Name from the first question, labels joined by `.`
    pub qname: String,
    /// The whole message as received
    pub raw: &'a [u8],
}

impl<'a> DnsQuery<'a> {
    /// Parses the header and the first question's name out of a DNS message.
    pub fn parse(message: &'a [u8]) -> Result<Self, DnsParseError> {
        let mut buf = ByteBuf::new(message);
        let header = DnsHeader::from_buf(&mut buf)?;
        let qname = buf.read_qname()?;

        Ok(DnsQuery {
            header,
            qname,
            raw: message,
        })
    }

    pub fn id(&self) -> u16 {
        self.header.id
    }
}
