use crate::{ByteBuf, DnsParseError};

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum QueryOpcode {
    /// Standard query
    #[default]
    QUERY,
    /// Inverse query
    IQUERY,
    /// Status request
    STATUS,
    /// 3-15 opcodes
    UNKNOWN,
}

impl From<u8> for QueryOpcode {
    fn from(value: u8) -> Self {
        match value {
            0 => QueryOpcode::QUERY,
            1 => QueryOpcode::IQUERY,
            2 => QueryOpcode::STATUS,
            _ => QueryOpcode::UNKNOWN,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
#[cfg_attr(test, derive(proptest_derive::Arbitrary))]
pub enum ResponseCode {
    #[default]
    Success,
    /// Server was unable to interpret the query
    FormatError,
    /// Server was unable to process the query due to an internal error
    ServerFailure,
    /// Domain name referenced in the query doesn't exist
    NameError,
    /// Requested type of query is not supported by the server
    NotImplemented,
    /// Server refuses to complete the specified operation
    Refused,
    // 6-15 codes
    Unknown,
}

impl From<u8> for ResponseCode {
    fn from(value: u8) -> Self {
        match value {
            0 => ResponseCode::Success,
            1 => ResponseCode::FormatError,
            2 => ResponseCode::ServerFailure,
            3 => ResponseCode::NameError,
            4 => ResponseCode::NotImplemented,
            5 => ResponseCode::Refused,
            _ => ResponseCode::Unknown,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Default, Clone)]
pub struct DnsHeader {
    /// Transaction ID. A response **must mirror** the ID of its query.
    pub id: u16,
    /// Query/Response
    pub is_response: bool,
    /// Kind of query
    pub opcode: QueryOpcode,
    /// Set by the server. Indicates whether a server is authoritative
    pub is_authoritative: bool,
    pub truncation: bool,
    /// Set by the sender. Enables recursive resolution
    pub recursion_desired: bool,
    /// Set by the server. Indicate whether recursion is allowed
    pub recursion_available: bool,
    /// Set by the server. Indicates status of the response
    pub response_code: ResponseCode,
    pub question_count: u16,
    pub answer_rr_count: u16,
    pub authority_rr_count: u16,
    pub additional_rr_count: u16,
}

impl DnsHeader {
    pub const SIZE: usize = 12;

    pub fn from_buf(buf: &mut ByteBuf<'_>) -> Result<Self, DnsParseError> {
        if buf.remaining() < Self::SIZE {
            return Err(DnsParseError::HeaderTooShort { len: buf.remaining() });
        }

        let id = buf.read_u16()?;
        let flags = buf.read_u16()?;

        let is_response = ((flags & 0x8000) >> 15) == 1;
        let opcode: QueryOpcode = (((flags & 0x7800) >> 11) as u8).into();
        let is_authoritative = ((flags & 0x400) >> 10) == 1;
        let truncation = ((flags & 0x200) >> 9) == 1;
        let recursion_desired = ((flags & 0x100) >> 8) == 1;
        let recursion_available = ((flags & 0x80) >> 7) == 1;
        let response_code: ResponseCode = ((flags & 0xf) as u8).into();

        let question_count = buf.read_u16()?;
        let answer_rr_count = buf.read_u16()?;
        let authority_rr_count = buf.read_u16()?;
        let additional_rr_count = buf.read_u16()?;

        Ok(DnsHeader {
            id,
            is_response,
            opcode,
            is_authoritative,
            truncation,
            recursion_desired,
            recursion_available,
            response_code,
            question_count,
            answer_rr_count,
            authority_rr_count,
            additional_rr_count,
        })
    }
}
