use core::str;

use crate::DnsParseError;

const MAX_LABEL_LENGTH: u8 = 63;

/// Read-only cursor over a borrowed byte slice.
///
/// Every read is bounds-checked against the underlying slice, so parsing a
/// hostile frame can fail but never panics.
#[derive(Debug, Clone)]
pub struct ByteBuf<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteBuf<'a> {
    pub fn new(src: &'a [u8]) -> Self {
        ByteBuf { buf: src, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn seek(&mut self, pos: usize) -> Result<(), DnsParseError> {
        if pos > self.buf.len() {
            return Err(DnsParseError::Truncated { at: pos });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, DnsParseError> {
        let byte = self.peek_u8(self.pos)?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn peek_u8(&self, pos: usize) -> Result<u8, DnsParseError> {
        self.buf
            .get(pos)
            .copied()
            .ok_or(DnsParseError::Truncated { at: pos })
    }

    pub fn read_u16(&mut self) -> Result<u16, DnsParseError> {
        let value = self.peek_u16(self.pos)?;
        self.pos += 2;
        Ok(value)
    }

    pub fn peek_u16(&self, pos: usize) -> Result<u16, DnsParseError> {
        self.peek_bytes(pos, 2)
            .map(|bytes| u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], DnsParseError> {
        let bytes = self.peek_bytes(self.pos, n)?;
        self.pos += n;
        Ok(bytes)
    }

    pub fn peek_bytes(&self, pos: usize, n: usize) -> Result<&'a [u8], DnsParseError> {
        let end = pos.checked_add(n).ok_or(DnsParseError::Truncated { at: pos })?;
        self.buf.get(pos..end).ok_or(DnsParseError::Truncated { at: end })
    }

    /// Reads an uncompressed QNAME starting at the current position and
    /// returns it with labels joined by `.`.
    ///
    /// Compression pointers are rejected: only plain length-prefixed labels
    /// terminated by a zero byte are accepted.
    pub fn read_qname(&mut self) -> Result<String, DnsParseError> {
        let mut pos = self.pos;
        let mut qname = String::new();
        loop {
            let label_length = self.peek_u8(pos)?;
            pos += 1;

            if label_length == 0 {
                break;
            }

            if label_length & 0xC0 == 0xC0 {
                return Err(DnsParseError::CompressedName { at: pos - 1 });
            }
            if label_length > MAX_LABEL_LENGTH {
                return Err(DnsParseError::LabelTooLong { at: pos - 1, length: label_length });
            }

            let label = self.peek_bytes(pos, label_length as usize)?;
            if !label.is_ascii() {
                return Err(DnsParseError::NonAsciiLabel { at: pos });
            }
            // Checked by `is_ascii` above
            let label = str::from_utf8(label).map_err(|_| DnsParseError::NonAsciiLabel { at: pos })?;

            if !qname.is_empty() {
                qname.push('.');
            }
            qname.push_str(label);

            pos += label_length as usize;
        }

        self.pos = pos;
        Ok(qname)
    }
}
