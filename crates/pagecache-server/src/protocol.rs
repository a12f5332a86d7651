//! Wire protocol framing.
//!
//! Every request starts with a fixed 9-byte packed header:
//!
//! ```text
//! byte 0       msg_type   (0 = GET, 1 = SET)
//! bytes 1..5   page_no    (u32, host byte order)
//! bytes 5..9   page_size  (u32, host byte order)
//! ```
//!
//! A GET request is the header alone; the response is a 4-byte
//! `page_size` acknowledgment followed by `page_size` bytes of page
//! content. A SET request carries `page_size` payload bytes after the
//! header; the response is the 4-byte acknowledgment alone.
//!
//! Integers travel in host byte order. The socket is local to one
//! machine, so cross-endian interoperability is not a goal.

use pagecache_common::constants::MAX_PAGE_SIZE;
use pagecache_common::types::PageNo;
use thiserror::Error;

/// Length of the packed request header in bytes.
pub const HEADER_LEN: usize = 9;

/// Length of the response acknowledgment in bytes.
pub const ACK_LEN: usize = 4;

/// Errors produced while decoding a request frame.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The header's first byte is not a known message type.
    #[error("invalid message type byte {0:#04x}")]
    InvalidMsgType(u8),

    /// The header's page size is zero or larger than any supported page
    /// class. A SET with such a size cannot be framed safely, so the
    /// connection is torn down.
    #[error("unframeable page size {0}")]
    InvalidPageSize(u32),
}

/// Request message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgType {
    /// Read a page.
    Get = 0,
    /// Write a page.
    Set = 1,
}

impl TryFrom<u8> for MsgType {
    type Error = ProtocolError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0 => Ok(Self::Get),
            1 => Ok(Self::Set),
            other => Err(ProtocolError::InvalidMsgType(other)),
        }
    }
}

/// A decoded request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    /// The request kind.
    pub msg_type: MsgType,
    /// The page the request names.
    pub page_no: PageNo,
    /// The page size the client believes `page_no` has.
    pub page_size: u32,
}

impl RequestHeader {
    /// Creates a header.
    pub fn new(msg_type: MsgType, page_no: PageNo, page_size: u32) -> Self {
        Self {
            msg_type,
            page_no,
            page_size,
        }
    }

    /// Decodes a header from its packed wire form.
    pub fn decode(bytes: &[u8; HEADER_LEN]) -> Result<Self, ProtocolError> {
        let msg_type = MsgType::try_from(bytes[0])?;
        let page_no = PageNo::from_ne_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]);
        let page_size = u32::from_ne_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]);
        if page_size == 0 || page_size as usize > MAX_PAGE_SIZE {
            return Err(ProtocolError::InvalidPageSize(page_size));
        }
        Ok(Self {
            msg_type,
            page_no,
            page_size,
        })
    }

    /// Encodes the header into its packed wire form.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut bytes = [0u8; HEADER_LEN];
        bytes[0] = self.msg_type as u8;
        bytes[1..5].copy_from_slice(&self.page_no.to_ne_bytes());
        bytes[5..9].copy_from_slice(&self.page_size.to_ne_bytes());
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = RequestHeader::new(MsgType::Set, PageNo::new(1234), 8192);
        let decoded = RequestHeader::decode(&header.encode()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_packed_layout() {
        let header = RequestHeader::new(MsgType::Get, PageNo::new(2), 16384);
        let bytes = header.encode();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(bytes[0], 0);
        assert_eq!(u32::from_ne_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]), 2);
        assert_eq!(u32::from_ne_bytes([bytes[5], bytes[6], bytes[7], bytes[8]]), 16384);
    }

    #[test]
    fn test_invalid_msg_type() {
        let mut bytes = RequestHeader::new(MsgType::Get, PageNo::new(0), 8192).encode();
        bytes[0] = 7;
        assert_eq!(
            RequestHeader::decode(&bytes),
            Err(ProtocolError::InvalidMsgType(7))
        );
    }

    #[test]
    fn test_invalid_page_size() {
        let mut bytes = RequestHeader::new(MsgType::Set, PageNo::new(0), 8192).encode();
        bytes[5..9].copy_from_slice(&0u32.to_ne_bytes());
        assert_eq!(
            RequestHeader::decode(&bytes),
            Err(ProtocolError::InvalidPageSize(0))
        );

        let oversize = (MAX_PAGE_SIZE as u32) + 1;
        bytes[5..9].copy_from_slice(&oversize.to_ne_bytes());
        assert_eq!(
            RequestHeader::decode(&bytes),
            Err(ProtocolError::InvalidPageSize(oversize))
        );
    }

    #[test]
    fn test_largest_class_accepted() {
        let header = RequestHeader::new(MsgType::Get, PageNo::new(0), MAX_PAGE_SIZE as u32);
        assert!(RequestHeader::decode(&header.encode()).is_ok());
    }
}
