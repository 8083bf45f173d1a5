//! Wire format encoding and decoding.
//!
//! Implements the 12-byte binary packet header:
//! ```text
//! ┌──────┬─────────────┬──────────┬──────────┐
//! │ NUL  │ Magic       │ Type     │ Length   │
//! │ 1 b  │ "REQ"|"RES" │ uint32 BE│ uint32 BE│
//! └──────┴─────────────┴──────────┴──────────┘
//! ```
//!
//! `Length` counts the argument and body bytes that follow the header.
//! A stream whose first byte is not NUL carries admin text lines instead.

/// Header size in bytes including the leading NUL.
pub const HEADER_SIZE: usize = 12;

/// Header bytes following the leading NUL (magic + type + length).
pub const HEADER_TAIL_SIZE: usize = HEADER_SIZE - 1;

/// Maximum argument value size in bytes, terminator excluded.
pub const MAX_ARG_SIZE: usize = 64;

/// Bytes scanned for an admin line terminator before giving up.
pub const MAX_ADMIN_LINE: usize = 1024;

/// Argument terminator.
pub const ARG_TERMINATOR: u8 = 0;

/// Admin line terminator.
pub const LINE_TERMINATOR: u8 = b'\n';

/// Magic for packets sent to the server.
pub const MAGIC_REQUEST: [u8; 3] = *b"REQ";

/// Magic for packets sent by the server.
pub const MAGIC_RESPONSE: [u8; 3] = *b"RES";

/// Packet direction, selected by the header magic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Request,
    Response,
}

impl Direction {
    /// Magic bytes for this direction.
    #[inline]
    pub fn magic(self) -> [u8; 3] {
        match self {
            Direction::Request => MAGIC_REQUEST,
            Direction::Response => MAGIC_RESPONSE,
        }
    }

    /// Direction for the given magic, if it is one.
    #[inline]
    pub fn from_magic(magic: [u8; 3]) -> Option<Self> {
        match &magic {
            b"REQ" => Some(Direction::Request),
            b"RES" => Some(Direction::Response),
            _ => None,
        }
    }
}

/// Decoded binary packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Request or response.
    pub direction: Direction,
    /// Packet type id.
    pub type_id: u32,
    /// Argument + body length in bytes.
    pub length: u32,
}

impl Header {
    /// Create a new header.
    pub fn new(direction: Direction, type_id: u32, length: u32) -> Self {
        Self {
            direction,
            type_id,
            length,
        }
    }

    /// Encode header to bytes (Big Endian), leading NUL included.
    ///
    /// # Example
    ///
    /// ```
    /// use gearman_packet::protocol::{Direction, Header};
    ///
    /// let bytes = Header::new(Direction::Request, 7, 4).encode();
    /// assert_eq!(&bytes[..4], b"\0REQ");
    /// assert_eq!(bytes.len(), 12);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[1..4].copy_from_slice(&self.direction.magic());
        buf[4..8].copy_from_slice(&self.type_id.to_be_bytes());
        buf[8..12].copy_from_slice(&self.length.to_be_bytes());
        buf
    }

    /// Decode the 11 header bytes that follow the leading NUL.
    ///
    /// Returns `None` if the buffer is too short, `Some(Err(magic))` if the
    /// magic is not recognized.
    pub fn decode_tail(buf: &[u8]) -> Option<std::result::Result<Self, [u8; 3]>> {
        if buf.len() < HEADER_TAIL_SIZE {
            return None;
        }
        let magic = [buf[0], buf[1], buf[2]];
        let Some(direction) = Direction::from_magic(magic) else {
            return Some(Err(magic));
        };
        Some(Ok(Self {
            direction,
            type_id: u32::from_be_bytes([buf[3], buf[4], buf[5], buf[6]]),
            length: u32::from_be_bytes([buf[7], buf[8], buf[9], buf[10]]),
        }))
    }
}

/// Encode a header to bytes (standalone function).
#[inline]
pub fn encode_header(direction: Direction, type_id: u32, length: u32) -> [u8; HEADER_SIZE] {
    Header::new(direction, type_id, length).encode()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_big_endian_byte_order() {
        let bytes = encode_header(Direction::Response, 0x01020304, 0x05060708);

        assert_eq!(bytes[0], 0);
        assert_eq!(&bytes[1..4], b"RES");
        assert_eq!(&bytes[4..8], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&bytes[8..12], &[0x05, 0x06, 0x07, 0x08]);
    }

    #[test]
    fn test_header_tail_decode() {
        let header = Header::new(Direction::Request, 7, 100);
        let bytes = header.encode();

        let decoded = Header::decode_tail(&bytes[1..]).unwrap().unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_decode_too_short_buffer() {
        assert!(Header::decode_tail(&[0u8; 10]).is_none());
    }

    #[test]
    fn test_decode_bad_magic() {
        let mut bytes = encode_header(Direction::Request, 1, 0);
        bytes[1..4].copy_from_slice(b"XYZ");

        let result = Header::decode_tail(&bytes[1..]).unwrap();
        assert_eq!(result, Err(*b"XYZ"));
    }

    #[test]
    fn test_magic_round_trip() {
        for direction in [Direction::Request, Direction::Response] {
            assert_eq!(Direction::from_magic(direction.magic()), Some(direction));
        }
        assert_eq!(Direction::from_magic(*b"req"), None);
    }
}
