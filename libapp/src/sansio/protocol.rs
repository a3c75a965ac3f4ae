//! Pure framing functions.
//!
//! Every unit on the wire is a big-endian `u32` length followed by that many
//! bytes of one serialized [`Message`]. All functions operate on byte
//! buffers and never perform I/O.

use super::types::ParseResult;
use crate::error::*;
use crate::message::{self, Message};

/// Size of the length prefix.
pub const HEADER_SIZE: usize = 4;

/// Frames larger than this are rejected before any buffering.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Extract one length-prefixed frame from the front of `buf`.
///
/// # Example
///
/// ```
/// use libapp::sansio::protocol::parse_frame;
/// use libapp::sansio::ParseResult;
///
/// let buf = [0, 0, 0, 2, 0xaa, 0xbb, 0, 0];
/// match parse_frame(&buf) {
///     ParseResult::Complete { message, consumed } => {
///         assert_eq!(message, [0xaa, 0xbb]);
///         assert_eq!(consumed, 6);
///     }
///     _ => panic!("Expected complete frame"),
/// }
/// ```
pub fn parse_frame(buf: &[u8]) -> ParseResult {
    if buf.len() < HEADER_SIZE {
        return ParseResult::Incomplete {
            needed: HEADER_SIZE - buf.len(),
        };
    }

    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if len > MAX_FRAME_SIZE {
        return ParseResult::Invalid {
            error: format!("frame of {} bytes exceeds {} bytes", len, MAX_FRAME_SIZE),
        };
    }

    let total = HEADER_SIZE + len;
    if buf.len() < total {
        return ParseResult::Incomplete {
            needed: total - buf.len(),
        };
    }

    ParseResult::Complete {
        message: buf[HEADER_SIZE..total].to_vec(),
        consumed: total,
    }
}

/// Prefix `payload` with its length.
pub fn frame(payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ErrorKind::MalformedEncoding(format!(
            "message of {} bytes exceeds {} bytes",
            payload.len(),
            MAX_FRAME_SIZE
        ))
        .into());
    }
    let mut bytes = Vec::with_capacity(HEADER_SIZE + payload.len());
    bytes.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    bytes.extend_from_slice(payload);
    Ok(bytes)
}

/// Serialize and frame a message.
pub fn serialize_message(message: &Message) -> Result<Vec<u8>> {
    frame(&message::serialize(message)?)
}

/// Decode the body of a frame (from `ParseResult::Complete`).
pub fn parse_message(body: &[u8]) -> Result<Message> {
    message::deserialize(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::CallArgument;
    use crate::variant::Variant;

    #[test]
    fn test_parse_complete_frame() {
        let m = Message::call(1, "ping", vec![]);
        let bytes = serialize_message(&m).unwrap();
        match parse_frame(&bytes) {
            ParseResult::Complete { message, consumed } => {
                assert_eq!(consumed, bytes.len());
                assert_eq!(parse_message(&message).unwrap(), m);
            }
            r => panic!("Expected complete frame, got {:?}", r),
        }
    }

    #[test]
    fn test_parse_incomplete_frame() {
        assert_eq!(parse_frame(&[]), ParseResult::Incomplete { needed: 4 });
        assert_eq!(parse_frame(&[0, 0]), ParseResult::Incomplete { needed: 2 });
        assert_eq!(
            parse_frame(&[0, 0, 0, 5, 1, 2]),
            ParseResult::Incomplete { needed: 3 }
        );
    }

    #[test]
    fn test_parse_with_extra_data() {
        let first = serialize_message(&Message::call(
            1,
            "add",
            vec![CallArgument::input(Variant::Int32(2))],
        ))
        .unwrap();
        let mut buf = first.clone();
        buf.extend_from_slice(&serialize_message(&Message::acknowledgement(1, None)).unwrap());

        match parse_frame(&buf) {
            ParseResult::Complete { consumed, .. } => assert_eq!(consumed, first.len()),
            r => panic!("Expected complete frame, got {:?}", r),
        }
    }

    #[test]
    fn test_parse_oversized_frame() {
        match parse_frame(&[0xff, 0xff, 0xff, 0xff]) {
            ParseResult::Invalid { .. } => {}
            r => panic!("Expected invalid frame, got {:?}", r),
        }
    }

    #[test]
    fn test_frame_header() {
        assert_eq!(frame(&[7, 8, 9]).unwrap(), [0, 0, 0, 3, 7, 8, 9]);
    }
}
