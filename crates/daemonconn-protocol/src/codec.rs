use bytes::{Buf, BufMut, BytesMut};

use crate::error::{ProtocolError, Result};
use crate::message::Message;

/// Line terminator between encoded messages.
pub const DELIMITER: u8 = b'\n';

/// Default maximum encoded message size: 16 MiB.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Configuration for the message codec.
#[derive(Debug, Clone)]
pub struct CodecConfig {
    /// Maximum encoded message size in bytes, excluding the delimiter. Default: 16 MiB.
    pub max_message_size: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
        }
    }
}

/// Encode a message as a single JSON line.
///
/// Wire format:
/// ```text
/// {"type":"<variant>", ...fields}\n
/// ```
/// serde_json never emits a raw newline inside a value, so the delimiter is unambiguous.
pub fn encode_message(message: &Message, dst: &mut BytesMut, max_size: usize) -> Result<()> {
    let encoded = serde_json::to_vec(message)?;
    if encoded.len() > max_size {
        return Err(ProtocolError::MessageTooLarge {
            size: encoded.len(),
            max: max_size,
        });
    }
    dst.reserve(encoded.len() + 1);
    dst.put_slice(&encoded);
    dst.put_u8(DELIMITER);
    Ok(())
}

/// Decode the next message from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete line yet.
/// Blank lines are skipped. On success, consumes the line from the buffer.
pub fn decode_message(src: &mut BytesMut, max_size: usize) -> Result<Option<Message>> {
    loop {
        let Some(end) = src.iter().position(|byte| *byte == DELIMITER) else {
            if src.len() > max_size {
                return Err(ProtocolError::MessageTooLarge {
                    size: src.len(),
                    max: max_size,
                });
            }
            return Ok(None); // Need more data
        };

        if end > max_size {
            return Err(ProtocolError::MessageTooLarge {
                size: end,
                max: max_size,
            });
        }

        let line = src.split_to(end);
        src.advance(1);

        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        return Ok(Some(serde_json::from_slice(&line)?));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{CancelSignal, InputChunk, ProtocolMessage};

    #[test]
    fn encode_appends_single_delimiter() {
        let mut buf = BytesMut::new();
        encode_message(
            &Message::CancelSignal(CancelSignal::default()),
            &mut buf,
            DEFAULT_MAX_MESSAGE_SIZE,
        )
        .unwrap();

        assert_eq!(buf.as_ref(), b"{\"type\":\"cancel_signal\"}\n");
    }

    #[test]
    fn decode_incomplete_line() {
        let mut buf = BytesMut::from(&b"{\"type\":\"cancel"[..]);
        let result = decode_message(&mut buf, DEFAULT_MAX_MESSAGE_SIZE).unwrap();
        assert!(result.is_none());
        assert_eq!(buf.len(), 15);
    }

    #[test]
    fn decode_multiple_lines_in_order() {
        let mut buf = BytesMut::new();
        let first = Message::InputChunk(InputChunk::new(&b"a"[..]));
        let second = Message::Protocol(ProtocolMessage::new("build", None));
        encode_message(&first, &mut buf, DEFAULT_MAX_MESSAGE_SIZE).unwrap();
        encode_message(&second, &mut buf, DEFAULT_MAX_MESSAGE_SIZE).unwrap();

        let decoded_first = decode_message(&mut buf, DEFAULT_MAX_MESSAGE_SIZE)
            .unwrap()
            .unwrap();
        let decoded_second = decode_message(&mut buf, DEFAULT_MAX_MESSAGE_SIZE)
            .unwrap()
            .unwrap();

        assert_eq!(decoded_first, first);
        assert_eq!(decoded_second, second);
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_skips_blank_lines() {
        let mut buf = BytesMut::from(&b"\n  \n{\"type\":\"cancel_signal\"}\n"[..]);
        let message = decode_message(&mut buf, DEFAULT_MAX_MESSAGE_SIZE)
            .unwrap()
            .unwrap();
        assert_eq!(message, Message::CancelSignal(CancelSignal::default()));
    }

    #[test]
    fn decode_rejects_malformed_json() {
        let mut buf = BytesMut::from(&b"{not json}\n"[..]);
        let result = decode_message(&mut buf, DEFAULT_MAX_MESSAGE_SIZE);
        assert!(matches!(result, Err(ProtocolError::Json(_))));
    }

    #[test]
    fn decode_rejects_unknown_type() {
        let mut buf = BytesMut::from(&b"{\"type\":\"teleport\"}\n"[..]);
        let result = decode_message(&mut buf, DEFAULT_MAX_MESSAGE_SIZE);
        assert!(matches!(result, Err(ProtocolError::Json(_))));
    }

    #[test]
    fn oversized_line_without_delimiter_is_rejected() {
        let mut buf = BytesMut::from(&[b'x'; 64][..]);
        let result = decode_message(&mut buf, 16);
        assert!(matches!(
            result,
            Err(ProtocolError::MessageTooLarge { size: 64, max: 16 })
        ));
    }

    #[test]
    fn encode_rejects_oversized_message() {
        let mut buf = BytesMut::new();
        let message = Message::InputChunk(InputChunk::new(vec![0u8; 128]));
        let result = encode_message(&message, &mut buf, 32);
        assert!(matches!(result, Err(ProtocolError::MessageTooLarge { .. })));
        assert!(buf.is_empty());
    }
}
