use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::codec::{encode_message, CodecConfig};
use crate::error::{ProtocolError, Result};
use crate::message::Message;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete messages to any `Write` stream.
pub struct JsonLinesWriter<T> {
    inner: T,
    buf: BytesMut,
    config: CodecConfig,
}

impl<T: Write> JsonLinesWriter<T> {
    /// Create a new writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, CodecConfig::default())
    }

    /// Create a new writer with explicit configuration.
    pub fn with_config(inner: T, config: CodecConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode and write one message, then flush (blocking).
    pub fn send(&mut self, message: &Message) -> Result<()> {
        self.buf.clear();
        encode_message(message, &mut self.buf, self.config.max_message_size)?;

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(ProtocolError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(ProtocolError::Io(err)),
            }
        }

        self.flush()
    }

    /// Flush the underlying stream.
    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(ProtocolError::Io(err)),
            }
        }
    }

    /// Borrow the underlying stream.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::message::{BuildResult, InputChunk};
    use crate::reader::JsonLinesReader;

    #[test]
    fn written_messages_read_back_in_order() {
        let mut writer = JsonLinesWriter::new(Cursor::new(Vec::<u8>::new()));
        writer
            .send(&Message::InputChunk(InputChunk::new(&b"hello"[..])))
            .unwrap();
        writer
            .send(&Message::Result(BuildResult::success(None)))
            .unwrap();

        let bytes = writer.into_inner().into_inner();
        assert_eq!(bytes.iter().filter(|b| **b == b'\n').count(), 2);

        let mut reader = JsonLinesReader::new(Cursor::new(bytes));
        assert_eq!(
            reader.read_message().unwrap(),
            Some(Message::InputChunk(InputChunk::new(&b"hello"[..])))
        );
        assert_eq!(
            reader.read_message().unwrap(),
            Some(Message::Result(BuildResult::success(None)))
        );
        assert_eq!(reader.read_message().unwrap(), None);
    }

    #[test]
    fn zero_length_write_is_connection_closed() {
        let mut writer = JsonLinesWriter::new(ClosedWriter);
        let err = writer
            .send(&Message::Result(BuildResult::success(None)))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ConnectionClosed));
    }

    #[test]
    fn interrupted_write_retries() {
        let mut writer = JsonLinesWriter::new(InterruptOnce {
            interrupted: false,
            written: Vec::new(),
        });
        writer
            .send(&Message::Result(BuildResult::failure("boom")))
            .unwrap();
        assert!(writer.get_ref().written.ends_with(b"\n"));
    }

    struct ClosedWriter;

    impl Write for ClosedWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct InterruptOnce {
        interrupted: bool,
        written: Vec<u8>,
    }

    impl Write for InterruptOnce {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
