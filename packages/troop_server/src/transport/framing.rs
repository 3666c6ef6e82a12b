//! Newline-delimited JSON framing over TCP streams.
//!
//! Wire format: one UTF-8 JSON value per line, terminated by `\n`.
//! serde_json never emits a raw newline inside a value, so the terminator
//! is unambiguous. A trailing `\r` is tolerated and blank lines are skipped.

use bytes::{BufMut, BytesMut};
use serde::Serialize;
use tokio_util::codec::{Decoder, Encoder};

use crate::relay::Message;

/// Default maximum frame size (1 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame exceeds {max} bytes")]
    TooLarge { max: usize },

    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),
}

/// Codec that decodes [`Message`] frames and encodes any serializable value.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_frame_bytes: usize,
    /// Bytes of the buffer already scanned for a terminator.
    scanned: usize,
}

impl FrameCodec {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            scanned: 0,
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        loop {
            let Some(offset) = src[self.scanned..].iter().position(|b| *b == b'\n') else {
                self.scanned = src.len();
                if src.len() > self.max_frame_bytes {
                    return Err(FrameError::TooLarge {
                        max: self.max_frame_bytes,
                    });
                }
                return Ok(None);
            };

            let line = src.split_to(self.scanned + offset + 1);
            self.scanned = 0;

            let mut body = &line[..line.len() - 1];
            if let Some(stripped) = body.strip_suffix(b"\r") {
                body = stripped;
            }
            if body.len() > self.max_frame_bytes {
                return Err(FrameError::TooLarge {
                    max: self.max_frame_bytes,
                });
            }
            if body.iter().all(u8::is_ascii_whitespace) {
                continue;
            }

            return Ok(Some(serde_json::from_slice(body)?));
        }
    }
}

impl<T: Serialize> Encoder<T> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), FrameError> {
        let bytes = serde_json::to_vec(&item)?;
        dst.reserve(bytes.len() + 1);
        dst.extend_from_slice(&bytes);
        dst.put_u8(b'\n');
        Ok(())
    }
}

/// Push-style decoder: feed arbitrary chunks, get back every message they
/// complete. Partial trailing bytes are kept for the next call.
#[derive(Debug)]
pub struct MessageReader {
    codec: FrameCodec,
    buffer: BytesMut,
}

impl MessageReader {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            codec: FrameCodec::new(max_frame_bytes),
            buffer: BytesMut::new(),
        }
    }

    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Message>, FrameError> {
        self.buffer.extend_from_slice(chunk);
        let mut messages = Vec::new();
        while let Some(message) = self.codec.decode(&mut self.buffer)? {
            messages.push(message);
        }
        Ok(messages)
    }

    /// Number of buffered bytes not yet forming a complete frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for MessageReader {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

/// Serialize a value into a single wire frame.
pub fn encode_frame<T: Serialize>(value: &T) -> Result<Vec<u8>, FrameError> {
    let mut bytes = serde_json::to_vec(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::{EditPayload, Notice};

    fn insert(ch: &str) -> Message {
        Message::Edit(EditPayload::new("insert").with("char", ch))
    }

    #[test]
    fn test_single_frame() {
        let mut reader = MessageReader::default();
        let out = reader.feed(&encode_frame(&insert("a")).unwrap()).unwrap();
        assert_eq!(out, vec![insert("a")]);
        assert_eq!(reader.pending(), 0);
    }

    #[test]
    fn test_several_frames_in_one_chunk() {
        let mut bytes = encode_frame(&insert("a")).unwrap();
        bytes.extend(encode_frame(&insert("b")).unwrap());
        bytes.extend(encode_frame(&insert("c")).unwrap());

        let mut reader = MessageReader::default();
        let out = reader.feed(&bytes).unwrap();
        assert_eq!(out, vec![insert("a"), insert("b"), insert("c")]);
    }

    #[test]
    fn test_fragment_is_retained() {
        let bytes = encode_frame(&insert("a")).unwrap();
        let (head, tail) = bytes.split_at(5);

        let mut reader = MessageReader::default();
        assert!(reader.feed(head).unwrap().is_empty());
        assert_eq!(reader.pending(), 5);
        assert_eq!(reader.feed(tail).unwrap(), vec![insert("a")]);
        assert_eq!(reader.pending(), 0);
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut bytes = encode_frame(&insert("\n")).unwrap();
        bytes.extend(encode_frame(&Message::server_notice("hello")).unwrap());

        let mut reader = MessageReader::default();
        let mut out = Vec::new();
        for byte in &bytes {
            out.extend(reader.feed(std::slice::from_ref(byte)).unwrap());
        }
        assert_eq!(out, vec![insert("\n"), Message::server_notice("hello")]);
    }

    #[test]
    fn test_crlf_and_blank_lines() {
        let mut reader = MessageReader::default();
        let out = reader
            .feed(b"\n\r\n{\"type\":\"departed\",\"client_id\":3}\r\n\n")
            .unwrap();
        assert_eq!(
            out,
            vec![Message::Departed(crate::relay::Departed { client_id: 3 })]
        );
    }

    #[test]
    fn test_malformed_frame_is_error() {
        let mut reader = MessageReader::default();
        let err = reader.feed(b"{not json}\n").unwrap_err();
        assert!(matches!(err, FrameError::Malformed(_)));
    }

    #[test]
    fn test_oversized_frame_rejected_before_terminator() {
        let mut reader = MessageReader::new(16);
        let err = reader.feed(&[b'x'; 17]).unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { max: 16 }));
    }

    #[test]
    fn test_encoder_accepts_bare_integers() {
        let mut codec = FrameCodec::default();
        let mut dst = BytesMut::new();
        codec.encode(-1i64, &mut dst).unwrap();
        codec
            .encode(
                Message::Notice(Notice {
                    sender_id: -1,
                    text: "x".into(),
                }),
                &mut dst,
            )
            .unwrap();
        assert!(dst.starts_with(b"-1\n{"));
        assert!(dst.ends_with(b"}\n"));
    }
}
