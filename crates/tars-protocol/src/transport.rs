//! Newline-delimited JSON codec for TARS envelopes.
//!
//! Frame format:
//! ```text
//! {"type":"input","text":"hi"}\n
//! {"type":"message","text":"hello","timestamp":1700000000000}\n
//! ```
//!
//! Decoding is lenient: blank lines are skipped, lines that are not JSON are
//! logged and dropped, and well-formed JSON that is not a known envelope is
//! dropped quietly. None of these end the stream. Only an oversized line or an
//! I/O failure is fatal.

use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, trace, warn};

use crate::protocol::Envelope;

/// Maximum line size (16 MB), excluding the delimiter
pub const MAX_LINE_LENGTH: usize = 16 * 1024 * 1024;

/// Line delimiter
const DELIMITER: u8 = b'\n';

/// Codec for newline-delimited JSON envelopes
#[derive(Debug, Default)]
pub struct EnvelopeCodec {
    /// Bytes already scanned for a delimiter, so partial lines are not rescanned.
    next_index: usize,
}

impl EnvelopeCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for EnvelopeCodec {
    type Item = Envelope;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(offset) = src[self.next_index..]
                .iter()
                .position(|b| *b == DELIMITER)
            else {
                if src.len() > MAX_LINE_LENGTH {
                    return Err(CodecError::LineTooLong(src.len()));
                }
                self.next_index = src.len();
                return Ok(None);
            };

            let line_end = self.next_index + offset;
            self.next_index = 0;

            if line_end > MAX_LINE_LENGTH {
                return Err(CodecError::LineTooLong(line_end));
            }

            let line = src.split_to(line_end + 1);
            if let Some(envelope) = parse_line(&line[..line_end]) {
                return Ok(Some(envelope));
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(envelope) = self.decode(buf)? {
            return Ok(Some(envelope));
        }

        if !buf.is_empty() {
            debug!(
                "Discarding {} bytes of unterminated line at end of stream",
                buf.len()
            );
            buf.clear();
        }
        self.next_index = 0;

        Ok(None)
    }
}

impl Encoder<Envelope> for EnvelopeCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        serde_json::to_writer(dst.writer(), &item)?;
        dst.put_u8(DELIMITER);
        Ok(())
    }
}

/// Parse one delimited line into an envelope.
///
/// Returns `None` for anything that should be skipped. Lines that are not
/// valid JSON are logged at warn level with their raw content; valid JSON of
/// an unrecognized shape is only traced.
#[must_use]
pub fn parse_line(line: &[u8]) -> Option<Envelope> {
    let Ok(text) = std::str::from_utf8(line) else {
        warn!(
            "Invalid message from peer (not UTF-8): {}",
            String::from_utf8_lossy(line)
        );
        return None;
    };

    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let value: serde_json::Value = match serde_json::from_str(trimmed) {
        Ok(value) => value,
        Err(e) => {
            warn!("Invalid message from peer: {} ({})", text, e);
            return None;
        }
    };

    match serde_json::from_value::<Envelope>(value) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            trace!("Ignoring unrecognized envelope: {}", e);
            None
        }
    }
}

/// Serialize an envelope into a complete, delimited frame.
///
/// Used when one frame is written to many peers: the returned `Bytes` is
/// reference counted, so cloning it per peer does not copy the payload.
///
/// # Errors
///
/// Returns `CodecError::Json` if the envelope cannot be serialized.
pub fn encode_line(envelope: &Envelope) -> Result<Bytes, CodecError> {
    let mut line = serde_json::to_vec(envelope)?;
    line.push(DELIMITER);
    Ok(Bytes::from(line))
}

/// Errors that can occur during codec operations
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Line too long: {0} bytes (max: {MAX_LINE_LENGTH})")]
    LineTooLong(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{InboundMessage, OutboundMessage};
    use proptest::prelude::*;

    fn decode_all(codec: &mut EnvelopeCodec, buf: &mut BytesMut) -> Vec<Envelope> {
        let mut out = Vec::new();
        while let Some(envelope) = codec.decode(buf).unwrap() {
            out.push(envelope);
        }
        out
    }

    fn decode_chunked(stream: &[u8], cuts: &[usize]) -> Vec<Envelope> {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        let mut out = Vec::new();
        let mut start = 0;
        for &cut in cuts.iter().chain(std::iter::once(&stream.len())) {
            let cut = cut.clamp(start, stream.len());
            buf.extend_from_slice(&stream[start..cut]);
            out.extend(decode_all(&mut codec, &mut buf));
            start = cut;
        }
        out
    }

    fn input(text: &str) -> Envelope {
        Envelope::Input(InboundMessage::new(text))
    }

    #[test]
    fn test_decode_single_line() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":\"input\",\"text\":\"hi\"}\n"[..]);

        let decoded = codec.decode(&mut buf).unwrap();
        assert_eq!(decoded, Some(input("hi")));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_empty_buffer() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();

        let result = codec.decode(&mut buf).unwrap();
        assert!(result.is_none(), "Empty buffer should return None");
    }

    #[test]
    fn test_partial_line_is_kept() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":\"input\",\"te"[..]);

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 19, "Partial line must stay buffered");

        buf.extend_from_slice(b"xt\":\"later\"}\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(input("later")));
    }

    #[test]
    fn test_multiple_lines_in_one_chunk() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::from(
            &b"{\"type\":\"input\",\"text\":\"first\"}\n{\"type\":\"input\",\"text\":\"second\"}\n{\"type\":"[..],
        );

        let decoded = decode_all(&mut codec, &mut buf);
        assert_eq!(decoded, vec![input("first"), input("second")]);
        assert_eq!(&buf[..], b"{\"type\":");
    }

    #[test]
    fn test_blank_lines_are_skipped() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::from(&b"\n   \n\t\r\n{\"type\":\"input\",\"text\":\"x\"}\n"[..]);

        assert_eq!(decode_all(&mut codec, &mut buf), vec![input("x")]);
    }

    #[test]
    fn test_malformed_line_between_valid_lines() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::from(
            &b"{\"type\":\"input\",\"text\":\"a\"}\nnot json at all\n{\"type\":\"input\",\"text\":\"b\"}\n"[..],
        );

        assert_eq!(decode_all(&mut codec, &mut buf), vec![input("a"), input("b")]);
    }

    #[test]
    fn test_invalid_utf8_line_is_dropped() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0xff, 0xfe, b'\n']);
        buf.extend_from_slice(b"{\"type\":\"input\",\"text\":\"ok\"}\n");

        assert_eq!(decode_all(&mut codec, &mut buf), vec![input("ok")]);
    }

    #[test]
    fn test_unrecognized_shapes_are_ignored() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::from(
            &b"{\"type\":\"status\",\"text\":\"x\"}\n{\"type\":\"input\"}\n{\"type\":\"input\",\"text\":3}\n[1,2]\n\"str\"\n{\"type\":\"input\",\"text\":\"kept\"}\n"[..],
        );

        assert_eq!(decode_all(&mut codec, &mut buf), vec![input("kept")]);
    }

    #[test]
    fn test_crlf_line_endings() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":\"input\",\"text\":\"win\"}\r\n"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some(input("win")));
    }

    #[test]
    fn test_multibyte_text_split_mid_character() {
        let stream = "{\"type\":\"input\",\"text\":\"héllo 🤖\"}\n".as_bytes();
        let emoji_start = stream.iter().position(|b| *b == 0xf0).unwrap();

        let decoded = decode_chunked(stream, &[emoji_start + 2]);
        assert_eq!(decoded, vec![input("héllo 🤖")]);
    }

    #[test]
    fn test_decode_eof_discards_unterminated_tail() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::from(&b"{\"type\":\"input\",\"text\":\"done\"}\n{\"type\":\"inp"[..]);

        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some(input("done")));
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_line_too_long_without_delimiter() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        buf.resize(MAX_LINE_LENGTH + 1, b'a');

        let result = codec.decode(&mut buf);
        assert!(matches!(result, Err(CodecError::LineTooLong(_))));
    }

    #[test]
    fn test_encode_appends_delimiter() {
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();

        codec
            .encode(
                Envelope::Message(OutboundMessage::with_timestamp("hello", 7)),
                &mut buf,
            )
            .unwrap();

        assert_eq!(
            &buf[..],
            b"{\"type\":\"message\",\"text\":\"hello\",\"timestamp\":7}\n"
        );
    }

    #[test]
    fn test_encoded_newlines_are_escaped() {
        let line = encode_line(&input("two\nlines")).unwrap();
        assert_eq!(
            line.iter().position(|b| *b == b'\n'),
            Some(line.len() - 1),
            "Only the frame delimiter may be a raw newline"
        );

        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::from(&line[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(input("two\nlines")));
    }

    #[test]
    fn test_encode_line_matches_encoder() {
        let envelope = Envelope::Message(OutboundMessage::with_timestamp("same", 99));
        let mut codec = EnvelopeCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(envelope.clone(), &mut buf).unwrap();

        assert_eq!(encode_line(&envelope).unwrap(), buf.freeze());
    }

    #[test]
    fn test_codec_error_display() {
        let err = CodecError::LineTooLong(20_000_000);
        let msg = err.to_string();
        assert!(msg.contains("20000000"));
        assert!(msg.contains("too long"));
    }

    #[test]
    fn test_codec_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionReset, "connection reset");
        let codec_err: CodecError = io_err.into();
        assert!(matches!(codec_err, CodecError::Io(_)));
        assert!(codec_err.to_string().contains("connection reset"));
    }

    proptest! {
        #[test]
        fn prop_chunk_boundaries_do_not_change_output(
            texts in proptest::collection::vec("[a-zA-Z0-9 éü🤖\\n\"]{0,24}", 0..8),
            noise in proptest::collection::vec(any::<bool>(), 0..8),
            mut cuts in proptest::collection::vec(any::<usize>(), 0..12),
        ) {
            let mut stream = Vec::new();
            let mut expected = Vec::new();
            for (i, text) in texts.iter().enumerate() {
                if noise.get(i).copied().unwrap_or(false) {
                    stream.extend_from_slice(b"garbage {\n  \n");
                }
                let envelope = input(text);
                stream.extend_from_slice(&encode_line(&envelope).unwrap());
                expected.push(envelope);
            }

            let len = stream.len().max(1);
            for cut in &mut cuts {
                *cut %= len;
            }
            cuts.sort_unstable();

            let whole = decode_chunked(&stream, &[]);
            let chunked = decode_chunked(&stream, &cuts);
            prop_assert_eq!(&whole, &expected);
            prop_assert_eq!(chunked, expected);
        }
    }
}
