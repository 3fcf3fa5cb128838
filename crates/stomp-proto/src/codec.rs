//! Byte-stream framing.
//!
//! Frames on the wire are terminated by a single NUL byte. [`FrameDecoder`]
//! accumulates raw socket bytes until it sees the terminator and then yields
//! the frame text without it. Transports feed it whatever a read returned and
//! get zero or more complete frames back.

use bytes::{BufMut, Bytes, BytesMut};

use crate::errors::{ProtocolError, Result};

/// Default upper bound for a single buffered frame (1 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

const TERMINATOR: u8 = 0;

/// Incremental NUL-terminated frame accumulator.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: BytesMut,
    max_frame_size: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Decoder with [`DEFAULT_MAX_FRAME_SIZE`].
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Decoder rejecting frames longer than `max_frame_size` bytes.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { buf: BytesMut::with_capacity(1024), max_frame_size }
    }

    /// Consume one byte.
    ///
    /// Returns the accumulated frame text once the terminator is observed and
    /// resets the internal buffer. Returns `Ok(None)` while the frame is
    /// incomplete.
    ///
    /// # Errors
    ///
    /// `ProtocolError::FrameTooLarge` when the buffered frame would exceed the
    /// limit. The partial frame is discarded.
    pub fn decode_next_byte(&mut self, byte: u8) -> Result<Option<String>> {
        if byte == TERMINATOR {
            let raw = self.buf.split().freeze();
            return Ok(Some(String::from_utf8_lossy(&raw).into_owned()));
        }

        if self.buf.len() >= self.max_frame_size {
            let size = self.buf.len() + 1;
            self.buf.clear();
            return Err(ProtocolError::FrameTooLarge { size, max: self.max_frame_size });
        }

        self.buf.put_u8(byte);
        Ok(None)
    }

    /// Consume a read buffer, returning every frame it completes.
    ///
    /// Bytes after the last terminator stay buffered for the next call.
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<String>> {
        let mut frames = Vec::new();
        for &byte in bytes {
            if let Some(frame) = self.decode_next_byte(byte)? {
                frames.push(frame);
            }
        }
        Ok(frames)
    }

    /// Bytes buffered for the current, incomplete frame.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Wire bytes for outbound frame text, terminator appended if missing.
pub fn encode(text: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(text.len() + 1);
    buf.put_slice(text.as_bytes());
    if !text.ends_with('\0') {
        buf.put_u8(TERMINATOR);
    }
    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_frame_at_terminator() {
        let mut decoder = FrameDecoder::new();
        for &b in b"SEND\n\nhi" {
            assert_eq!(decoder.decode_next_byte(b).unwrap(), None);
        }
        assert_eq!(decoder.decode_next_byte(0).unwrap(), Some("SEND\n\nhi".to_string()));
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn feed_splits_multiple_frames_and_keeps_remainder() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(b"A\n\n\0B\n\n\0C\n").unwrap();
        assert_eq!(frames, vec!["A\n\n".to_string(), "B\n\n".to_string()]);
        assert_eq!(decoder.buffered(), 2);

        let frames = decoder.feed(b"\nbody\0").unwrap();
        assert_eq!(frames, vec!["C\n\nbody".to_string()]);
    }

    #[test]
    fn oversized_frame_is_rejected_and_buffer_reset() {
        let mut decoder = FrameDecoder::with_max_frame_size(4);
        assert!(decoder.feed(b"ABCD").unwrap().is_empty());

        let err = decoder.decode_next_byte(b'E').unwrap_err();
        assert_eq!(err, ProtocolError::FrameTooLarge { size: 5, max: 4 });
        assert_eq!(decoder.buffered(), 0);

        // Decoder is usable again after the reset
        assert_eq!(decoder.feed(b"OK\0").unwrap(), vec!["OK".to_string()]);
    }

    #[test]
    fn invalid_utf8_is_decoded_lossily() {
        let mut decoder = FrameDecoder::new();
        let frames = decoder.feed(&[b'S', 0xff, 0]).unwrap();
        assert_eq!(frames, vec!["S\u{fffd}".to_string()]);
    }

    #[test]
    fn encode_appends_terminator_once() {
        assert_eq!(&encode("RECEIPT\n\n")[..], b"RECEIPT\n\n\0");
        assert_eq!(&encode("RECEIPT\n\n\0")[..], b"RECEIPT\n\n\0");
    }
}
