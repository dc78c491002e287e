//! Stream-delimited JSON codec.
//!
//! The Kodi socket writes JSON objects back to back with no separator, so frames are
//! found by scanning for the brace that closes the outermost object. The scan resumes
//! where the previous call stopped, so a large message arriving in many reads is
//! examined once, and `serde_json` only sees complete frames.

use bytes::{Buf, BufMut, BytesMut};
use serde::Serialize;
use serde_json::Value;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::error::TransportError;

/// One decoded frame. A syntax error is reported in-band so the stream stays usable.
pub type DecodedFrame = Result<Value, serde_json::Error>;

/// Progress through the frame at the head of the buffer
#[derive(Debug, Clone, Copy, Default)]
struct FrameScan {
    /// Bytes of the frame examined so far
    offset: usize,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl FrameScan {
    /// Continue over `buf`, returning the frame length once the outermost container closes
    fn advance(&mut self, buf: &[u8]) -> Option<usize> {
        while let Some(&byte) = buf.get(self.offset) {
            self.offset += 1;
            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if byte == b'\\' {
                    self.escaped = true;
                } else if byte == b'"' {
                    self.in_string = false;
                }
                continue;
            }
            match byte {
                b'"' => self.in_string = true,
                b'{' | b'[' => self.depth += 1,
                b'}' | b']' => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        return Some(self.offset);
                    }
                }
                _ => {}
            }
        }
        None
    }
}

#[derive(Debug, Clone)]
pub struct JsonCodec {
    max_frame_length: usize,
    scan: FrameScan,
}

impl JsonCodec {
    pub fn new(max_frame_length: usize) -> Self {
        Self {
            max_frame_length,
            scan: FrameScan::default(),
        }
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    /// Drop input up to the next object start and report `error` in-band
    fn resync(&mut self, src: &mut BytesMut, error: serde_json::Error) -> DecodedFrame {
        self.scan = FrameScan::default();
        match src.iter().skip(1).position(|b| *b == b'{') {
            Some(offset) => src.advance(offset + 1),
            None => src.clear(),
        }
        debug!(error = %error, remaining = src.len(), "Discarded malformed input");
        Err(error)
    }
}

impl Default for JsonCodec {
    fn default() -> Self {
        Self::new(16 * 1024 * 1024)
    }
}

impl Decoder for JsonCodec {
    type Item = DecodedFrame;
    type Error = TransportError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if self.scan.offset == 0 {
            match src.iter().position(|b| !b.is_ascii_whitespace()) {
                Some(start) => src.advance(start),
                None => {
                    src.clear();
                    return Ok(None);
                }
            }
            if !matches!(src[0], b'{' | b'[') {
                let error = <serde_json::Error as serde::de::Error>::custom(format!(
                    "expected a JSON object, found byte 0x{:02x}",
                    src[0]
                ));
                return Ok(Some(self.resync(src, error)));
            }
        }

        let Some(length) = self.scan.advance(src) else {
            if src.len() > self.max_frame_length {
                self.scan = FrameScan::default();
                return Err(TransportError::FrameTooLarge {
                    size: src.len(),
                    limit: self.max_frame_length,
                });
            }
            return Ok(None);
        };

        self.scan = FrameScan::default();
        match serde_json::from_slice::<Value>(&src[..length]) {
            Ok(value) => {
                src.advance(length);
                Ok(Some(Ok(value)))
            }
            Err(e) => Ok(Some(self.resync(src, e))),
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            None => {
                self.scan = FrameScan::default();
                Err(TransportError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("stream ended with {} bytes of an incomplete message", src.len()),
                )))
            }
        }
    }
}

impl<T: Serialize> Encoder<T> for JsonCodec {
    type Error = TransportError;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let json = serde_json::to_vec(&item)?;
        dst.reserve(json.len() + 1);
        dst.extend_from_slice(&json);
        dst.put_u8(b'\n');
        Ok(())
    }
}
