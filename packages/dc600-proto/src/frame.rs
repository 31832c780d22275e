//! Frame delimiting and escape/unescape for the JT/T 808 transport.
//!
//! A frame on the wire is:
//!
//! ```text
//! <sentinel> <escaped body + checksum> <sentinel>
//! ```
//!
//! The checksum is a single-byte XOR of every unescaped body byte and is
//! appended to the body before escaping. Three sentinel/escape pairs are
//! in the wild depending on device firmware; the decoder figures out
//! which one a given frame uses from its opening byte rather than being
//! told up front.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::FrameError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscapeMode {
    /// `0x7E` sentinel, `0x7D` escape byte. The mode every real device uses.
    Standard,
    /// `0xE7` sentinel, `0xE6` escape byte.
    AltE7,
    /// `0x3E` sentinel, `0x3D` escape byte.
    AltHex3E,
}

impl EscapeMode {
    fn from_sentinel(b: u8) -> Option<Self> {
        match b {
            0x7E => Some(EscapeMode::Standard),
            0xE7 => Some(EscapeMode::AltE7),
            0x3E => Some(EscapeMode::AltHex3E),
            _ => None,
        }
    }

    fn sentinel(&self) -> u8 {
        match self {
            EscapeMode::Standard => 0x7E,
            EscapeMode::AltE7 => 0xE7,
            EscapeMode::AltHex3E => 0x3E,
        }
    }

    fn escape(&self) -> u8 {
        match self {
            EscapeMode::Standard => 0x7D,
            EscapeMode::AltE7 => 0xE6,
            EscapeMode::AltHex3E => 0x3D,
        }
    }

    fn escape_pair(&self) -> (u8, u8) {
        // sentinel byte is transmitted as (escape, sentinel ^ 0x02),
        // escape byte is transmitted as (escape, escape ^ 0x02)
        (self.escape(), self.sentinel() ^ 0x02)
    }
}

/// An unescaped, checksum-verified frame body ready for header parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub mode: EscapeMode,
    pub body: Vec<u8>,
}

fn unescape(mode: EscapeMode, raw: &[u8]) -> Result<Vec<u8>, FrameError> {
    let escape = mode.escape();
    let sentinel = mode.sentinel();
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        let b = raw[i];
        if b == escape {
            let next = *raw.get(i + 1).ok_or(FrameError::MalformedEscape(i))?;
            if next == escape ^ 0x02 {
                out.push(escape);
            } else if next == sentinel ^ 0x02 {
                out.push(sentinel);
            } else {
                return Err(FrameError::MalformedEscape(i));
            }
            i += 2;
        } else {
            out.push(b);
            i += 1;
        }
    }
    Ok(out)
}

fn escape(mode: EscapeMode, body: &[u8], dst: &mut BytesMut) {
    let (escape_byte, sentinel_escaped) = mode.escape_pair();
    let escape_escaped = escape_byte ^ 0x02;
    let sentinel = mode.sentinel();
    for &b in body {
        if b == sentinel {
            dst.put_u8(escape_byte);
            dst.put_u8(sentinel_escaped);
        } else if b == escape_byte {
            dst.put_u8(escape_byte);
            dst.put_u8(escape_escaped);
        } else {
            dst.put_u8(b);
        }
    }
}

fn checksum(body: &[u8]) -> u8 {
    body.iter().fold(0u8, |acc, &b| acc ^ b)
}

/// Finds the first byte in `src` that can open a frame under any of the
/// three known escape modes, returning its index and mode.
fn find_opening_sentinel(src: &[u8]) -> Option<(usize, EscapeMode)> {
    src.iter()
        .enumerate()
        .find_map(|(i, &b)| EscapeMode::from_sentinel(b).map(|m| (i, m)))
}

/// `tokio_util::codec::Decoder`/`Encoder` for the delimit-and-escape
/// framing layer. Produces and consumes the still-escaped, checksummed
/// body bytes sandwiched between sentinels — header parsing happens a
/// layer up, in [`crate::header`].
#[derive(Debug, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = RawFrame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let (start, mode) = match find_opening_sentinel(src) {
                Some(found) => found,
                None => {
                    src.clear();
                    return Ok(None);
                }
            };
            if start > 0 {
                src.advance(start);
            }

            let sentinel = mode.sentinel();
            let closing = src[1..].iter().position(|&b| b == sentinel).map(|p| p + 1);
            let Some(end) = closing else {
                return Ok(None);
            };

            let escaped_body = &src[1..end];
            if escaped_body.is_empty() {
                // Back-to-back sentinels with nothing between them — a
                // keepalive some firmware sends. Consume and keep reading.
                src.advance(end + 1);
                continue;
            }

            let unescaped = match unescape(mode, escaped_body) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed frame");
                    src.advance(end + 1);
                    continue;
                }
            };

            src.advance(end + 1);

            if unescaped.is_empty() {
                tracing::warn!("dropping frame with empty body");
                continue;
            }

            let (payload, received_checksum) = unescaped.split_at(unescaped.len() - 1);
            let expected = checksum(payload);
            let actual = received_checksum[0];
            if expected != actual {
                tracing::warn!(
                    expected = format!("{expected:#04x}"),
                    actual = format!("{actual:#04x}"),
                    "dropping frame with bad checksum"
                );
                continue;
            }

            return Ok(Some(RawFrame { mode, body: payload.to_vec() }));
        }
    }
}

impl Encoder<RawFrame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: RawFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let sum = checksum(&item.body);
        let mut with_checksum = item.body;
        with_checksum.push(sum);

        dst.put_u8(item.mode.sentinel());
        escape(item.mode, &with_checksum, dst);
        dst.put_u8(item.mode.sentinel());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(mode: EscapeMode, body: &[u8]) {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(RawFrame { mode, body: body.to_vec() }, &mut buf)
            .unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.body, body);
        assert_eq!(decoded.mode, mode);
    }

    #[test]
    fn standard_mode_roundtrips() {
        roundtrip(EscapeMode::Standard, &[0x00, 0x01, 0x02, 0x7E, 0x7D, 0xFF]);
    }

    #[test]
    fn alt_e7_mode_roundtrips() {
        roundtrip(EscapeMode::AltE7, &[0x00, 0xE7, 0xE6, 0x10]);
    }

    #[test]
    fn alt_hex3e_mode_roundtrips() {
        roundtrip(EscapeMode::AltHex3E, &[0x3E, 0x3D, 0x01]);
    }

    #[test]
    fn bad_checksum_is_dropped_not_fatal() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x7E, 0x01, 0x02, 0xFF, 0x7E]);
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn resyncs_past_garbage_prefix() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x00, 0x11, 0x22]);
        let body = [0x01u8, 0x02];
        let sum = checksum(&body);
        buf.extend_from_slice(&[0x7E, body[0], body[1], sum, 0x7E]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.body, body);
    }

    #[test]
    fn back_to_back_sentinels_are_skipped() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x7E, 0x7E]);
        let body = [0x05u8];
        let sum = checksum(&body);
        buf.extend_from_slice(&[0x7E, body[0], sum, 0x7E]);
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.body, body);
    }
}
