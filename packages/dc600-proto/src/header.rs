//! The fixed message header every JT/T 808 message body starts with,
//! once the frame codec has stripped sentinels/escaping and verified the
//! checksum.
//!
//! ```text
//! message id        u16
//! body properties   u16   (bits 0-9 body length, bit 13 sub-packaging)
//! device id         6 bytes, packed BCD (12 decimal digits)
//! sequence          u16
//! [total packages   u16]  only present when bit 13 is set
//! [package no       u16]  only present when bit 13 is set
//! ```

use bytes::{Buf, BufMut, BytesMut};

use crate::bcd;
use crate::error::HeaderError;

const SUBPACKAGE_BIT: u16 = 1 << 13;
const BODY_LENGTH_MASK: u16 = 0x03FF;

/// Distinguishes a sub-package's position; never constructed from a
/// buffer length, only ever parsed off the wire, so the historical
/// "completed when enough bytes arrived" bug has no code path to live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageNo {
    pub total_packages: u16,
    pub package_no: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageHeader {
    pub message_id: u16,
    pub body_properties: u16,
    pub device_id: String,
    pub sequence: u16,
    pub sub_package: Option<PackageNo>,
}

impl MessageHeader {
    pub fn body_length(&self) -> usize {
        (self.body_properties & BODY_LENGTH_MASK) as usize
    }

    pub fn is_sub_packaged(&self) -> bool {
        self.body_properties & SUBPACKAGE_BIT != 0
    }

    /// Parses a header off the front of `buf`, returning the header and
    /// the number of bytes consumed. The remainder of `buf` is the
    /// message body (and, per the caller's contract, the trailing bytes
    /// have already had the frame checksum stripped).
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), HeaderError> {
        const MIN_LEN: usize = 2 + 2 + 6 + 2;
        if buf.len() < MIN_LEN {
            return Err(HeaderError::Truncated { needed: MIN_LEN, have: buf.len() });
        }

        let mut cursor = &buf[..];
        let message_id = cursor.get_u16();
        let body_properties = cursor.get_u16();

        let device_id_bytes = &cursor[..6];
        let device_id =
            bcd::decode_device_id(device_id_bytes).map_err(|_| HeaderError::BadDeviceId)?;
        cursor.advance(6);

        let sequence = cursor.get_u16();

        let sub_package = if body_properties & SUBPACKAGE_BIT != 0 {
            if cursor.len() < 4 {
                return Err(HeaderError::Truncated { needed: MIN_LEN + 4, have: buf.len() });
            }
            let total_packages = cursor.get_u16();
            let package_no = cursor.get_u16();
            Some(PackageNo { total_packages, package_no })
        } else {
            None
        };

        let consumed = buf.len() - cursor.len();
        let declared = (body_properties & BODY_LENGTH_MASK) as usize;
        let remaining = buf.len() - consumed;
        if declared > remaining {
            return Err(HeaderError::ImplausibleLength { declared, total: buf.len() });
        }

        Ok((
            MessageHeader { message_id, body_properties, device_id, sequence, sub_package },
            consumed,
        ))
    }

    /// Encodes the header, setting bit 13 and the length bits from
    /// `body_len` and `sub_package` as appropriate. Used when building
    /// outbound command frames.
    pub fn encode(&self, body_len: usize, dst: &mut BytesMut) -> Result<(), HeaderError> {
        let mut props = (body_len as u16) & BODY_LENGTH_MASK;
        if body_len > BODY_LENGTH_MASK as usize {
            return Err(HeaderError::ImplausibleLength { declared: body_len, total: body_len });
        }
        if self.sub_package.is_some() {
            props |= SUBPACKAGE_BIT;
        }

        dst.put_u16(self.message_id);
        dst.put_u16(props);
        dst.put_slice(&bcd::encode_device_id(&self.device_id).map_err(|_| HeaderError::BadDeviceId)?);
        dst.put_u16(self.sequence);
        if let Some(sub) = self.sub_package {
            dst.put_u16(sub.total_packages);
            dst.put_u16(sub.package_no);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header_bytes(sub_package: bool, body_len: u16) -> Vec<u8> {
        let mut buf = BytesMut::new();
        let mut props = body_len & BODY_LENGTH_MASK;
        if sub_package {
            props |= SUBPACKAGE_BIT;
        }
        buf.put_u16(0x0200);
        buf.put_u16(props);
        buf.put_slice(&bcd::encode_device_id("013800001122").unwrap());
        buf.put_u16(42);
        if sub_package {
            buf.put_u16(5);
            buf.put_u16(2);
        }
        buf.to_vec()
    }

    #[test]
    fn parses_simple_header() {
        let mut bytes = sample_header_bytes(false, 28);
        bytes.extend(std::iter::repeat(0u8).take(28));
        let (header, consumed) = MessageHeader::parse(&bytes).unwrap();
        assert_eq!(header.message_id, 0x0200);
        assert_eq!(header.device_id, "013800001122");
        assert_eq!(header.sequence, 42);
        assert!(!header.is_sub_packaged());
        assert_eq!(header.body_length(), 28);
        assert_eq!(consumed, 12);
    }

    #[test]
    fn parses_sub_packaged_header() {
        let mut bytes = sample_header_bytes(true, 10);
        bytes.extend(std::iter::repeat(0u8).take(10));
        let (header, consumed) = MessageHeader::parse(&bytes).unwrap();
        let sub = header.sub_package.unwrap();
        assert_eq!(sub.total_packages, 5);
        assert_eq!(sub.package_no, 2);
        assert_eq!(consumed, 16);
    }

    #[test]
    fn rejects_truncated_header() {
        let bytes = [0x02, 0x00];
        assert!(matches!(MessageHeader::parse(&bytes), Err(HeaderError::Truncated { .. })));
    }

    #[test]
    fn header_round_trips_through_encode() {
        let header = MessageHeader {
            message_id: 0x0200,
            body_properties: 0,
            device_id: "013800001122".to_string(),
            sequence: 7,
            sub_package: None,
        };
        let mut dst = BytesMut::new();
        header.encode(28, &mut dst).unwrap();
        let (parsed, _) = MessageHeader::parse(&dst).unwrap();
        assert_eq!(parsed.message_id, header.message_id);
        assert_eq!(parsed.device_id, header.device_id);
        assert_eq!(parsed.body_length(), 28);
    }
}
