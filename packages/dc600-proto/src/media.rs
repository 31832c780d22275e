//! Multimedia body layouts: the 0x0800 event-upload announcement, the
//! 0x0801 binary upload (sub-packaged across frames by the header layer),
//! the 0x0805 camera-command response, and the 0x1210 JT/T 1078
//! attachment file list used for alarm-triggered attachment upload.

use bytes::Buf;
use chrono_tz::Tz;

use crate::error::LocationError;
use crate::location::{self, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultimediaType {
    Image,
    Audio,
    Video,
    Unknown(u8),
}

impl From<u8> for MultimediaType {
    fn from(b: u8) -> Self {
        match b {
            0 => MultimediaType::Image,
            1 => MultimediaType::Audio,
            2 => MultimediaType::Video,
            other => MultimediaType::Unknown(other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultimediaFormat {
    Jpeg,
    Tif,
    Mp3,
    Wav,
    Wmv,
    Unknown(u8),
}

impl From<u8> for MultimediaFormat {
    fn from(b: u8) -> Self {
        match b {
            0 => MultimediaFormat::Jpeg,
            1 => MultimediaFormat::Tif,
            2 => MultimediaFormat::Mp3,
            3 => MultimediaFormat::Wav,
            4 => MultimediaFormat::Wmv,
            other => MultimediaFormat::Unknown(other),
        }
    }
}

/// The shared prefix of both the 0x0800 announcement and the 0x0801
/// binary upload: which multimedia id, what kind of file, which event
/// triggered it, and where the vehicle was.
#[derive(Debug, Clone, PartialEq)]
pub struct MultimediaPrefix {
    pub multimedia_id: u32,
    pub media_type: MultimediaType,
    pub format: MultimediaFormat,
    pub event_item: u8,
    pub channel_id: u8,
    pub position: Position,
}

const PREFIX_FIXED_LEN: usize = 4 + 1 + 1 + 1 + 1;

fn decode_prefix(body: &[u8], tz: &Tz) -> Result<(MultimediaPrefix, usize), LocationError> {
    let mut cursor = &body[..];
    let multimedia_id = cursor.get_u32();
    let media_type = MultimediaType::from(cursor.get_u8());
    let format = MultimediaFormat::from(cursor.get_u8());
    let event_item = cursor.get_u8();
    let channel_id = cursor.get_u8();

    let position = location::decode_fixed_prefix(cursor, tz)?;
    let consumed = PREFIX_FIXED_LEN + location::fixed_prefix_len();

    Ok((
        MultimediaPrefix { multimedia_id, media_type, format, event_item, channel_id, position },
        consumed,
    ))
}

/// Decodes a 0x0800 multimedia event announcement. The body is just the
/// prefix; there is no trailing payload.
pub fn decode_event_announcement(body: &[u8], tz: &Tz) -> Result<MultimediaPrefix, LocationError> {
    let (prefix, _) = decode_prefix(body, tz)?;
    Ok(prefix)
}

/// A decoded 0x0801 upload frame: the prefix plus whatever chunk of file
/// bytes this particular sub-package carried. Whether this chunk
/// completes the file is a header-level fact (`package_no ==
/// total_packages`), not something this decoder judges.
#[derive(Debug, Clone, PartialEq)]
pub struct MultimediaUploadChunk {
    pub prefix: MultimediaPrefix,
    pub data: Vec<u8>,
}

pub fn decode_upload_chunk(body: &[u8], tz: &Tz) -> Result<MultimediaUploadChunk, LocationError> {
    let (prefix, consumed) = decode_prefix(body, tz)?;
    Ok(MultimediaUploadChunk { prefix, data: body[consumed..].to_vec() })
}

/// The 0x0805 camera-command response: a result code plus however many
/// multimedia ids the shot produced (normally one, but the command
/// allows a burst).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraResponse {
    pub result: u8,
    pub multimedia_ids: Vec<u32>,
}

pub fn decode_camera_response(body: &[u8]) -> CameraResponse {
    if body.is_empty() {
        return CameraResponse { result: 0xFF, multimedia_ids: Vec::new() };
    }
    let mut cursor = &body[..];
    let result = cursor.get_u8();
    let count = if cursor.len() >= 2 { cursor.get_u16() } else { 0 };
    let mut multimedia_ids = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if cursor.len() < 4 {
            break;
        }
        multimedia_ids.push(cursor.get_u32());
    }
    CameraResponse { result, multimedia_ids }
}

/// One file entry in a JT/T 1078 attachment file list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentFileEntry {
    pub file_name: String,
    pub file_size: u32,
    pub kind: u8,
    pub channel: u8,
    pub event_code: u8,
}

/// A decoded 0x1210 attachment file list: which alarm this set of files
/// belongs to (the terminal id, 16-byte alarm flag, and ASCII alarm
/// number, mirroring what a 0x9208 request sent out) and the files the
/// device is about to push over the JT/T 1078 media channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentFileList {
    pub terminal_id: [u8; 7],
    pub alarm_flag: [u8; 16],
    pub alarm_number: String,
    pub files: Vec<AttachmentFileEntry>,
}

const TERMINAL_ID_LEN: usize = 7;
const ALARM_FLAG_LEN: usize = 16;
const ALARM_NUMBER_LEN: usize = 32;
const RESERVED_LEN: usize = 16;

pub fn decode_attachment_file_list(body: &[u8]) -> Option<AttachmentFileList> {
    const FIXED_LEN: usize = TERMINAL_ID_LEN + ALARM_FLAG_LEN + ALARM_NUMBER_LEN + RESERVED_LEN + 1;
    if body.len() < FIXED_LEN {
        tracing::debug!(len = body.len(), "0x1210 body too short for its fixed prefix");
        return None;
    }

    let mut terminal_id = [0u8; TERMINAL_ID_LEN];
    terminal_id.copy_from_slice(&body[..TERMINAL_ID_LEN]);

    let mut offset = TERMINAL_ID_LEN;
    let mut alarm_flag = [0u8; ALARM_FLAG_LEN];
    alarm_flag.copy_from_slice(&body[offset..offset + ALARM_FLAG_LEN]);
    offset += ALARM_FLAG_LEN;

    let number_bytes = &body[offset..offset + ALARM_NUMBER_LEN];
    let alarm_number = String::from_utf8_lossy(number_bytes)
        .trim_end_matches('\0')
        .to_string();
    offset += ALARM_NUMBER_LEN;

    offset += RESERVED_LEN;

    let mut cursor = &body[offset..];
    let file_count = cursor.get_u8();
    let mut files = Vec::with_capacity(file_count as usize);
    for _ in 0..file_count {
        if cursor.is_empty() {
            break;
        }
        let name_len = cursor.get_u8() as usize;
        if cursor.len() < name_len + 4 + 3 {
            tracing::debug!("attachment file entry truncated, stopping walk");
            break;
        }
        let name = String::from_utf8_lossy(&cursor[..name_len]).to_string();
        cursor.advance(name_len);
        let file_size = cursor.get_u32();
        let kind = cursor.get_u8();
        let channel = cursor.get_u8();
        let event_code = cursor.get_u8();
        files.push(AttachmentFileEntry { file_name: name, file_size, kind, channel, event_code });
    }

    Some(AttachmentFileList { terminal_id, alarm_flag, alarm_number, files })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_prefix_body(multimedia_id: u32, tail: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&multimedia_id.to_be_bytes());
        body.push(0); // image
        body.push(0); // jpeg
        body.push(1); // event item
        body.push(0); // channel
        body.extend_from_slice(&[0u8; 28]); // fixed location block, all zero
        body.extend_from_slice(tail);
        body
    }

    #[test]
    fn event_announcement_decodes_ids() {
        let body = encode_prefix_body(7, &[]);
        let decoded = decode_event_announcement(&body, &chrono_tz::UTC).unwrap();
        assert_eq!(decoded.multimedia_id, 7);
        assert_eq!(decoded.media_type, MultimediaType::Image);
    }

    #[test]
    fn upload_chunk_carries_trailing_bytes() {
        let body = encode_prefix_body(7, &[0xAA, 0xBB, 0xCC]);
        let chunk = decode_upload_chunk(&body, &chrono_tz::UTC).unwrap();
        assert_eq!(chunk.data, vec![0xAA, 0xBB, 0xCC]);
    }

    #[test]
    fn camera_response_decodes_multiple_ids() {
        let mut body = vec![0u8]; // success
        body.extend_from_slice(&2u16.to_be_bytes());
        body.extend_from_slice(&7u32.to_be_bytes());
        body.extend_from_slice(&8u32.to_be_bytes());
        let response = decode_camera_response(&body);
        assert_eq!(response.multimedia_ids, vec![7, 8]);
    }

    #[test]
    fn attachment_file_list_round_trip() {
        let mut body = vec![0x12; 7]; // terminal id
        body.extend_from_slice(&[0xAB; 16]); // alarm flag
        let mut number = b"000123456789".to_vec();
        number.resize(32, 0);
        body.extend_from_slice(&number);
        body.extend_from_slice(&[0u8; 16]); // reserved
        body.push(1); // file count
        body.push(b"a.jpg".len() as u8);
        body.extend_from_slice(b"a.jpg");
        body.extend_from_slice(&1234u32.to_be_bytes());
        body.push(0); // kind
        body.push(1); // channel
        body.push(2); // event code

        let list = decode_attachment_file_list(&body).unwrap();
        assert_eq!(list.terminal_id, [0x12; 7]);
        assert_eq!(list.alarm_number, "000123456789");
        assert_eq!(list.files.len(), 1);
        assert_eq!(list.files[0].file_name, "a.jpg");
        assert_eq!(list.files[0].file_size, 1234);
        assert_eq!(list.files[0].kind, 0);
        assert_eq!(list.files[0].channel, 1);
        assert_eq!(list.files[0].event_code, 2);
    }
}
