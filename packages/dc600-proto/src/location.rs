//! Decodes the 0x0200 location report: a fixed 28-byte block followed by
//! a walk of TLV-encoded "additional information" entries, including the
//! T/JSATL12 ADAS (0x64) and DSM (0x65) extension TLVs and the 0x70
//! multimedia-marker fallback.

use bytes::Buf;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::alarm::{decode_alarm_bitmap, AlarmSet};
use crate::bcd;
use crate::error::LocationError;

const FIXED_BLOCK_LEN: usize = 28;

const TLV_MILEAGE: u8 = 0x01;
const TLV_FUEL: u8 = 0x02;
const TLV_ADAS: u8 = 0x64;
const TLV_DSM: u8 = 0x65;
const TLV_MULTIMEDIA_MARKER: u8 = 0x70;

/// Where an ADAS/DSM event's alarm type falls, per T/JSATL12-2017's
/// reserved ranges. Only `RealAlarm` (and a nonzero vendor id, or a 0x70
/// marker) are eligible to trigger an attachment request — see
/// [`crate::command::wants_attachment_request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmClass {
    Monitoring,
    RealAlarm,
    Informational,
    Vendor,
}

pub fn classify_alarm_type(alarm_type: u8) -> AlarmClass {
    match alarm_type {
        0x00 => AlarmClass::Monitoring,
        0x01..=0x0F => AlarmClass::RealAlarm,
        0x10..=0x1F => AlarmClass::Informational,
        _ => AlarmClass::Vendor,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdasDsmSource {
    Adas,
    Dsm,
}

/// A decoded ADAS or DSM event TLV. `payload` is the remainder of the TLV
/// value past the id/status/type/level prefix this decoder understands —
/// vendor-specific tail fields (kinematics, channel, media metadata) are
/// carried opaque rather than guessed at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdasDsmEvent {
    pub source: AdasDsmSource,
    pub alarm_type: u8,
    pub class: AlarmClass,
    pub alarm_id: u32,
    pub status: u8,
    pub level: u8,
    /// The tag this event contributes to the Position's alarm set, when
    /// its class calls for one (`None` for monitoring/informational
    /// events, which carry an `event` attribute instead — see
    /// [`AdasDsmEvent::event_name`]).
    pub alarm_tag: Option<&'static str>,
    /// Human-legible name for this specific alarm/event type (e.g.
    /// `"forwardCollision"`), independent of the coarser `alarm_tag`.
    pub event_name: &'static str,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultimediaMarker {
    pub multimedia_id: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdditionalInfo {
    pub adas_dsm_events: Vec<AdasDsmEvent>,
    pub multimedia_marker: Option<MultimediaMarker>,
    /// TLVs this decoder doesn't interpret, preserved for callers that
    /// need them (mileage, fuel, etc.), keyed by TLV id.
    pub raw: Vec<(u8, Vec<u8>)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: i32,
    pub speed_kmh: f64,
    pub direction_deg: u16,
    pub time: DateTime<Utc>,
    pub alarms: AlarmSet,
    /// The raw 32-bit JT/T 808 alarm bitmap this position's `alarms` were
    /// decoded from — kept alongside the named tags so a bitmap-sourced
    /// alarm (as opposed to an ADAS/DSM TLV alarm) can still drive an
    /// attachment request using its bit index as a synthetic alarm id.
    pub alarm_bitmap: u32,
    pub status_bitmap: u32,
    /// True only when the status bitmap's location bit (bit 1) is set —
    /// the device had a GPS fix at the time of this sample. Invalid
    /// positions are still emitted, just flagged.
    pub valid: bool,
    pub additional: AdditionalInfo,
    /// Path to a completed multimedia file stored against this position,
    /// keyed by kind. Only set on the Position emitted when a sub-package
    /// assembly for that kind completes — every other Position leaves all
    /// three `None`.
    pub image_path: Option<String>,
    pub video_path: Option<String>,
    pub audio_path: Option<String>,
    /// Set when a completed multimedia file was matched back to a prior
    /// ADAS/DSM (or bitmap/marker) alarm: the alarm id, a human-legible
    /// label for its type (e.g. `"ADAS_01"`), and the fixed event name
    /// `"alarmMultimediaComplete"`.
    pub event_alarm_id: Option<u32>,
    pub event_alarm_type: Option<String>,
    pub event: Option<&'static str>,
}

const STATUS_BIT_LOCATED: u32 = 1 << 1;
const STATUS_BIT_SOUTH_LATITUDE: u32 = 1 << 2;
const STATUS_BIT_WEST_LONGITUDE: u32 = 1 << 3;

/// Named tag + friendly event name for a real-alarm (0x01-0x0F) ADAS type.
const ADAS_NAMES: &[(u8, &str, &str)] = &[
    (0x01, "accident", "forwardCollision"),
    (0x02, "laneChange", "laneDeparture"),
    (0x03, "general", "vehicleTooClose"),
    (0x04, "accident", "pedestrianCollision"),
    (0x05, "laneChange", "frequentLaneChange"),
    (0x06, "overspeed", "roadSignViolation"),
    (0x07, "general", "obstacleDetection"),
];

const DSM_NAMES: &[(u8, &str, &str)] = &[
    (0x01, "fatigueDriving", "fatigueDriving"),
    (0x02, "phoneCall", "phoneCall"),
    (0x03, "general", "smoking"),
    (0x04, "general", "distractedDriving"),
    (0x05, "general", "driverAbnormal"),
];

fn named_alarm(source: AdasDsmSource, alarm_type: u8) -> Option<(&'static str, &'static str)> {
    let table = match source {
        AdasDsmSource::Adas => ADAS_NAMES,
        AdasDsmSource::Dsm => DSM_NAMES,
    };
    table.iter().find(|(t, _, _)| *t == alarm_type).map(|(_, tag, name)| (*tag, *name))
}

/// Decodes an ADAS (0x64) or DSM (0x65) TLV value. Per T/JSATL12 these
/// begin with a 4-byte alarm id, a 1-byte status (0 = start, 1 = end), a
/// 1-byte alarm type, and a 1-byte level; anything past that is
/// vendor/event-specific kinematics/channel/media metadata kept as an
/// opaque tail.
fn decode_adas_dsm(source: AdasDsmSource, value: &[u8]) -> Option<AdasDsmEvent> {
    if value.len() < 7 {
        tracing::debug!(len = value.len(), "adas/dsm TLV too short to carry a header, skipping");
        return None;
    }
    let alarm_id = u32::from_be_bytes([value[0], value[1], value[2], value[3]]);
    let status = value[4];
    let alarm_type = value[5];
    let level = value[6];
    let payload = value[7..].to_vec();
    let class = classify_alarm_type(alarm_type);

    let (alarm_tag, event_name) = match class {
        AlarmClass::RealAlarm => match named_alarm(source, alarm_type) {
            Some((tag, name)) => (Some(tag), name),
            None => (Some("general"), "unknownRealAlarm"),
        },
        AlarmClass::Vendor => (Some("general"), "vendorAlarm"),
        AlarmClass::Monitoring | AlarmClass::Informational => (None, "unclassifiedEvent"),
    };

    Some(AdasDsmEvent {
        source,
        alarm_type,
        class,
        alarm_id,
        status,
        level,
        alarm_tag,
        event_name,
        payload,
    })
}

fn decode_multimedia_marker(value: &[u8]) -> Option<MultimediaMarker> {
    if value.len() < 4 {
        tracing::debug!(len = value.len(), "0x70 multimedia marker TLV too short, skipping");
        return None;
    }
    Some(MultimediaMarker { multimedia_id: u32::from_be_bytes([value[0], value[1], value[2], value[3]]) })
}

/// Walks the TLV stream that follows the fixed location block. Unknown
/// or truncated entries are logged and skipped rather than aborting the
/// walk — the caller still gets whatever was decodable. Any ADAS/DSM
/// event carrying a named tag is folded into `alarms` alongside the
/// bitmap-derived tags, additively.
fn walk_additional_info(mut buf: &[u8], alarms: &mut AlarmSet) -> AdditionalInfo {
    let mut info = AdditionalInfo::default();
    while !buf.is_empty() {
        if buf.len() < 2 {
            tracing::debug!("trailing byte after last TLV, ignoring");
            break;
        }
        let id = buf[0];
        let len = buf[1] as usize;
        if buf.len() < 2 + len {
            tracing::debug!(id = format!("{id:#04x}"), declared = len, have = buf.len() - 2, "TLV value truncated, stopping walk");
            break;
        }
        let value = &buf[2..2 + len];
        match id {
            TLV_ADAS => {
                if let Some(event) = decode_adas_dsm(AdasDsmSource::Adas, value) {
                    if let Some(tag) = event.alarm_tag {
                        alarms.insert(tag);
                    }
                    info.adas_dsm_events.push(event);
                }
            }
            TLV_DSM => {
                if let Some(event) = decode_adas_dsm(AdasDsmSource::Dsm, value) {
                    if let Some(tag) = event.alarm_tag {
                        alarms.insert(tag);
                    }
                    info.adas_dsm_events.push(event);
                }
            }
            TLV_MULTIMEDIA_MARKER => {
                info.multimedia_marker = decode_multimedia_marker(value);
            }
            _ => {
                info.raw.push((id, value.to_vec()));
            }
        }
        buf = &buf[2 + len..];
    }
    info
}

/// Decodes just the fixed 28-byte block, leaving `additional` empty.
/// Shared by [`decode_location`] and the multimedia upload prefix in
/// [`crate::media`], which embeds the same fixed block ahead of raw
/// image/video bytes that must never be mistaken for TLVs.
pub fn decode_fixed_prefix(body: &[u8], tz: &Tz) -> Result<Position, LocationError> {
    if body.len() < FIXED_BLOCK_LEN {
        return Err(LocationError::FixedBlockTruncated { have: body.len() });
    }

    let mut cursor = &body[..FIXED_BLOCK_LEN];
    let alarm_bitmap = cursor.get_u32();
    let status_bitmap = cursor.get_u32();
    let raw_lat = cursor.get_u32();
    let raw_lon = cursor.get_u32();
    let altitude_m = cursor.get_u16() as i32;
    let raw_speed = cursor.get_u16();
    let direction_deg = cursor.get_u16();
    let time_bytes = &cursor[..6];

    let mut alarms = AlarmSet::new();
    decode_alarm_bitmap(alarm_bitmap, &mut alarms);

    let time = interpret_timestamp(time_bytes, tz).unwrap_or_else(|_| Utc::now());

    let mut latitude = raw_lat as f64 / 1_000_000.0;
    if status_bitmap & STATUS_BIT_SOUTH_LATITUDE != 0 {
        latitude = -latitude;
    }
    let mut longitude = raw_lon as f64 / 1_000_000.0;
    if status_bitmap & STATUS_BIT_WEST_LONGITUDE != 0 {
        longitude = -longitude;
    }

    Ok(Position {
        latitude,
        longitude,
        altitude_m,
        speed_kmh: raw_speed as f64 / 10.0,
        direction_deg,
        time,
        alarms,
        alarm_bitmap,
        status_bitmap,
        valid: status_bitmap & STATUS_BIT_LOCATED != 0,
        additional: AdditionalInfo::default(),
        image_path: None,
        video_path: None,
        audio_path: None,
        event_alarm_id: None,
        event_alarm_type: None,
        event: None,
    })
}

/// Decodes the fixed 28-byte location block plus the trailing TLV walk.
/// `tz` is the device's configured local timezone — the on-wire BCD
/// timestamp is local time, converted here to UTC for storage.
pub fn decode_location(body: &[u8], tz: &Tz) -> Result<Position, LocationError> {
    let mut position = decode_fixed_prefix(body, tz)?;
    position.additional = walk_additional_info(&body[FIXED_BLOCK_LEN..], &mut position.alarms);
    Ok(position)
}

/// Byte length of the fixed block, exposed so callers splitting a buffer
/// that embeds it (multimedia upload bodies) know how much to skip.
pub const fn fixed_prefix_len() -> usize {
    FIXED_BLOCK_LEN
}

/// Interprets a 6-byte BCD timestamp as wall-clock time in `tz`,
/// returning it normalized to UTC.
pub fn interpret_timestamp(bytes: &[u8], tz: &Tz) -> Result<DateTime<Utc>, crate::error::BcdError> {
    let decoded = bcd::decode_timestamp(bytes)?;
    let local = tz
        .with_ymd_and_hms(
            decoded.year as i32,
            decoded.month,
            decoded.day,
            decoded.hour,
            decoded.minute,
            decoded.second,
        )
        .single()
        .unwrap_or_else(|| tz.from_utc_datetime(&chrono::NaiveDateTime::default()));
    Ok(local.with_timezone(&Utc))
}

/// Decodes a 0x0704 batch upload: a count-prefixed sequence of
/// independent location reports, each laid out exactly like a 0x0200
/// body. Every entry is decoded and classified on its own — alarms from
/// one entry are never folded into another's [`AlarmSet`].
pub fn decode_batch_upload(body: &[u8], tz: &Tz) -> Vec<Position> {
    if body.len() < 3 {
        tracing::warn!(len = body.len(), "0x0704 batch upload too short for its header, ignoring");
        return Vec::new();
    }
    let mut cursor = &body[..];
    let count = cursor.get_u16();
    let _upload_type = cursor.get_u8(); // 0 = normal, 1 = re-upload (blind spot fill)

    let mut positions = Vec::with_capacity(count as usize);
    for _ in 0..count {
        if cursor.len() < 2 {
            tracing::warn!("batch upload truncated before an entry's length prefix");
            break;
        }
        let entry_len = cursor.get_u16() as usize;
        if cursor.len() < entry_len {
            tracing::warn!(entry_len, have = cursor.len(), "batch upload entry truncated, stopping");
            break;
        }
        let entry = &cursor[..entry_len];
        match decode_location(entry, tz) {
            Ok(position) => positions.push(position),
            Err(e) => tracing::warn!(error = %e, "dropping undecodable batch upload entry"),
        }
        cursor.advance(entry_len);
    }
    positions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_block(alarm_bitmap: u32, time: [u8; 6]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&alarm_bitmap.to_be_bytes());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&(23_456_789u32).to_be_bytes());
        buf.extend_from_slice(&(113_456_789u32).to_be_bytes());
        buf.extend_from_slice(&100u16.to_be_bytes());
        buf.extend_from_slice(&550u16.to_be_bytes());
        buf.extend_from_slice(&90u16.to_be_bytes());
        buf.extend_from_slice(&time);
        buf
    }

    #[test]
    fn decodes_fixed_block_fields() {
        let body = fixed_block(1 << 1, [0x24, 0x01, 0x01, 0x00, 0x00, 0x00]);
        let pos = decode_location(&body, &chrono_tz::UTC).unwrap();
        assert!(pos.alarms.contains("overspeed"));
        assert_eq!(pos.altitude_m, 100);
        assert_eq!(pos.speed_kmh, 55.0);
        assert_eq!(pos.direction_deg, 90);
    }

    #[test]
    fn status_bit_one_drives_validity() {
        let invalid = decode_location(&fixed_block(0, [0x24, 0x01, 0x01, 0x00, 0x00, 0x00]), &chrono_tz::UTC).unwrap();
        assert!(!invalid.valid);

        let mut body = fixed_block(0, [0x24, 0x01, 0x01, 0x00, 0x00, 0x00]);
        body[4..8].copy_from_slice(&(1u32 << 1).to_be_bytes());
        let located = decode_location(&body, &chrono_tz::UTC).unwrap();
        assert!(located.valid);
    }

    #[test]
    fn hemisphere_bits_fold_into_signed_coordinates() {
        let mut body = fixed_block(0, [0x24, 0x01, 0x01, 0x00, 0x00, 0x00]);
        body[4..8].copy_from_slice(&((1u32 << 2) | (1u32 << 3)).to_be_bytes()); // south + west
        let pos = decode_location(&body, &chrono_tz::UTC).unwrap();
        assert!(pos.latitude < 0.0);
        assert!(pos.longitude < 0.0);
    }

    #[test]
    fn truncated_fixed_block_is_hard_error() {
        let body = vec![0u8; 10];
        assert!(matches!(
            decode_location(&body, &chrono_tz::UTC),
            Err(LocationError::FixedBlockTruncated { have: 10 })
        ));
    }

    #[test]
    fn unknown_tlv_is_skipped_not_fatal() {
        let mut body = fixed_block(0, [0x24, 0x01, 0x01, 0x00, 0x00, 0x00]);
        body.push(0xEE); // unknown TLV id
        body.push(2);
        body.extend_from_slice(&[0x01, 0x02]);
        let pos = decode_location(&body, &chrono_tz::UTC).unwrap();
        assert_eq!(pos.additional.raw, vec![(0xEE, vec![0x01, 0x02])]);
    }

    fn adas_dsm_tlv(id: u8, alarm_id: u32, status: u8, alarm_type: u8, level: u8) -> Vec<u8> {
        let mut tlv = Vec::new();
        tlv.push(id);
        tlv.push(7); // alarm id(4) + status(1) + type(1) + level(1)
        tlv.extend_from_slice(&alarm_id.to_be_bytes());
        tlv.push(status);
        tlv.push(alarm_type);
        tlv.push(level);
        tlv
    }

    #[test]
    fn adas_real_alarm_is_classified() {
        let mut body = fixed_block(0, [0x24, 0x01, 0x01, 0x00, 0x00, 0x00]);
        body.extend_from_slice(&adas_dsm_tlv(TLV_ADAS, 42, 0, 0x01, 2));
        let pos = decode_location(&body, &chrono_tz::UTC).unwrap();
        let event = &pos.additional.adas_dsm_events[0];
        assert_eq!(event.class, AlarmClass::RealAlarm);
        assert_eq!(event.alarm_id, 42);
        assert_eq!(event.event_name, "forwardCollision");
        assert!(pos.alarms.contains("accident"));
    }

    #[test]
    fn adas_forward_collision_matches_s2_scenario() {
        // T/JSATL12 0x64 TLV: alarm id=2, status=0 (start), type=0x01
        // (forward collision), level=2 — the literal S2 scenario input.
        let mut body = fixed_block(0, [0x25, 0x10, 0x25, 0x05, 0x42, 0x18]);
        body.extend_from_slice(&adas_dsm_tlv(TLV_ADAS, 2, 0, 0x01, 2));
        let pos = decode_location(&body, &chrono_tz::UTC).unwrap();
        assert!(pos.alarms.contains("accident"));
        let event = &pos.additional.adas_dsm_events[0];
        assert_eq!(event.event_name, "forwardCollision");
        assert_eq!(event.alarm_id, 2);
        assert_eq!(event.class, AlarmClass::RealAlarm);
    }

    #[test]
    fn monitoring_adas_event_adds_no_tag() {
        let mut body = fixed_block(0, [0x24, 0x01, 0x01, 0x00, 0x00, 0x00]);
        body.extend_from_slice(&adas_dsm_tlv(TLV_ADAS, 1, 0, 0x00, 0));
        let pos = decode_location(&body, &chrono_tz::UTC).unwrap();
        assert!(pos.alarms.is_empty());
        assert_eq!(pos.additional.adas_dsm_events[0].class, AlarmClass::Monitoring);
    }

    #[test]
    fn vendor_adas_type_still_requests_attachment() {
        let mut body = fixed_block(0, [0x24, 0x01, 0x01, 0x00, 0x00, 0x00]);
        body.extend_from_slice(&adas_dsm_tlv(TLV_ADAS, 9, 0, 0xE1, 0));
        let pos = decode_location(&body, &chrono_tz::UTC).unwrap();
        let event = &pos.additional.adas_dsm_events[0];
        assert_eq!(event.class, AlarmClass::Vendor);
        assert!(pos.alarms.contains("general"));
    }

    #[test]
    fn batch_upload_decodes_independent_entries() {
        let entry_a = fixed_block(1 << 1, [0x24, 0x01, 0x01, 0x00, 0x00, 0x00]);
        let entry_b = fixed_block(1 << 29, [0x24, 0x01, 0x01, 0x00, 0x00, 0x01]);

        let mut body = Vec::new();
        body.extend_from_slice(&2u16.to_be_bytes());
        body.push(0);
        body.extend_from_slice(&(entry_a.len() as u16).to_be_bytes());
        body.extend_from_slice(&entry_a);
        body.extend_from_slice(&(entry_b.len() as u16).to_be_bytes());
        body.extend_from_slice(&entry_b);

        let positions = decode_batch_upload(&body, &chrono_tz::UTC);
        assert_eq!(positions.len(), 2);
        assert!(positions[0].alarms.contains("overspeed"));
        assert!(!positions[0].alarms.contains("collision"));
        assert!(positions[1].alarms.contains("collision"));
    }

    #[test]
    fn truncated_trailing_tlv_still_yields_position() {
        let mut body = fixed_block(0, [0x24, 0x01, 0x01, 0x00, 0x00, 0x00]);
        body.push(TLV_ADAS);
        body.push(10); // declares 10 bytes but only 2 follow
        body.extend_from_slice(&[0x01, 0x02]);
        let pos = decode_location(&body, &chrono_tz::UTC).unwrap();
        assert!(pos.additional.adas_dsm_events.is_empty());
    }
}
