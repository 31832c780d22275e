//! Alarm bitmap decoding and the additive [`AlarmSet`] tag collection.
//!
//! A single location report's 32-bit alarm bitmap can have several bits
//! set at once (e.g. overspeed *and* fatigue in the same fix); a batch
//! upload can carry several location reports for the same device in one
//! message. `AlarmSet` exists so callers accumulate tags across all of
//! that without ever clobbering a tag a previous bit or previous entry
//! already set — invariant 4 from the data model.

use std::collections::BTreeSet;

/// Named, human-legible alarm tags. Stored as a sorted set so two
/// decodes of the same bitmap always compare equal regardless of which
/// bit was walked first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AlarmSet {
    tags: BTreeSet<&'static str>,
}

impl AlarmSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, tag: &'static str) {
        self.tags.insert(tag);
    }

    pub fn merge(&mut self, other: &AlarmSet) {
        for tag in &other.tags {
            self.tags.insert(tag);
        }
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tags.iter().copied()
    }

    /// Comma-separated rendering, the form this gets logged and sinked in.
    pub fn to_csv(&self) -> String {
        self.tags.iter().copied().collect::<Vec<_>>().join(",")
    }
}

/// bit index -> tag name, per the JT/T 808 location-report alarm bitmap.
/// Several bits share a tag (13 and 18 both mean some flavor of
/// overspeed) — `AlarmSet` is a set, so that's a no-op, not a duplicate.
const ALARM_BITS: &[(u32, &str)] = &[
    (0, "sos"),
    (1, "overspeed"),
    (2, "fault"),
    (3, "general"),
    (4, "gpsModuleFault"),
    (5, "gpsAntennaDisconnected"),
    (6, "gpsAntennaShort"),
    (7, "mainPowerUnderVoltage"),
    (8, "mainPowerOff"),
    (9, "lcdFault"),
    (10, "ttsFault"),
    (11, "cameraFault"),
    (12, "icCardFault"),
    (13, "overspeed"),
    (14, "fatigueDriving"),
    (18, "overspeed"),
    (19, "idle"),
    (20, "geofenceEnter"),
    (21, "geofenceExit"),
    (22, "general"),
    (23, "general"),
    (24, "vssFault"),
    (25, "oilAbnormal"),
    (26, "vehicleStolen"),
    (27, "illegalIgnition"),
    (28, "illegalDisplacement"),
    (29, "collision"),
    (30, "rollover"),
    (31, "illegalDoorOpen"),
];

/// Bitmap bits severe enough to warrant the same image-capture +
/// attachment-request treatment as an ADAS/DSM real alarm, even though
/// they come from the older JT/T 808 base bitmap rather than a T/JSATL12
/// TLV. Everything else in the bitmap (overspeed, device faults, geofence
/// crossings, idle, …) is informational only.
pub const REAL_SAFETY_BITS: &[u32] = &[0, 26, 29, 30, 31]; // sos, vehicleStolen, collision, rollover, illegalDoorOpen

/// The lowest bit in `bitmap` that's severe enough to request an
/// attachment for, if any.
pub fn lowest_real_safety_bit(bitmap: u32) -> Option<u32> {
    REAL_SAFETY_BITS.iter().copied().filter(|&bit| bitmap & (1 << bit) != 0).min()
}

/// Decodes the 32-bit alarm bitmap into named tags, additively inserting
/// into `into` rather than returning a fresh set so batch-upload callers
/// can fold several reports together.
pub fn decode_alarm_bitmap(bitmap: u32, into: &mut AlarmSet) {
    for &(bit, tag) in ALARM_BITS {
        if bitmap & (1 << bit) != 0 {
            into.insert(tag);
        }
    }
}
