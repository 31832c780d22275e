//! Cross-message correlation between an ADAS/DSM alarm event and the
//! multimedia file(s) it triggers, so a 0x0801 upload that arrives after
//! its 0x0800/0x0200 alarm can still be matched back to the alarm that
//! caused it, even when the device tells us which media ids to expect
//! (0x0805) rather than reusing the alarm id as the media id.
//!
//! Conceptually keyed by (device id, alarm id); in practice each
//! [`crate::session::DeviceSession`] already belongs to exactly one
//! device, so the device id half of the key is implicit in which map
//! this entry lives in.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dc600_proto::location::AlarmClass;

const TTL: Duration = Duration::from_secs(60 * 60);
/// Fraction of new-packet arrivals that trigger an expiry sweep, rather
/// than sweeping on every packet.
const SWEEP_PROBABILITY: f64 = 0.10;

#[derive(Debug, Clone)]
pub struct EventMediaCorrelation {
    pub alarm_id: u32,
    /// Human-legible label for the alarm that created this entry, e.g.
    /// `"ADAS_01"` or `"DSM_02"`. Stamped onto the Position a correlated
    /// upload completes.
    pub alarm_type_label: String,
    pub class: AlarmClass,
    pub created_at: Instant,
    /// Media ids this alarm is expecting, either because a 0x0805 camera
    /// response enumerated them or because a 0x70/bitmap fallback used
    /// its own id as the expected media id.
    pub expected_media_ids: Vec<u32>,
    pub received_media_paths: Vec<String>,
    /// ASCII alarm number sent out in this alarm's 0x9208 request, e.g.
    /// `"ALM-{device}-{alarmId}-{epochMs}"` — how a later 0x1210 attachment
    /// file list (which carries no numeric alarm id) is joined back here.
    pub alarm_number: Option<String>,
    /// File names/sizes a 0x1210 attachment file list announced for this
    /// alarm, recorded ahead of the actual JT/T 1078 uploads.
    pub expected_files: Vec<(String, u32)>,
}

impl EventMediaCorrelation {
    fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.created_at) > TTL
    }
}

/// What to stamp onto a Position whose completed multimedia file was
/// matched back to a prior alarm.
pub struct MediaCompletionStamp {
    pub alarm_id: u32,
    pub alarm_type_label: String,
}

#[derive(Debug, Default)]
pub struct CorrelationTable {
    entries: HashMap<u32, EventMediaCorrelation>,
    max_entries: usize,
    last_alarm_id: Option<u32>,
}

impl CorrelationTable {
    pub fn new(max_entries: usize) -> Self {
        Self { entries: HashMap::new(), max_entries, last_alarm_id: None }
    }

    /// Records that `alarm_id` occurred, so a later multimedia upload
    /// naming it can be joined up. Evicts the oldest entry if the table
    /// is already at its cap.
    pub fn record_alarm(&mut self, alarm_id: u32, alarm_type_label: impl Into<String>, class: AlarmClass) {
        let alarm_type_label = alarm_type_label.into();
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&alarm_id) {
            if let Some(oldest) = self
                .entries
                .iter()
                .min_by_key(|(_, v)| v.created_at)
                .map(|(k, _)| *k)
            {
                tracing::debug!(alarm_id = oldest, "correlation table full, evicting oldest entry");
                self.entries.remove(&oldest);
            }
        }
        self.entries
            .entry(alarm_id)
            .and_modify(|e| {
                e.class = class;
                e.alarm_type_label = alarm_type_label.clone();
            })
            .or_insert(EventMediaCorrelation {
                alarm_id,
                alarm_type_label,
                class,
                created_at: Instant::now(),
                expected_media_ids: Vec::new(),
                received_media_paths: Vec::new(),
                alarm_number: None,
                expected_files: Vec::new(),
            });
        self.last_alarm_id = Some(alarm_id);
    }

    /// Records the ASCII alarm number a 0x9208 request carried for
    /// `alarm_id`, so a later 0x1210 attachment file list can find its
    /// way back to this entry.
    pub fn set_alarm_number(&mut self, alarm_id: u32, alarm_number: impl Into<String>) {
        if let Some(entry) = self.entries.get_mut(&alarm_id) {
            entry.alarm_number = Some(alarm_number.into());
        }
    }

    /// Records the file names/sizes a 0x1210 attachment file list
    /// announced against whichever entry carries `alarm_number`. Returns
    /// whether a matching, unexpired entry was found.
    pub fn record_expected_files(&mut self, alarm_number: &str, files: Vec<(String, u32)>) -> bool {
        let now = Instant::now();
        match self
            .entries
            .values_mut()
            .find(|e| e.alarm_number.as_deref() == Some(alarm_number) && !e.is_expired(now))
        {
            Some(entry) => {
                entry.expected_files = files;
                true
            }
            None => false,
        }
    }

    /// Joins a multimedia id to a previously recorded alarm, if one
    /// exists and has not expired.
    pub fn attach_media(&mut self, alarm_id: u32, multimedia_id: u32) -> bool {
        match self.entries.get_mut(&alarm_id) {
            Some(entry) if !entry.is_expired(Instant::now()) => {
                entry.expected_media_ids.push(multimedia_id);
                true
            }
            _ => false,
        }
    }

    /// The most recently recorded alarm id, used to join a 0x0805 camera
    /// response (which carries no alarm context of its own) back to
    /// whichever alarm most recently asked the device to shoot footage.
    pub fn last_alarm_id(&self) -> Option<u32> {
        self.last_alarm_id
    }

    /// Marks `multimedia_id` as received against whichever alarm expects
    /// it, appends `path` to that entry's received list, and returns the
    /// label to stamp onto the completed Position. Falls back to treating
    /// `multimedia_id` itself as an alarm id — the convention a 0x70
    /// marker or bitmap-only alarm relies on when no 0x0805 enumeration
    /// ever arrives.
    pub fn mark_received(&mut self, multimedia_id: u32, path: String) -> Option<MediaCompletionStamp> {
        let now = Instant::now();
        let alarm_id = self
            .entries
            .iter()
            .find(|(_, e)| !e.is_expired(now) && e.expected_media_ids.contains(&multimedia_id))
            .map(|(k, _)| *k)
            .or_else(|| {
                self.entries
                    .get(&multimedia_id)
                    .filter(|e| !e.is_expired(now))
                    .map(|_| multimedia_id)
            })?;

        let entry = self.entries.get_mut(&alarm_id)?;
        entry.received_media_paths.push(path);
        Some(MediaCompletionStamp { alarm_id: entry.alarm_id, alarm_type_label: entry.alarm_type_label.clone() })
    }

    pub fn get(&self, alarm_id: u32) -> Option<&EventMediaCorrelation> {
        self.entries.get(&alarm_id)
    }

    /// Probabilistic sweep: most packet arrivals are a no-op here, but
    /// roughly one in ten pays down the expired backlog so a quiet
    /// device's correlation table does not grow without bound.
    pub fn maybe_sweep(&mut self) {
        if rand::random::<f64>() < SWEEP_PROBABILITY {
            self.sweep();
        }
    }

    /// Unconditional sweep, run once more when a session is torn down.
    pub fn sweep(&mut self) {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(removed, "swept expired event/media correlations");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attaches_media_to_a_recorded_alarm() {
        let mut table = CorrelationTable::new(16);
        table.record_alarm(42, "ADAS_01", AlarmClass::RealAlarm);
        assert!(table.attach_media(42, 7));
        assert_eq!(table.get(42).unwrap().expected_media_ids, vec![7]);
    }

    #[test]
    fn unknown_alarm_id_fails_to_attach() {
        let mut table = CorrelationTable::new(16);
        assert!(!table.attach_media(99, 7));
    }

    #[test]
    fn eviction_keeps_table_within_cap() {
        let mut table = CorrelationTable::new(2);
        table.record_alarm(1, "ADAS_01", AlarmClass::RealAlarm);
        std::thread::sleep(std::time::Duration::from_millis(2));
        table.record_alarm(2, "ADAS_01", AlarmClass::RealAlarm);
        std::thread::sleep(std::time::Duration::from_millis(2));
        table.record_alarm(3, "ADAS_01", AlarmClass::RealAlarm);
        assert_eq!(table.len(), 2);
        assert!(table.get(1).is_none());
    }

    #[test]
    fn mark_received_matches_by_expected_media_id() {
        let mut table = CorrelationTable::new(16);
        table.record_alarm(42, "ADAS_01", AlarmClass::RealAlarm);
        for id in [123, 124, 125, 126] {
            table.attach_media(42, id);
        }
        let stamp = table.mark_received(124, "/media/d/124.wmv".to_string()).unwrap();
        assert_eq!(stamp.alarm_id, 42);
        assert_eq!(stamp.alarm_type_label, "ADAS_01");
        assert_eq!(table.get(42).unwrap().received_media_paths, vec!["/media/d/124.wmv"]);
    }

    #[test]
    fn mark_received_falls_back_to_id_equals_alarm_id_convention() {
        let mut table = CorrelationTable::new(16);
        table.record_alarm(7, "MARKER", AlarmClass::RealAlarm);
        let stamp = table.mark_received(7, "/media/d/7.jpg".to_string()).unwrap();
        assert_eq!(stamp.alarm_id, 7);
    }

    #[test]
    fn mark_received_is_none_for_an_unmatched_media_id() {
        let mut table = CorrelationTable::new(16);
        assert!(table.mark_received(999, "/media/d/999.jpg".to_string()).is_none());
    }

    #[test]
    fn record_expected_files_joins_by_alarm_number() {
        let mut table = CorrelationTable::new(16);
        table.record_alarm(42, "ADAS_01", AlarmClass::RealAlarm);
        table.set_alarm_number(42, "ALM-dev-42-1000");
        let joined = table.record_expected_files(
            "ALM-dev-42-1000",
            vec![("a.jpg".to_string(), 1234)],
        );
        assert!(joined);
        assert_eq!(table.get(42).unwrap().expected_files, vec![("a.jpg".to_string(), 1234)]);
    }

    #[test]
    fn record_expected_files_fails_for_unknown_alarm_number() {
        let mut table = CorrelationTable::new(16);
        table.record_alarm(42, "ADAS_01", AlarmClass::RealAlarm);
        table.set_alarm_number(42, "ALM-dev-42-1000");
        assert!(!table.record_expected_files("ALM-dev-99-2000", vec![]));
    }
}
