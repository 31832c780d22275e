//! Per-device session state: auth/provisioning status, sequence
//! tracking, in-progress multimedia sub-package assemblies, and the
//! event/media correlation table. A `DeviceSession` is single-owner —
//! nothing outside the task handling that device's connection touches
//! its assemblies or correlation table directly.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Instant;

use dc600_proto::media::MultimediaPrefix;
use tokio::sync::{Mutex, RwLock};

use crate::correlation::CorrelationTable;
use dc600_proto::error::ReassemblyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    Unregistered,
    Registered,
    Authenticated,
}

/// One in-progress sub-packaged multimedia upload, keyed by multimedia
/// id. Completion is judged the moment a packet arrives whose
/// `package_no` equals the assembly's `total_packages` — never by
/// comparing buffered byte counts, which is the bug this whole type
/// exists to make impossible to reintroduce.
#[derive(Debug)]
pub struct Assembly {
    pub prefix: Option<MultimediaPrefix>,
    pub total_packages: u16,
    chunks: BTreeMap<u16, Vec<u8>>,
    buffered_bytes: usize,
    started_at: Instant,
}

impl Assembly {
    fn new(total_packages: u16) -> Self {
        Self { prefix: None, total_packages, chunks: BTreeMap::new(), buffered_bytes: 0, started_at: Instant::now() }
    }

    /// Concatenates whatever chunks were received, in package-number
    /// order. Gaps (a missing package in the middle) are logged and
    /// simply skipped rather than failing the whole file — a partially
    /// corrupt attachment is still more useful than none.
    pub fn assemble(&self) -> Vec<u8> {
        if self.chunks.len() as u16 != self.total_packages {
            tracing::warn!(
                received = self.chunks.len(),
                expected = self.total_packages,
                "assembling multimedia file with missing sub-packages"
            );
        }
        self.chunks.values().flat_map(|c| c.iter().copied()).collect()
    }
}

pub struct CompletedAssembly {
    pub prefix: Option<MultimediaPrefix>,
    pub bytes: Vec<u8>,
}

pub struct DeviceSession {
    pub device_id: String,
    pub auth: AuthStatus,
    pub provisioned: bool,
    pub last_sequence: Option<u16>,
    pub last_seen: Instant,
    assemblies: HashMap<u32, Assembly>,
    pub correlations: CorrelationTable,
    max_assemblies: usize,
    max_buffered_bytes: usize,
}

impl DeviceSession {
    pub fn new(
        device_id: String,
        max_assemblies: usize,
        max_buffered_bytes: usize,
        max_correlations: usize,
    ) -> Self {
        Self {
            device_id,
            auth: AuthStatus::Unregistered,
            provisioned: false,
            last_sequence: None,
            last_seen: Instant::now(),
            assemblies: HashMap::new(),
            correlations: CorrelationTable::new(max_correlations),
            max_assemblies,
            max_buffered_bytes,
        }
    }

    pub fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub fn is_idle(&self, timeout: std::time::Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }

    /// Feeds one sub-packaged multimedia chunk into its assembly,
    /// returning the completed file the instant the packet whose
    /// `package_no` equals `total_packages` arrives.
    ///
    /// Multiple multimedia ids may be mid-assembly at once; each is
    /// tracked independently, per the open-question decision that
    /// concurrent streams for different multimedia ids never interfere
    /// with each other (see `DESIGN.md`).
    pub fn feed_chunk(
        &mut self,
        multimedia_id: u32,
        package_no: u16,
        total_packages: u16,
        prefix: Option<MultimediaPrefix>,
        data: Vec<u8>,
    ) -> Result<Option<CompletedAssembly>, ReassemblyError> {
        if package_no > total_packages {
            return Err(ReassemblyError::PackageNoExceedsTotal { package_no, total_packages });
        }

        if !self.assemblies.contains_key(&multimedia_id) && self.assemblies.len() >= self.max_assemblies {
            return Err(ReassemblyError::TooManyAssemblies);
        }

        let assembly = self
            .assemblies
            .entry(multimedia_id)
            .or_insert_with(|| Assembly::new(total_packages));

        if prefix.is_some() {
            assembly.prefix = prefix;
        }

        if let Some(existing) = assembly.chunks.get(&package_no) {
            if existing.len() != data.len() {
                return Err(ReassemblyError::DuplicateMismatch { package_no });
            }
        } else {
            // The cap is on total buffered bytes across every in-progress
            // assembly, not on any one of them — exceeding it discards the
            // oldest assembly (by first-chunk arrival time) rather than
            // rejecting the chunk that pushed it over.
            while self.total_buffered_bytes() + data.len() > self.max_buffered_bytes {
                let oldest = self
                    .assemblies
                    .iter()
                    .filter(|(id, _)| **id != multimedia_id)
                    .min_by_key(|(_, a)| a.started_at)
                    .map(|(id, _)| *id);
                match oldest {
                    Some(id) => {
                        tracing::warn!(multimedia_id = id, "buffered multimedia bytes exceeded cap, discarding oldest assembly");
                        self.assemblies.remove(&id);
                    }
                    None => break,
                }
            }
            let assembly = self
                .assemblies
                .get_mut(&multimedia_id)
                .expect("just looked up or inserted above");
            assembly.buffered_bytes += data.len();
            assembly.chunks.insert(package_no, data);
        }

        if package_no == total_packages {
            let completed = self.assemblies.remove(&multimedia_id).unwrap();
            return Ok(Some(CompletedAssembly { prefix: completed.prefix, bytes: completed.assemble() }));
        }

        Ok(None)
    }

    fn total_buffered_bytes(&self) -> usize {
        self.assemblies.values().map(|a| a.buffered_bytes).sum()
    }

    pub fn in_progress_assemblies(&self) -> usize {
        self.assemblies.len()
    }
}

/// Shared table of live sessions. The outer map is read-heavy (an
/// existing device's every message just looks itself up) so lookups
/// take a read lock; only registering a never-seen device needs the
/// write lock. Each session's own `Mutex` then serializes mutation for
/// that one device without blocking any other device's traffic.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Mutex<DeviceSession>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_or_create(
        &self,
        device_id: &str,
        max_assemblies: usize,
        max_buffered_bytes: usize,
        max_correlations: usize,
    ) -> Arc<Mutex<DeviceSession>> {
        if let Some(existing) = self.sessions.read().await.get(device_id) {
            return existing.clone();
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(device_id.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(DeviceSession::new(
                    device_id.to_string(),
                    max_assemblies,
                    max_buffered_bytes,
                    max_correlations,
                )))
            })
            .clone()
    }

    pub async fn remove(&self, device_id: &str) -> Option<Arc<Mutex<DeviceSession>>> {
        self.sessions.write().await.remove(device_id)
    }

    /// Tears down any session idle past `timeout`, discarding its
    /// in-progress sub-package buffers. Run periodically from a
    /// background task, never inline with message handling.
    pub async fn reap_idle(&self, timeout: std::time::Duration) {
        let idle: Vec<String> = {
            let sessions = self.sessions.read().await;
            let mut idle = Vec::new();
            for (device_id, session) in sessions.iter() {
                if session.lock().await.is_idle(timeout) {
                    idle.push(device_id.clone());
                }
            }
            idle
        };
        if idle.is_empty() {
            return;
        }
        let mut sessions = self.sessions.write().await;
        for device_id in idle {
            tracing::info!(device_id, "reaping idle session");
            sessions.remove(&device_id);
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_is_packet_count_not_byte_count() {
        let mut session = DeviceSession::new("d".to_string(), 8, 1024, 16);
        // five packets, each a different length, nothing sums to a
        // "nice" expected byte total — completion must come from
        // package_no == total_packages, never from bytes buffered.
        for pkg in 1..5u16 {
            let result = session.feed_chunk(1, pkg, 5, None, vec![0u8; pkg as usize]).unwrap();
            assert!(result.is_none());
        }
        let result = session.feed_chunk(1, 5, 5, None, vec![0u8; 1]).unwrap();
        assert!(result.is_some());
    }

    #[test]
    fn concurrent_multimedia_ids_do_not_interfere() {
        let mut session = DeviceSession::new("d".to_string(), 8, 1024, 16);
        session.feed_chunk(1, 1, 2, None, vec![1]).unwrap();
        session.feed_chunk(2, 1, 1, None, vec![2]).unwrap().unwrap();
        assert_eq!(session.in_progress_assemblies(), 1);
        let completed = session.feed_chunk(1, 2, 2, None, vec![1]).unwrap().unwrap();
        assert_eq!(completed.bytes, vec![1, 1]);
    }

    #[test]
    fn too_many_assemblies_is_rejected() {
        let mut session = DeviceSession::new("d".to_string(), 1, 1024, 16);
        session.feed_chunk(1, 1, 2, None, vec![0]).unwrap();
        let err = session.feed_chunk(2, 1, 2, None, vec![0]).unwrap_err();
        assert_eq!(err, ReassemblyError::TooManyAssemblies);
    }

    #[test]
    fn buffer_cap_evicts_oldest_assembly_rather_than_rejecting() {
        let mut session = DeviceSession::new("d".to_string(), 8, 6, 16);
        session.feed_chunk(1, 1, 2, None, vec![0u8; 4]).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(2));
        // Assembly 2's first chunk pushes total buffered bytes past the
        // cap; assembly 1 (older) is discarded to make room rather than
        // this chunk being rejected.
        let result = session.feed_chunk(2, 1, 1, None, vec![0u8; 4]).unwrap();
        assert!(result.is_some());
        assert!(!session.assemblies.contains_key(&1));
    }
}
