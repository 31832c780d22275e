//! Abstract external collaborators: where decoded positions go, how
//! multimedia files get stored, how a device id resolves to session
//! context, and how outbound frames reach a connection. The embedding
//! platform (storage, UI, geocoding) lives behind these traits and is
//! explicitly not this crate's concern — `dc600-core` ships one minimal
//! reference implementation of each for `dc600d` to actually run with.

use std::path::PathBuf;

use bytes::Bytes;
use dc600_proto::location::Position;

pub trait PositionSink: Send + Sync {
    fn accept(&self, device_id: &str, position: &Position);
}

pub trait MediaStore: Send + Sync {
    fn write(&self, device_id: &str, bytes: &[u8], extension: &str) -> anyhow::Result<String>;
}

/// What a device directory knows about a device ahead of the handshake:
/// whether it's recognized at all, and the auth token to hand back in
/// its 0x8100 registration response.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub known: bool,
    pub auth_token: String,
}

pub trait DeviceDirectory: Send + Sync {
    fn resolve(&self, device_id: &str) -> SessionContext;
}

pub trait OutboundChannel: Send + Sync {
    fn send(&self, frame: Bytes);
}

/// Logs every accepted position at `info` and appends it as one JSON
/// line to `path`, the same append-only-log shape as the teacher's audit
/// trail, minus the hash chaining this has no need for.
pub struct LoggingPositionSink {
    path: PathBuf,
}

impl LoggingPositionSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PositionSink for LoggingPositionSink {
    fn accept(&self, device_id: &str, position: &Position) {
        tracing::info!(
            device_id,
            lat = position.latitude,
            lon = position.longitude,
            alarms = %position.alarms.to_csv(),
            "position accepted"
        );
        let line = serde_json::json!({
            "device_id": device_id,
            "latitude": position.latitude,
            "longitude": position.longitude,
            "altitude_m": position.altitude_m,
            "speed_kmh": position.speed_kmh,
            "direction_deg": position.direction_deg,
            "time": position.time.to_rfc3339(),
            "valid": position.valid,
            "alarms": position.alarms.to_csv(),
            "image_path": position.image_path,
            "video_path": position.video_path,
            "audio_path": position.audio_path,
            "event_alarm_id": position.event_alarm_id,
            "event_alarm_type": position.event_alarm_type,
            "event": position.event,
        });
        if let Ok(mut serialized) = serde_json::to_vec(&line) {
            serialized.push(b'\n');
            if let Err(e) = append_to_file(&self.path, &serialized) {
                tracing::warn!(error = %e, "failed to append position to sink log");
            }
        }
    }
}

fn append_to_file(path: &std::path::Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(bytes)
}

/// Writes multimedia files under `root/<device_id>/<multimedia_id>.<ext>`.
pub struct FsMediaStore {
    root: PathBuf,
}

impl FsMediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl MediaStore for FsMediaStore {
    fn write(&self, device_id: &str, bytes: &[u8], extension: &str) -> anyhow::Result<String> {
        let dir = self.root.join(device_id);
        std::fs::create_dir_all(&dir)?;
        let file_name = format!("{}.{extension}", uuid_like_name());
        let path = dir.join(&file_name);
        std::fs::write(&path, bytes)?;
        Ok(path.to_string_lossy().into_owned())
    }
}

/// A short, collision-resistant-enough-for-a-filename token. This core
/// doesn't depend on `uuid`; a random hex suffix plus the current time
/// is sufficient for naming files that are also looked up by multimedia
/// id in the accompanying log line.
fn uuid_like_name() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let suffix: u64 = rng.gen();
    format!("{:x}", suffix)
}

/// Resolves every device id as known, minting a deterministic
/// per-device auth token. Stands in for whatever fleet-management
/// directory the embedding platform actually has.
pub struct StaticDeviceDirectory;

impl DeviceDirectory for StaticDeviceDirectory {
    fn resolve(&self, device_id: &str) -> SessionContext {
        SessionContext { known: true, auth_token: format!("tok-{device_id}") }
    }
}

/// In-memory reference implementations of the sink traits, built for
/// reuse by both this crate's integration tests and any embedder
/// writing its own tests against a `Dispatcher`.
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct InMemoryPositionSink {
        pub accepted: Mutex<Vec<(String, Position)>>,
    }

    impl PositionSink for InMemoryPositionSink {
        fn accept(&self, device_id: &str, position: &Position) {
            self.accepted.lock().unwrap().push((device_id.to_string(), position.clone()));
        }
    }

    #[derive(Default)]
    pub struct InMemoryMediaStore {
        pub written: Mutex<Vec<(String, Vec<u8>, String)>>,
    }

    impl MediaStore for InMemoryMediaStore {
        fn write(&self, device_id: &str, bytes: &[u8], extension: &str) -> anyhow::Result<String> {
            let key = format!("{device_id}-{}", self.written.lock().unwrap().len());
            self.written.lock().unwrap().push((device_id.to_string(), bytes.to_vec(), extension.to_string()));
            Ok(key)
        }
    }

    #[derive(Default)]
    pub struct InMemoryOutboundChannel {
        pub sent: Mutex<Vec<Bytes>>,
    }

    impl OutboundChannel for InMemoryOutboundChannel {
        fn send(&self, frame: Bytes) {
            self.sent.lock().unwrap().push(frame);
        }
    }
}
