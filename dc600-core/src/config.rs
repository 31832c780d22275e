//! Runtime configuration. `Config::from_env()` (what `dc600d` actually
//! runs with) and `Config::default()` are the same thing: every field is
//! read from the environment, falling back to a typed default when a
//! variable is unset or unparsable. Neither is environment-independent —
//! a test that needs a guaranteed value regardless of the process
//! environment should overwrite that field on the resulting struct
//! (`Config { max_buffered_bytes: 1024, ..Config::default() }`) rather
//! than assuming `default()` alone is enough.

use chrono_tz::Tz;

#[derive(Debug, Clone)]
pub struct Config {
    /// Main JT/T 808 listener port.
    pub dc600_port: u16,
    /// JT/T 1078 media-channel listener port.
    pub jt1078_port: u16,
    /// Address advertised to devices in 0x9208 requests. Required to
    /// actually emit attachment requests; left unset, the orchestrator
    /// logs a warning and skips them.
    pub attachment_ip: Option<String>,
    /// Port advertised in 0x9208 requests; defaults to `jt1078_port`.
    pub attachment_port: u16,
    /// Timezone BCD location timestamps are interpreted in.
    pub timezone: Tz,
    pub idle_timeout_secs: u64,
    pub max_subpackage_assemblies: usize,
    pub max_buffered_bytes: usize,
    pub max_correlations: usize,
    pub media_dir: String,
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

impl Default for Config {
    fn default() -> Self {
        let jt1078_port = env_parsed("JT1078_PORT", 60001);
        Self {
            dc600_port: env_parsed("DC600_PORT", 5999),
            jt1078_port,
            attachment_ip: std::env::var("DC600_ATTACHMENT_IP").ok(),
            attachment_port: env_parsed("DC600_ATTACHMENT_PORT", jt1078_port),
            timezone: env_string("DC600_TIMEZONE", "UTC")
                .parse()
                .unwrap_or(chrono_tz::UTC),
            idle_timeout_secs: env_parsed("DC600_IDLE_TIMEOUT_SECS", 300),
            max_subpackage_assemblies: env_parsed("DC600_MAX_SUBPACKAGE_ASSEMBLIES", 8),
            max_buffered_bytes: env_parsed("DC600_MAX_BUFFERED_BYTES", 16 * 1024 * 1024),
            max_correlations: env_parsed("DC600_MAX_CORRELATIONS", 256),
            media_dir: env_string("DC600_MEDIA_DIR", "./media"),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::default()
    }
}
