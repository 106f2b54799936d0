use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use annotations::BuilderConfig;
use geocode::{HttpGeocoderConfig, ThrottleConfig};
use tracing::warn;

use crate::sessions::RegistryLimits;

const DEFAULT_ADDR: &str = "127.0.0.1:9200";

#[derive(Clone, Debug)]
pub struct ServiceConfig {
    pub addr: SocketAddr,
    pub geocoder: HttpGeocoderConfig,
    pub throttle: ThrottleConfig,
    /// JSON file of `{ "address": { "latitude": .., "longitude": .. } }`
    /// served instead of the HTTP geocoder.
    pub geocoder_table: Option<PathBuf>,
    pub builder: BuilderConfig,
    pub records_url: Option<String>,
    pub sessions: RegistryLimits,
}

impl ServiceConfig {
    pub fn from_env() -> Self {
        let addr = env::var("MARKERS_ADDR")
            .ok()
            .and_then(|raw| match raw.parse() {
                Ok(addr) => Some(addr),
                Err(err) => {
                    warn!("invalid MARKERS_ADDR {raw:?}: {err}; using {DEFAULT_ADDR}");
                    None
                }
            })
            .unwrap_or_else(default_addr);

        let defaults = HttpGeocoderConfig::default();
        let geocoder = HttpGeocoderConfig {
            base_url: env_var_string("GEOCODER_URL").unwrap_or(defaults.base_url),
            user_agent: env_var_string("GEOCODER_USER_AGENT").unwrap_or(defaults.user_agent),
            timeout: Duration::from_millis(env_var_u64(
                "GEOCODER_TIMEOUT_MS",
                defaults.timeout.as_millis() as u64,
            )),
            country_codes: env_var_string("GEOCODER_COUNTRY_CODES"),
        };

        let throttle_defaults = ThrottleConfig::default();
        let throttle = ThrottleConfig {
            rate_per_second: env_var_f64("GEOCODER_RATE_PER_SECOND", throttle_defaults.rate_per_second),
            burst: env_var_u32("GEOCODER_BURST", throttle_defaults.burst),
        };

        let builder = BuilderConfig {
            resolve_timeout: Duration::from_millis(env_var_u64(
                "RESOLVE_TIMEOUT_MS",
                BuilderConfig::default().resolve_timeout.as_millis() as u64,
            )),
        };

        let session_defaults = RegistryLimits::default();
        let sessions = RegistryLimits {
            max_sessions: env_var_u64("MARKERS_MAX_SESSIONS", session_defaults.max_sessions as u64)
                as usize,
            idle_timeout: Duration::from_secs(env_var_u64(
                "MARKERS_SESSION_IDLE_SECS",
                session_defaults.idle_timeout.as_secs(),
            )),
        };

        Self {
            addr,
            geocoder,
            throttle,
            geocoder_table: env_var_string("GEOCODER_TABLE").map(PathBuf::from),
            builder,
            records_url: env_var_string("RECORDS_URL"),
            sessions,
        }
    }
}

fn default_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 9200))
}

/// Unset and blank values are both treated as absent.
fn env_var_string(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_var_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_var_f64(key: &str, default: f64) -> f64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
