//! Runtime configuration and the process-wide, read-mostly caches described
//! in §5 and §9: workflow states, action rules, carrier domains, and
//! classification tables live behind a TTL, with an explicit `invalidate()`
//! hook for admin-triggered refresh. Readers who hit a stale/missing cache
//! pay for one synchronous reload; they never block on a background
//! refresher.

use std::collections::HashSet;
use std::env;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tracing::warn;

/// Hardcoded fallback carrier domain substrings (§6), used when the
/// `carrier_configs` table is empty or unavailable.
pub const FALLBACK_CARRIER_DOMAINS: &[&str] = &[
    "maersk.com",
    "hlag.com",
    "cma-cgm.com",
    "msc.com",
    "evergreen-line.com",
    "oocl.com",
    "cosco-shipping.com",
    "yangming.com",
    "one-line.com",
    "zim.com",
    "hmm21.com",
    "pilship.com",
    "wanhai.com",
    "sitcline.com",
];

/// Carrier display names, positionally aligned with
/// `FALLBACK_CARRIER_DOMAINS`, used for content attestation (I2: "sender
/// display-name / body content + subject attest carrier origin") when the
/// sender domain itself doesn't match the configured carrier domain set,
/// e.g. a booking confirmation forwarded through an internal mailbox whose
/// body still names the carrier.
const FALLBACK_CARRIER_NAMES: &[&str] = &[
    "maersk",
    "hapag-lloyd",
    "cma cgm",
    "msc",
    "evergreen",
    "oocl",
    "cosco",
    "yang ming",
    "ocean network express",
    "zim",
    "hmm",
    "pil",
    "wan hai",
    "sitc",
];

/// I2's "content-attested carrier origin" branch: does the sender's display
/// name, the subject, or the body name a known carrier? Checked only as a
/// fallback when the sender domain itself didn't match (a direct domain
/// match is authoritative on its own).
pub fn content_attests_carrier_origin(sender_display_name: Option<&str>, subject: &str, body: &str) -> bool {
    let haystack = format!(
        "{}\n{}\n{}",
        sender_display_name.unwrap_or_default(),
        subject,
        body
    )
    .to_lowercase();
    FALLBACK_CARRIER_NAMES.iter().any(|name| haystack.contains(name))
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub database_url: Option<String>,
    pub tls_allow_invalid_certs: bool,
    pub pool_max_size: u32,
    pub pool_min_idle: u32,
    pub pool_connection_timeout: Duration,
    pub pool_idle_timeout: Duration,

    pub own_domains: HashSet<String>,
    pub forwarder_company_name: String,

    pub worker_pool_size: usize,
    pub inter_email_delay: Duration,
    pub email_soft_deadline: Duration,
    pub attachment_batch_size: usize,
    pub attachment_batch_pause: Duration,

    pub config_cache_ttl: Duration,
    pub low_confidence_threshold: u8,
    pub booking_confirmation_threshold: u8,
    pub shipment_review_threshold: u8,

    pub carrier_config_path: Option<std::path::PathBuf>,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let database_url = env::var("SHIPMENTS_DB_URL")
            .ok()
            .filter(|v| !v.trim().is_empty());

        let own_domains = env::var("OWN_DOMAINS")
            .ok()
            .map(|raw| {
                raw.split(',')
                    .map(|d| d.trim().to_lowercase())
                    .filter(|d| !d.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let forwarder_company_name =
            env::var("FORWARDER_COMPANY_NAME").unwrap_or_else(|_| "Intoglo".to_string());

        Self {
            database_url,
            tls_allow_invalid_certs: env_flag("SHIPMENTS_DB_TLS_ALLOW_INVALID_CERTS", false),
            pool_max_size: env_num("SHIPMENTS_DB_POOL_MAX_SIZE", 20),
            pool_min_idle: env_num("SHIPMENTS_DB_POOL_MIN_IDLE", 2),
            pool_connection_timeout: Duration::from_secs(env_num(
                "SHIPMENTS_DB_POOL_CONNECT_TIMEOUT_SECS",
                5,
            )),
            pool_idle_timeout: Duration::from_secs(env_num(
                "SHIPMENTS_DB_POOL_IDLE_TIMEOUT_SECS",
                60,
            )),
            own_domains,
            forwarder_company_name,
            worker_pool_size: env_num("PIPELINE_WORKER_POOL_SIZE", 8),
            inter_email_delay: Duration::from_millis(env_num("PIPELINE_INTER_EMAIL_DELAY_MS", 200)),
            email_soft_deadline: Duration::from_secs(env_num("PIPELINE_EMAIL_SOFT_DEADLINE_SECS", 60)),
            attachment_batch_size: env_num("PIPELINE_ATTACHMENT_BATCH_SIZE", 100),
            attachment_batch_pause: Duration::from_millis(env_num(
                "PIPELINE_ATTACHMENT_BATCH_PAUSE_MS",
                50,
            )),
            config_cache_ttl: Duration::from_secs(env_num("PIPELINE_CONFIG_CACHE_TTL_SECS", 300)),
            low_confidence_threshold: env_num("PIPELINE_LOW_CONFIDENCE_THRESHOLD", 50),
            booking_confirmation_threshold: env_num("PIPELINE_BOOKING_CONFIRMATION_THRESHOLD", 70),
            shipment_review_threshold: env_num("PIPELINE_SHIPMENT_REVIEW_THRESHOLD", 50),
            carrier_config_path: env::var("CARRIER_CONFIG_PATH").ok().map(Into::into),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            tls_allow_invalid_certs: false,
            pool_max_size: 20,
            pool_min_idle: 2,
            pool_connection_timeout: Duration::from_secs(5),
            pool_idle_timeout: Duration::from_secs(60),
            own_domains: HashSet::new(),
            forwarder_company_name: "Intoglo".to_string(),
            worker_pool_size: 8,
            inter_email_delay: Duration::from_millis(200),
            email_soft_deadline: Duration::from_secs(60),
            attachment_batch_size: 100,
            attachment_batch_pause: Duration::from_millis(50),
            config_cache_ttl: Duration::from_secs(300),
            low_confidence_threshold: 50,
            booking_confirmation_threshold: 70,
            shipment_review_threshold: 50,
            carrier_config_path: None,
        }
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "y"),
        Err(_) => default,
    }
}

fn env_num<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

/// On-disk carrier/classification table, loaded via `toml` when
/// `CARRIER_CONFIG_PATH` is set. Anything not present here falls back to
/// the hardcoded defaults baked into `classification.rs`/`extraction.rs`.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct CarrierConfigFile {
    #[serde(default)]
    pub carrier_domains: Vec<CarrierDomainEntry>,
}

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CarrierDomainEntry {
    pub carrier_code: String,
    pub domains: Vec<String>,
}

pub fn load_carrier_config_file(
    path: &std::path::Path,
) -> Result<CarrierConfigFile, std::io::Error> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
}

/// A TTL-bounded, process-wide cache for read-mostly configuration. A cache
/// miss (expired or never loaded) costs one synchronous call to `loader`;
/// `invalidate()` forces the next read to pay that cost again.
pub struct ConfigCache<T> {
    ttl: Duration,
    loader: Box<dyn Fn() -> T + Send + Sync>,
    state: RwLock<Option<(Arc<T>, Instant)>>,
}

impl<T: Send + Sync + 'static> ConfigCache<T> {
    pub fn new(ttl: Duration, loader: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            ttl,
            loader: Box::new(loader),
            state: RwLock::new(None),
        }
    }

    pub fn get(&self) -> Arc<T> {
        if let Some((value, loaded_at)) = self.state.read().unwrap().as_ref() {
            if loaded_at.elapsed() < self.ttl {
                return value.clone();
            }
        }
        self.reload()
    }

    pub fn invalidate(&self) {
        *self.state.write().unwrap() = None;
    }

    fn reload(&self) -> Arc<T> {
        let value = Arc::new((self.loader)());
        *self.state.write().unwrap() = Some((value.clone(), Instant::now()));
        value
    }
}

pub fn carrier_domains_from_config(
    config: &PipelineConfig,
) -> Vec<String> {
    match &config.carrier_config_path {
        Some(path) => match load_carrier_config_file(path) {
            Ok(file) if !file.carrier_domains.is_empty() => file
                .carrier_domains
                .into_iter()
                .flat_map(|entry| entry.domains)
                .map(|d| d.to_lowercase())
                .collect(),
            Ok(_) => FALLBACK_CARRIER_DOMAINS.iter().map(|s| s.to_string()).collect(),
            Err(err) => {
                warn!("failed to load carrier config at {:?}: {}", path, err);
                FALLBACK_CARRIER_DOMAINS.iter().map(|s| s.to_string()).collect()
            }
        },
        None => FALLBACK_CARRIER_DOMAINS.iter().map(|s| s.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn cache_reuses_value_within_ttl() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let cache = ConfigCache::new(Duration::from_secs(60), move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            42
        });
        let _ = cache.get();
        let _ = cache.get();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalidate_forces_reload() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let cache = ConfigCache::new(Duration::from_secs(60), move || {
            calls_clone.fetch_add(1, Ordering::SeqCst);
            7
        });
        let _ = cache.get();
        cache.invalidate();
        let _ = cache.get();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn defaults_include_hardcoded_carriers() {
        let config = PipelineConfig::default();
        let domains = carrier_domains_from_config(&config);
        assert!(domains.iter().any(|d| d == "maersk.com"));
    }

    #[test]
    fn content_attestation_matches_carrier_name_in_body() {
        assert!(content_attests_carrier_origin(
            None,
            "Booking Confirmation : 263815227",
            "This is an official Hapag-Lloyd booking confirmation."
        ));
    }

    #[test]
    fn content_attestation_false_without_any_carrier_name() {
        assert!(!content_attests_carrier_origin(None, "hello", "just checking in"));
    }
}
