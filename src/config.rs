//! Configuration: throttle parameters from the environment, mailbox
//! groups from a JSON file, credentials validated at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;

/// Per-sender send throttling parameters. One deployment-wide set,
/// applied independently to each sender account.
#[derive(Debug, Clone, Copy)]
pub struct ThrottleConfig {
    /// Lower bound of the randomized inter-send interval.
    pub min_interval: Duration,
    /// Upper bound of the randomized inter-send interval.
    pub max_interval: Duration,
    pub max_per_hour: u32,
    pub max_per_day: u32,
}

impl ThrottleConfig {
    /// Build from raw values, clamping to sane bounds: max_interval is
    /// never below min_interval, per-hour/per-day caps never below 1.
    pub fn from_values(
        min_interval_secs: u64,
        max_interval_secs: u64,
        max_per_hour: u32,
        max_per_day: u32,
    ) -> Self {
        let min_interval = Duration::from_secs(min_interval_secs);
        let max_interval = Duration::from_secs(max_interval_secs.max(min_interval_secs));
        Self {
            min_interval,
            max_interval,
            max_per_hour: max_per_hour.max(1),
            max_per_day: max_per_day.max(1),
        }
    }

    /// Read throttle parameters from the environment, falling back to
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_values(
            env_u64("THROTTLE_MIN_INTERVAL_SECS", 180),
            env_u64("THROTTLE_MAX_INTERVAL_SECS", 300),
            env_u64("THROTTLE_MAX_PER_HOUR", 10) as u32,
            env_u64("THROTTLE_MAX_PER_DAY", 50) as u32,
        )
    }
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self::from_values(180, 300, 10, 50)
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

// ── Mailbox groups ──────────────────────────────────────────────────

/// One routing group: a set of mailboxes backed by one outreach-record
/// collection, one inbound-message collection, and one sender-credential
/// collection in the Registry.
#[derive(Debug, Clone, Deserialize)]
pub struct MailboxGroup {
    /// Outreach Records collection (queue + touchpoint, same rows).
    pub records_collection_id: String,
    /// Inbound Messages collection.
    pub inbound_collection_id: String,
    /// Sender Credentials collection.
    pub senders_collection_id: String,
    /// Mailboxes this group listens on (sender account emails).
    pub mailboxes: Vec<String>,
}

impl MailboxGroup {
    /// Case-insensitive mailbox membership test.
    pub fn contains_mailbox(&self, mailbox: &str) -> bool {
        let needle = mailbox.trim().to_lowercase();
        self.mailboxes
            .iter()
            .any(|m| m.trim().to_lowercase() == needle)
    }
}

const DEFAULT_POLL_INTERVAL_SECS: u64 = 120;
const DEFAULT_BODY_MAX_CHARS: usize = 40_000;
const DEFAULT_BATCH_SIZE: usize = 100;

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_SECS
}

fn default_body_max_chars() -> usize {
    DEFAULT_BODY_MAX_CHARS
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

/// Group configuration file: groups in routing priority order plus the
/// shared poll/batch/body-cap knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupsConfig {
    pub groups: Vec<MailboxGroup>,
    /// Inbound poll interval in seconds, minimum 10.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: u64,
    /// Inbound body size cap, head + tail preserved beyond it. Minimum 1000.
    #[serde(default = "default_body_max_chars")]
    pub body_max_chars: usize,
    /// Outbound query batch size, clamped to 1..=100.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl GroupsConfig {
    /// Load and validate a group configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.groups.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "groups".into(),
                message: "must be a non-empty array".into(),
            });
        }
        for (i, group) in self.groups.iter().enumerate() {
            for (key, value) in [
                ("records_collection_id", &group.records_collection_id),
                ("inbound_collection_id", &group.inbound_collection_id),
                ("senders_collection_id", &group.senders_collection_id),
            ] {
                if value.trim().is_empty() {
                    return Err(ConfigError::InvalidValue {
                        key: format!("groups[{i}].{key}"),
                        message: "must be a non-empty string".into(),
                    });
                }
            }
            if group.mailboxes.iter().all(|m| m.trim().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    key: format!("groups[{i}].mailboxes"),
                    message: "must contain at least one non-empty mailbox".into(),
                });
            }
        }
        if self.poll_interval_seconds < 10 {
            return Err(ConfigError::InvalidValue {
                key: "poll_interval_seconds".into(),
                message: "must be at least 10".into(),
            });
        }
        if self.body_max_chars < 1000 {
            return Err(ConfigError::InvalidValue {
                key: "body_max_chars".into(),
                message: "must be at least 1000".into(),
            });
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn clamped_batch_size(&self) -> usize {
        self.batch_size.clamp(1, 100)
    }

    /// Every distinct mailbox across all groups, first occurrence wins.
    pub fn unique_mailboxes(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for group in &self.groups {
            for mailbox in &group.mailboxes {
                let trimmed = mailbox.trim();
                if trimmed.is_empty() {
                    continue;
                }
                if !seen
                    .iter()
                    .any(|s: &String| s.eq_ignore_ascii_case(trimmed))
                {
                    seen.push(trimmed.to_string());
                }
            }
        }
        seen
    }
}

/// Path of the group configuration file, from `OUTREACH_GROUPS_CONFIG`
/// or `./groups.json`.
pub fn groups_config_path() -> PathBuf {
    std::env::var("OUTREACH_GROUPS_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("groups.json"))
}

// ── Credentials ─────────────────────────────────────────────────────

/// OAuth client for the mail API. Missing values are fatal at startup.
#[derive(Clone)]
pub struct MailApiCredentials {
    pub client_id: String,
    pub client_secret: SecretString,
}

impl MailApiCredentials {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            client_id: require_env("MAIL_CLIENT_ID")?,
            client_secret: SecretString::from(require_env("MAIL_CLIENT_SECRET")?),
        })
    }
}

/// Registry endpoint and API token. Missing values are fatal at startup.
#[derive(Clone)]
pub struct RegistrySettings {
    pub base_url: String,
    pub token: SecretString,
}

impl RegistrySettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: require_env("REGISTRY_BASE_URL")?,
            token: SecretString::from(require_env("REGISTRY_API_TOKEN")?),
        })
    }
}

fn require_env(key: &str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(ConfigError::MissingEnvVar(key.to_string())),
    }
}
