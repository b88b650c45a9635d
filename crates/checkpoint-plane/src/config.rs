//! Service configuration
//!
//! Read from `CHECKPOINT_*` environment variables. Every variable is optional;
//! malformed values are configuration errors rather than silent defaults.

use checkpoint_core::{AcceptPolicy, Algorithm, CheckpointError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Default freshness window
pub const DEFAULT_MAX_SKEW_SECS: i64 = 5 * 60;

/// Largest freshness window a verifier may be configured with
pub const MAX_SKEW_CAP_SECS: i64 = 60 * 60;

/// Freshness and accept-policy settings for verifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifierConfig {
    max_skew: chrono::Duration,
    policy: AcceptPolicy,
}

impl VerifierConfig {
    /// Create a verifier configuration
    ///
    /// Fails if the skew is negative or exceeds one hour.
    pub fn new(max_skew: chrono::Duration, policy: AcceptPolicy) -> Result<Self> {
        if max_skew < chrono::Duration::zero() {
            return Err(CheckpointError::ConfigError("max skew must not be negative".into()));
        }
        if max_skew > chrono::Duration::seconds(MAX_SKEW_CAP_SECS) {
            return Err(CheckpointError::ConfigError(format!(
                "max skew {}s exceeds the {}s cap",
                max_skew.num_seconds(),
                MAX_SKEW_CAP_SECS
            )));
        }
        Ok(Self { max_skew, policy })
    }

    /// Allowed clock skew in either direction
    pub fn max_skew(&self) -> chrono::Duration {
        self.max_skew
    }

    /// Accept policy
    pub fn policy(&self) -> AcceptPolicy {
        self.policy
    }

    /// Same skew, different policy
    pub fn with_policy(mut self, policy: AcceptPolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            max_skew: chrono::Duration::seconds(DEFAULT_MAX_SKEW_SECS),
            policy: AcceptPolicy::default(),
        }
    }
}

/// Per-signature latency budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SigningBudgets {
    /// HMAC-SHA256 and Ed25519
    pub classical: Duration,
    /// Dilithium2
    pub post_quantum: Duration,
}

impl SigningBudgets {
    /// Budget for one signature under `algorithm`
    pub fn for_algorithm(&self, algorithm: Algorithm) -> Duration {
        if algorithm.is_post_quantum() {
            self.post_quantum
        } else {
            self.classical
        }
    }
}

impl Default for SigningBudgets {
    fn default() -> Self {
        Self {
            classical: Duration::from_millis(200),
            post_quantum: Duration::from_secs(2),
        }
    }
}

/// Complete service configuration
#[derive(Debug, Clone)]
pub struct PlaneConfig {
    /// HTTP port
    pub port: u16,
    /// Checkpoint directory; in-memory storage when unset
    pub data_dir: Option<PathBuf>,
    /// Directory served by the `file:` key backend
    pub key_dir: Option<PathBuf>,
    /// Verifier settings
    pub verifier: VerifierConfig,
    /// Algorithm used while in safe mode
    pub fallback_algorithm: Algorithm,
    /// Signing latency budgets
    pub budgets: SigningBudgets,
    /// Recorded in every `meta.json`
    pub config_version: String,
    /// Tracing level name
    pub log_level: String,
}

impl Default for PlaneConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            data_dir: None,
            key_dir: None,
            verifier: VerifierConfig::default(),
            fallback_algorithm: Algorithm::HmacSha256,
            budgets: SigningBudgets::default(),
            config_version: "1".into(),
            log_level: "info".into(),
        }
    }
}

impl PlaneConfig {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through an arbitrary variable lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let port = parse_var(&lookup, "CHECKPOINT_PORT")?.unwrap_or(defaults.port);
        let data_dir = lookup("CHECKPOINT_DATA_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        let key_dir = lookup("CHECKPOINT_KEY_DIR")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);

        let max_skew_secs: i64 =
            parse_var(&lookup, "CHECKPOINT_MAX_SKEW_SECS")?.unwrap_or(DEFAULT_MAX_SKEW_SECS);
        let policy = match lookup("CHECKPOINT_ACCEPT_POLICY") {
            Some(v) => v.parse().map_err(CheckpointError::ConfigError)?,
            None => AcceptPolicy::default(),
        };
        let verifier = VerifierConfig::new(chrono::Duration::seconds(max_skew_secs), policy)?;

        let fallback_algorithm = match lookup("CHECKPOINT_FALLBACK_ALGORITHM") {
            Some(v) => v.parse().map_err(CheckpointError::ConfigError)?,
            None => defaults.fallback_algorithm,
        };

        let budgets = SigningBudgets {
            classical: parse_var(&lookup, "CHECKPOINT_HMAC_BUDGET_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.budgets.classical),
            post_quantum: parse_var(&lookup, "CHECKPOINT_PQC_BUDGET_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.budgets.post_quantum),
        };

        Ok(Self {
            port,
            data_dir,
            key_dir,
            verifier,
            fallback_algorithm,
            budgets,
            config_version: lookup("CHECKPOINT_CONFIG_VERSION").unwrap_or(defaults.config_version),
            log_level: lookup("CHECKPOINT_LOG_LEVEL").unwrap_or(defaults.log_level),
        })
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|e| CheckpointError::ConfigError(format!("{}={:?}: {}", name, raw, e)))
        })
        .transpose()
}
