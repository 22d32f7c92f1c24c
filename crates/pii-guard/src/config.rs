//! Configuration loading and validation for the data-protection service.
//!
//! All values are read from environment variables at startup. The process will
//! exit with a clear error message if any required variable is missing or invalid.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::hashing::HashAlgorithm;
use crate::keys::SecretBytes;

/// Validated service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Process-wide pepper mixed into every hash. Required unless
    /// `pepper_secret_arn` is set.
    #[serde(default)]
    pub hash_pepper: Option<SecretBytes>,

    /// Secrets Manager ARN holding the pepper, resolved at startup.
    #[serde(default)]
    pub pepper_secret_arn: Option<String>,

    /// HMAC key for tokenization. Falls back to the pepper.
    #[serde(default)]
    pub token_secret: Option<SecretBytes>,

    /// Digest used by the hasher (`sha256` or `sha512`).
    #[serde(default = "default_hash_algorithm")]
    pub hash_algorithm: String,

    /// Random salt length in bytes when the caller supplies none.
    #[serde(default = "default_hash_salt_len")]
    pub hash_salt_len: usize,

    /// Age (days) after which an active key is rotated.
    #[serde(default = "default_key_rotation_period_days")]
    pub key_rotation_period_days: u64,

    /// How often (seconds) the background task scans for keys due for rotation.
    #[serde(default = "default_key_rotation_check_interval")]
    pub key_rotation_check_interval_secs: u64,

    /// Maximum number of key records held in the in-memory cache.
    #[serde(default = "default_key_cache_capacity")]
    pub key_cache_capacity: usize,

    /// Per-call deadline (milliseconds) for key store I/O.
    #[serde(default = "default_key_store_timeout_ms")]
    pub key_store_timeout_ms: u64,

    /// Modulus size for newly generated RSA keys.
    #[serde(default = "default_rsa_modulus_bits")]
    pub rsa_modulus_bits: usize,

    /// Generate missing active encryption keys at startup.
    #[serde(default = "default_bootstrap_keys")]
    pub bootstrap_keys: bool,

    /// S3 bucket holding key records.
    #[serde(default)]
    pub key_store_bucket: Option<String>,

    /// S3 key prefix for key records.
    #[serde(default = "default_key_store_prefix")]
    pub key_store_prefix: String,

    /// KMS key that wraps key material before it is written to S3.
    #[serde(default)]
    pub key_wrap_kms_key_id: Option<String>,

    /// Endpoint override for every AWS client (e.g. a local emulator).
    #[serde(default)]
    pub aws_endpoint_url: Option<String>,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// OTLP endpoint; traces are only exported when set.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,
}

fn default_hash_algorithm() -> String {
    "sha256".into()
}
fn default_hash_salt_len() -> usize {
    32
}
fn default_key_rotation_period_days() -> u64 {
    90
}

/// Upper bound on `KEY_ROTATION_PERIOD_DAYS`, one hundred years.
const MAX_ROTATION_PERIOD_DAYS: u64 = 36_500;
fn default_key_rotation_check_interval() -> u64 {
    3600
}
fn default_key_cache_capacity() -> usize {
    100
}
fn default_key_store_timeout_ms() -> u64 {
    5000
}
fn default_rsa_modulus_bits() -> usize {
    2048
}
fn default_bootstrap_keys() -> bool {
    true
}
fn default_key_store_prefix() -> String {
    "keys/".into()
}
fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Configuration with every default applied and the given pepper, for
    /// embedding the service as a library.
    pub fn new(pepper: impl Into<String>) -> Self {
        Self {
            hash_pepper: Some(SecretBytes::from(pepper.into())),
            pepper_secret_arn: None,
            token_secret: None,
            hash_algorithm: default_hash_algorithm(),
            hash_salt_len: default_hash_salt_len(),
            key_rotation_period_days: default_key_rotation_period_days(),
            key_rotation_check_interval_secs: default_key_rotation_check_interval(),
            key_cache_capacity: default_key_cache_capacity(),
            key_store_timeout_ms: default_key_store_timeout_ms(),
            rsa_modulus_bits: default_rsa_modulus_bits(),
            bootstrap_keys: default_bootstrap_keys(),
            key_store_bucket: None,
            key_store_prefix: default_key_store_prefix(),
            key_wrap_kms_key_id: None,
            aws_endpoint_url: None,
            log_level: default_log_level(),
            otel_exporter_otlp_endpoint: None,
        }
    }

    /// Load and validate configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if any required variable is absent or cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(config::Environment::default())
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    pub fn validate(&self) -> Result<()> {
        match (&self.hash_pepper, &self.pepper_secret_arn) {
            (Some(p), _) if p.is_empty() => anyhow::bail!("HASH_PEPPER must not be empty"),
            (Some(_), _) => {}
            (None, Some(arn)) => ensure_non_empty(arn, "PEPPER_SECRET_ARN")?,
            (None, None) => {
                anyhow::bail!("one of HASH_PEPPER or PEPPER_SECRET_ARN is required")
            }
        }
        if let Some(secret) = &self.token_secret {
            if secret.is_empty() {
                anyhow::bail!("TOKEN_SECRET must not be empty when set");
            }
        }
        self.hash_algorithm
            .parse::<HashAlgorithm>()
            .with_context(|| format!("HASH_ALGORITHM {:?} is not supported", self.hash_algorithm))?;
        if self.hash_salt_len < 16 {
            anyhow::bail!("HASH_SALT_LEN must be at least 16 bytes");
        }
        if self.key_rotation_period_days == 0 {
            anyhow::bail!("KEY_ROTATION_PERIOD_DAYS must be > 0");
        }
        if self.key_rotation_period_days > MAX_ROTATION_PERIOD_DAYS {
            anyhow::bail!("KEY_ROTATION_PERIOD_DAYS must be at most {MAX_ROTATION_PERIOD_DAYS}");
        }
        if self.key_rotation_check_interval_secs == 0 {
            anyhow::bail!("KEY_ROTATION_CHECK_INTERVAL_SECS must be > 0");
        }
        if self.key_cache_capacity == 0 {
            anyhow::bail!("KEY_CACHE_CAPACITY must be > 0");
        }
        if self.key_store_timeout_ms == 0 {
            anyhow::bail!("KEY_STORE_TIMEOUT_MS must be > 0");
        }
        if self.rsa_modulus_bits < 2048 {
            anyhow::bail!("RSA_MODULUS_BITS must be at least 2048");
        }
        if let Some(bucket) = &self.key_store_bucket {
            ensure_non_empty(bucket, "KEY_STORE_BUCKET")?;
        }
        Ok(())
    }

    /// Key age that triggers rotation, capped at one hundred years.
    pub fn rotation_period(&self) -> chrono::Duration {
        let days = self.key_rotation_period_days.min(MAX_ROTATION_PERIOD_DAYS);
        chrono::Duration::days(days as i64)
    }

    /// Cadence of the background rotation scan.
    pub fn rotation_check_interval(&self) -> Duration {
        Duration::from_secs(self.key_rotation_check_interval_secs)
    }

    /// Deadline applied to every key store call.
    pub fn key_store_timeout(&self) -> Duration {
        Duration::from_millis(self.key_store_timeout_ms)
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} is required and must not be empty");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_correct() {
        assert_eq!(default_hash_algorithm(), "sha256");
        assert_eq!(default_hash_salt_len(), 32);
        assert_eq!(default_key_rotation_period_days(), 90);
        assert_eq!(default_key_rotation_check_interval(), 3600);
        assert_eq!(default_key_cache_capacity(), 100);
        assert_eq!(default_rsa_modulus_bits(), 2048);
        assert_eq!(default_key_store_prefix(), "keys/");
        assert_eq!(default_log_level(), "info");
    }

    #[test]
    fn new_config_is_valid() {
        let cfg = Config::new("pepper");
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.rotation_period(), chrono::Duration::days(90));
    }

    #[test]
    fn validate_requires_a_pepper_source() {
        let mut cfg = Config::new("pepper");
        cfg.hash_pepper = None;
        assert!(cfg.validate().is_err());
        cfg.pepper_secret_arn = Some("arn:aws:secretsmanager:eu-west-3:1:secret:pepper".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_pepper() {
        let cfg = Config::new("");
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_unknown_hash_algorithm() {
        let mut cfg = Config::new("pepper");
        cfg.hash_algorithm = "md5".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_small_rsa_modulus() {
        let mut cfg = Config::new("pepper");
        cfg.rsa_modulus_bits = 1024;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_cache_capacity() {
        let mut cfg = Config::new("pepper");
        cfg.key_cache_capacity = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn oversized_rotation_period_is_rejected_and_capped() {
        let mut cfg = Config::new("pepper");
        cfg.key_rotation_period_days = u64::MAX;
        assert!(cfg.validate().is_err());
        assert_eq!(
            cfg.rotation_period(),
            chrono::Duration::days(MAX_ROTATION_PERIOD_DAYS as i64)
        );

        cfg.key_rotation_period_days = MAX_ROTATION_PERIOD_DAYS;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn debug_never_prints_the_pepper() {
        let cfg = Config::new("super-secret-pepper");
        assert!(!format!("{cfg:?}").contains("super-secret-pepper"));
    }
}
