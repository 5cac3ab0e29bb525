//! Runtime configuration.
//!
//! Every section has a default, so an empty JSON object is a valid config file
//! and any subset of keys may be given.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{
    content::DEFAULT_HTLC_TIMEOUT_BLOCKS,
    error::ConfigError,
    pow::{MiningLimits, DEFAULT_MAX_ATTEMPTS},
    schema::SchemaSet,
};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DompConfig {
    pub pow: PowConfig,
    pub validation: ValidationConfig,
    pub escrow: EscrowConfig,
    pub reputation: ReputationConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowConfig {
    /// Difficulty in bits used when none is given.
    pub default_difficulty: u32,
    pub max_attempts: u64,
    /// Mining threads.
    pub workers: usize,
    /// Wall-clock budget for one mining run; `None` means unbounded.
    pub timeout_secs: Option<u64>,
}

impl Default for PowConfig {
    fn default() -> Self {
        Self {
            default_difficulty: 20,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            workers: 1,
            timeout_secs: Some(120),
        }
    }
}

impl PowConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Limits for a run starting now.
    pub fn limits(&self) -> MiningLimits {
        let limits = MiningLimits::with_max_attempts(self.max_attempts);
        match self.timeout() {
            Some(timeout) => limits.with_timeout(timeout),
            None => limits,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Schema set to load instead of the embedded one.
    pub schema_path: Option<PathBuf>,
    pub max_product_name_len: usize,
    /// A bid may be at most this percentage of the listing price.
    pub bid_tolerance_percent: u32,
    /// Reject events whose `created_at` is further than this from now.
    pub max_clock_skew_secs: Option<u64>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            schema_path: None,
            max_product_name_len: 100,
            bid_tolerance_percent: 110,
            max_clock_skew_secs: None,
        }
    }
}

impl ValidationConfig {
    pub fn schema_set(&self) -> Result<SchemaSet, ConfigError> {
        match &self.schema_path {
            Some(path) => SchemaSet::from_path(path),
            None => Ok(SchemaSet::embedded()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscrowConfig {
    pub default_timeout_blocks: u32,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            default_timeout_blocks: DEFAULT_HTLC_TIMEOUT_BLOCKS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationConfig {
    /// Per-day weight multiplier for older reviews.
    pub decay_factor: f64,
    /// Extra weight per million sats of transaction volume.
    pub volume_weight_factor: f64,
    /// Extra weight for each of verified purchase and completed escrow.
    pub verification_bonus: f64,
    /// Transactions needed before a rating tier is assigned.
    pub min_reviews_for_reliability: usize,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            decay_factor: 0.95,
            volume_weight_factor: 0.1,
            verification_bonus: 0.2,
            min_reviews_for_reliability: 5,
        }
    }
}

impl DompConfig {
    /// Load and check a JSON config file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: Self = serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.check()?;
        Ok(config)
    }

    /// Reject values no component can work with.
    pub fn check(&self) -> Result<(), ConfigError> {
        if self.pow.workers == 0 {
            return Err(ConfigError::Invalid("pow.workers must be at least 1".into()));
        }
        if self.pow.max_attempts == 0 {
            return Err(ConfigError::Invalid("pow.max_attempts must be at least 1".into()));
        }
        if self.validation.bid_tolerance_percent < 100 {
            return Err(ConfigError::Invalid(
                "validation.bid_tolerance_percent must be at least 100".into(),
            ));
        }
        if !(self.reputation.decay_factor > 0.0 && self.reputation.decay_factor <= 1.0) {
            return Err(ConfigError::Invalid(
                "reputation.decay_factor must be in (0, 1]".into(),
            ));
        }
        if self.reputation.volume_weight_factor < 0.0 || self.reputation.verification_bonus < 0.0 {
            return Err(ConfigError::Invalid(
                "reputation weights cannot be negative".into(),
            ));
        }
        Ok(())
    }
}
