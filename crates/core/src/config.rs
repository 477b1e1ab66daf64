//! Staging runtime settings.
//!
//! Settings are resolved once at process startup and then passed into services. The staging
//! primitives never read process-wide environment variables while an operation is running.
//! The binary resolves values from the environment (after loading `.env`); tests resolve them
//! from an in-memory map through [`StagingSettings::from_lookup`].

use crate::constants::DEFAULT_GLOBAL_SECRET;
use crate::{StagingError, StagingResult};
use serde::{Serialize, Serializer};
use staging_cipher::SecretCipher;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const MAX_PARALLEL_TRANSFERS_KEY: &str = "STAGING_MAX_PARALLEL_TRANSFERS";
pub const MAX_PARALLEL_INGESTS_KEY: &str = "STAGING_MAX_PARALLEL_INGESTS";
pub const MAX_PARALLEL_DOWNLOADS_KEY: &str = "STAGING_MAX_PARALLEL_DOWNLOADS";
pub const MAX_INGEST_LIFETIME_KEY: &str = "STAGING_MAX_INGEST_LIFETIME";
pub const MAX_DOWNLOAD_LIFETIME_KEY: &str = "STAGING_MAX_DOWNLOAD_LIFETIME";
pub const GLOBAL_SECRET_KEY: &str = "GENERAL_GLOBAL_SECRET";
pub const PRODUCTION_MODE_KEY: &str = "GENERAL_PRODUCTION_MODE";
pub const SCRIPT_DIR_KEY: &str = "STAGING_SCRIPT_DIR";

const ONE_WEEK_SECS: u64 = 60 * 60 * 24 * 7;

/// Settings consumed by the staging layer.
#[derive(Clone, Serialize)]
pub struct StagingSettings {
    max_parallel_transfers: usize,
    max_parallel_ingests: usize,
    max_parallel_downloads: usize,
    max_ingest_lifetime_secs: u64,
    max_download_lifetime_secs: u64,
    #[serde(serialize_with = "redacted")]
    global_secret: String,
    production_mode: bool,
    script_dir: PathBuf,
}

impl Default for StagingSettings {
    fn default() -> Self {
        Self {
            max_parallel_transfers: 10,
            max_parallel_ingests: 2,
            max_parallel_downloads: 2,
            max_ingest_lifetime_secs: ONE_WEEK_SECS,
            max_download_lifetime_secs: ONE_WEEK_SECS,
            global_secret: DEFAULT_GLOBAL_SECRET.to_string(),
            production_mode: false,
            script_dir: std::env::temp_dir(),
        }
    }
}

impl StagingSettings {
    /// Resolves settings through `lookup`, falling back to defaults for missing or blank keys.
    ///
    /// # Errors
    ///
    /// Returns `StagingError::InvalidInput` if a numeric or boolean value cannot be parsed,
    /// or if a parallelism limit is zero.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> StagingResult<Self> {
        let defaults = Self::default();
        let value = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let settings = Self {
            max_parallel_transfers: parse_or(
                value(MAX_PARALLEL_TRANSFERS_KEY),
                MAX_PARALLEL_TRANSFERS_KEY,
                defaults.max_parallel_transfers,
            )?,
            max_parallel_ingests: parse_or(
                value(MAX_PARALLEL_INGESTS_KEY),
                MAX_PARALLEL_INGESTS_KEY,
                defaults.max_parallel_ingests,
            )?,
            max_parallel_downloads: parse_or(
                value(MAX_PARALLEL_DOWNLOADS_KEY),
                MAX_PARALLEL_DOWNLOADS_KEY,
                defaults.max_parallel_downloads,
            )?,
            max_ingest_lifetime_secs: parse_or(
                value(MAX_INGEST_LIFETIME_KEY),
                MAX_INGEST_LIFETIME_KEY,
                defaults.max_ingest_lifetime_secs,
            )?,
            max_download_lifetime_secs: parse_or(
                value(MAX_DOWNLOAD_LIFETIME_KEY),
                MAX_DOWNLOAD_LIFETIME_KEY,
                defaults.max_download_lifetime_secs,
            )?,
            global_secret: value(GLOBAL_SECRET_KEY).unwrap_or(defaults.global_secret),
            production_mode: parse_or(
                value(PRODUCTION_MODE_KEY),
                PRODUCTION_MODE_KEY,
                defaults.production_mode,
            )?,
            script_dir: value(SCRIPT_DIR_KEY)
                .map(PathBuf::from)
                .unwrap_or(defaults.script_dir),
        };

        for (key, limit) in [
            (MAX_PARALLEL_TRANSFERS_KEY, settings.max_parallel_transfers),
            (MAX_PARALLEL_INGESTS_KEY, settings.max_parallel_ingests),
            (MAX_PARALLEL_DOWNLOADS_KEY, settings.max_parallel_downloads),
        ] {
            if limit == 0 {
                return Err(StagingError::InvalidInput(format!(
                    "{key} must be greater than zero"
                )));
            }
        }

        Ok(settings)
    }

    pub fn with_global_secret(mut self, secret: impl Into<String>) -> Self {
        self.global_secret = secret.into();
        self
    }

    pub fn with_production_mode(mut self, production_mode: bool) -> Self {
        self.production_mode = production_mode;
        self
    }

    pub fn with_script_dir(mut self, script_dir: PathBuf) -> Self {
        self.script_dir = script_dir;
        self
    }

    pub fn max_parallel_transfers(&self) -> usize {
        self.max_parallel_transfers
    }

    pub fn max_parallel_ingests(&self) -> usize {
        self.max_parallel_ingests
    }

    pub fn max_parallel_downloads(&self) -> usize {
        self.max_parallel_downloads
    }

    pub fn max_ingest_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_ingest_lifetime_secs)
    }

    pub fn max_download_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_download_lifetime_secs)
    }

    pub fn production_mode(&self) -> bool {
        self.production_mode
    }

    /// Directory where guard scripts are materialised.
    pub fn script_dir(&self) -> &Path {
        &self.script_dir
    }

    /// Whether the global secret is still the documented development default.
    pub fn uses_default_secret(&self) -> bool {
        self.global_secret == DEFAULT_GLOBAL_SECRET
    }

    /// Builds the process-wide secret cipher keyed by the global secret.
    ///
    /// # Errors
    ///
    /// Returns `StagingError::DefaultSecretInProduction` if production mode is enabled while
    /// the development secret is configured, or `StagingError::Cipher` if the secret is not
    /// 16, 24 or 32 bytes long.
    pub fn secret_cipher(&self) -> StagingResult<SecretCipher> {
        if self.uses_default_secret() {
            if self.production_mode {
                return Err(StagingError::DefaultSecretInProduction);
            }
            tracing::warn!("Using the development global secret; configure {GLOBAL_SECRET_KEY}");
        }
        Ok(SecretCipher::new(self.global_secret.as_bytes())?)
    }
}

impl std::fmt::Debug for StagingSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingSettings")
            .field("max_parallel_transfers", &self.max_parallel_transfers)
            .field("max_parallel_ingests", &self.max_parallel_ingests)
            .field("max_parallel_downloads", &self.max_parallel_downloads)
            .field("max_ingest_lifetime_secs", &self.max_ingest_lifetime_secs)
            .field("max_download_lifetime_secs", &self.max_download_lifetime_secs)
            .field("global_secret", &"<redacted>")
            .field("production_mode", &self.production_mode)
            .field("script_dir", &self.script_dir)
            .finish()
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> StagingResult<T> {
    match value {
        None => Ok(default),
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| StagingError::InvalidInput(format!("{key} has invalid value '{raw}'"))),
    }
}

fn redacted<T, S: Serializer>(_: &T, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str("<redacted>")
}
