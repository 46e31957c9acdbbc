//! Replay configuration
//!
//! Ledger variants, executable names, store tooling and measurement cadence.
//! Loaded from TOML; every key has a default so an empty file is valid.

use crate::measure::store::DEFAULT_MARKER_NAMESPACE;
use crate::measure::sync_timing::SyncCommands;
use crate::replay::ledger::LedgerCommands;
use crate::replay::measurement::DEFAULT_MEASUREMENT_INTERVAL;
use crate::replay::records::NULL_ACCOUNT;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

pub const CONFIG_PATH_ENV: &str = "REPLAY_CONFIG_PATH";
pub const DEFAULT_CONFIG_PATH: &str = "replay.toml";

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: std::io::Error },
    Parse { path: PathBuf, source: toml::de::Error },
    Serialize(toml::ser::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "cannot read {}: {}", path.display(), source),
            Self::Parse { path, source } => write!(f, "invalid config {}: {}", path.display(), source),
            Self::Serialize(e) => write!(f, "cannot serialize config: {}", e),
            Self::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Which ledger encoding to replay against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    State,
    Delta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayConfig {
    /// Ledger calls between snapshots
    #[serde(default = "default_measurement_interval")]
    pub measurement_interval: u64,

    /// Reserved identifier marking mint (as sender) and burn (as recipient)
    #[serde(default = "default_null_account")]
    pub null_account: String,

    #[serde(default = "default_tmp_path")]
    pub tmp_path: PathBuf,

    #[serde(default = "default_results_path")]
    pub results_path: PathBuf,

    #[serde(default)]
    pub variants: Variants,

    #[serde(default)]
    pub commands: LedgerCommands,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

fn default_measurement_interval() -> u64 {
    DEFAULT_MEASUREMENT_INTERVAL
}

fn default_null_account() -> String {
    NULL_ACCOUNT.to_string()
}

fn default_tmp_path() -> PathBuf {
    PathBuf::from("./tmp")
}

fn default_results_path() -> PathBuf {
    PathBuf::from("./results")
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            measurement_interval: default_measurement_interval(),
            null_account: default_null_account(),
            tmp_path: default_tmp_path(),
            results_path: default_results_path(),
            variants: Variants::default(),
            commands: LedgerCommands::default(),
            store: StoreConfig::default(),
            sync: SyncConfig::default(),
        }
    }
}

impl ReplayConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `REPLAY_CONFIG_PATH` or `replay.toml`, falling back to defaults when absent.
    pub fn from_env() -> Result<Self, ConfigError> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        if !Path::new(&path).exists() {
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    /// Save to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.measurement_interval == 0 {
            return Err(ConfigError::Invalid(
                "measurement_interval must be greater than zero".into(),
            ));
        }
        if self.null_account.trim().is_empty() {
            return Err(ConfigError::Invalid("null_account must not be empty".into()));
        }
        if self.store.marker_namespace.trim_end_matches('/').is_empty() {
            return Err(ConfigError::Invalid("store.marker_namespace must not be empty".into()));
        }
        Ok(())
    }

    pub fn variant(&self, variant: Variant) -> &VariantConfig {
        match variant {
            Variant::State => &self.variants.state,
            Variant::Delta => &self.variants.delta,
        }
    }

    /// `<tmp_path>/<label>` for `variant`.
    pub fn variant_tmp_dir(&self, variant: Variant) -> PathBuf {
        self.tmp_path.join(self.variant(variant).label())
    }

    /// `<results_path>/<label>` for `variant`.
    pub fn variant_results_dir(&self, variant: Variant) -> PathBuf {
        self.results_path.join(self.variant(variant).label())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variants {
    #[serde(default = "default_state_variant")]
    pub state: VariantConfig,
    #[serde(default = "default_delta_variant")]
    pub delta: VariantConfig,
}

fn default_state_variant() -> VariantConfig {
    VariantConfig {
        bin_dir: PathBuf::from("./single-repo-git-goc"),
        ledger_dir: PathBuf::from("./accounts"),
        full_bin_dir: PathBuf::from("../git-goc"),
        label: None,
    }
}

fn default_delta_variant() -> VariantConfig {
    VariantConfig {
        bin_dir: PathBuf::from("./single-repo-git-goc-delta"),
        ledger_dir: PathBuf::from("./delta-accounts"),
        full_bin_dir: PathBuf::from("../git-goc-delta"),
        label: None,
    }
}

impl Default for Variants {
    fn default() -> Self {
        Self {
            state: default_state_variant(),
            delta: default_delta_variant(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantConfig {
    /// Directory holding the single-repo ledger executables
    pub bin_dir: PathBuf,
    /// Ledger state directory; wiped at the start of every run
    pub ledger_dir: PathBuf,
    /// Executables of the one-author-per-repo ledger, used by sync timing
    pub full_bin_dir: PathBuf,
    /// Results/tmp subdirectory name; defaults to the last component of `bin_dir`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl VariantConfig {
    pub fn label(&self) -> String {
        self.label.clone().unwrap_or_else(|| {
            self.bin_dir
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "ledger".to_string())
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_git")]
    pub git: PathBuf,
    #[serde(default = "default_sizer")]
    pub sizer: PathBuf,
    /// Ref namespace holding the heads already covered by an incremental bundle
    #[serde(default = "default_marker_namespace")]
    pub marker_namespace: String,
    /// Persist incremental bundles as `delta_bundles/<count>.bundle`
    #[serde(default)]
    pub keep_incremental_bundles: bool,
}

fn default_git() -> PathBuf {
    PathBuf::from("git")
}

fn default_sizer() -> PathBuf {
    PathBuf::from("git-sizer")
}

fn default_marker_namespace() -> String {
    DEFAULT_MARKER_NAMESPACE.to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            git: default_git(),
            sizer: default_sizer(),
            marker_namespace: default_marker_namespace(),
            keep_incremental_bundles: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Time replica sync at each snapshot
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub commands: SyncCommands,
}
