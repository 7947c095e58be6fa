use std::fs;
use std::path::{Path, PathBuf};

use danmaku::{IdentityTableConfig, MergeConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cli::Args;
use crate::error::{AppError, Result};

const APP_DIR: &str = "dmerge";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Base name of the checksum → user id table.
pub const IDENTITY_TABLE_FILE_NAME: &str = "dmerge_crc2uid.json";

/// Extension replacing the first input's one when no output is given.
pub const DEFAULT_OUTPUT_EXTENSION: &str = "merged.xml";

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Merge behaviour.
    pub merge: MergeConfig,
    /// Location of the identity table; defaults to the config directory.
    pub identity_table_path: Option<PathBuf>,
    /// Extension of the default output file.
    pub output_extension: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            merge: MergeConfig::default(),
            identity_table_path: None,
            output_extension: DEFAULT_OUTPUT_EXTENSION.to_string(),
        }
    }
}

impl AppConfig {
    /// Default configuration file path.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join(CONFIG_FILE_NAME))
    }

    /// Load configuration from `path`, or from the default location.
    ///
    /// An explicitly given file must exist; a missing default file yields the
    /// default configuration.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => match Self::default_path() {
                Some(path) => (path, false),
                None => return Ok(Self::default()),
            },
        };

        if !required && !path.is_file() {
            debug!("No configuration at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).map_err(|source| AppError::Read {
            path: path.clone(),
            source,
        })?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("{}: {e}", path.display())))?;
        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Apply command line overrides.
    pub fn apply_args(&mut self, args: &Args) -> Result<()> {
        if let Some(tolerance) = args.tolerance {
            self.merge.tolerance_secs = tolerance;
        }
        if let Some(timezone) = &args.timezone {
            self.merge.timezone = timezone.parse()?;
        }
        if let Some(path) = &args.id_table {
            self.identity_table_path = Some(path.clone());
        }
        if args.no_id_table {
            self.merge.identity_table = IdentityTableConfig::disabled();
        }
        self.merge.validate()?;
        Ok(())
    }

    /// Path of the checksum → user id table.
    pub fn identity_table_path(&self) -> PathBuf {
        self.identity_table_path.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .map(|dir| dir.join(APP_DIR))
                .unwrap_or_default()
                .join(IDENTITY_TABLE_FILE_NAME)
        })
    }

    /// Default output path derived from the first input.
    pub fn output_path(&self, first_input: &Path) -> PathBuf {
        first_input.with_extension(&self.output_extension)
    }

    /// Whether the identity table is used at all.
    pub fn uses_identity_table(&self) -> bool {
        let table = self.merge.identity_table;
        table.read || table.update || table.write
    }
}
