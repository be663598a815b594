//! Configuration management for refscan
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (refscan.toml)
//! - Environment variables (REFSCAN__*)
//!
//! ## Example config file (refscan.toml):
//! ```toml
//! [schema]
//! path = "schema/vehicles.yaml"
//! database_class = "Database"
//!
//! [database]
//! directory = "./dump"
//!
//! [scan]
//! skip_collections = ["audit_log"]
//! batch_size = 1000
//! workers = 4
//! locator_workers = 2
//! locate_misplaced_documents = true
//!
//! [reports]
//! reference_report = "references.tsv"
//! violation_report = "violations.tsv"
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::scan::ScanOptions;
use crate::schema::DEFAULT_DATABASE_CLASS;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefscanConfig {
    #[serde(default)]
    pub schema: SchemaSection,

    #[serde(default)]
    pub database: DatabaseSection,

    #[serde(default)]
    pub scan: ScanSection,

    #[serde(default)]
    pub reports: ReportSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSection {
    /// Schema file (YAML or JSON)
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Class whose slots declare the collections
    #[serde(default = "default_database_class")]
    pub database_class: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSection {
    /// Directory of `<collection>.jsonl` files
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanSection {
    #[serde(default)]
    pub skip_collections: Vec<String>,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_locator_workers")]
    pub locator_workers: usize,

    #[serde(default)]
    pub locate_misplaced_documents: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportSection {
    #[serde(default = "default_reference_report")]
    pub reference_report: PathBuf,

    #[serde(default = "default_violation_report")]
    pub violation_report: PathBuf,
}

// Default value functions
fn default_database_class() -> String {
    DEFAULT_DATABASE_CLASS.to_string()
}

fn default_batch_size() -> usize {
    1000
}

fn default_workers() -> usize {
    4
}

fn default_locator_workers() -> usize {
    2
}

fn default_reference_report() -> PathBuf {
    PathBuf::from("references.tsv")
}

fn default_violation_report() -> PathBuf {
    PathBuf::from("violations.tsv")
}

impl Default for SchemaSection {
    fn default() -> Self {
        Self {
            path: None,
            database_class: default_database_class(),
        }
    }
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            skip_collections: Vec::new(),
            batch_size: default_batch_size(),
            workers: default_workers(),
            locator_workers: default_locator_workers(),
            locate_misplaced_documents: false,
        }
    }
}

impl Default for ReportSection {
    fn default() -> Self {
        Self {
            reference_report: default_reference_report(),
            violation_report: default_violation_report(),
        }
    }
}

impl RefscanConfig {
    /// Load configuration, with an explicit file layered over the defaults
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = ["refscan.toml", ".refscan.toml", "config/refscan.toml"];
        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        // XDG config directory
        if let Some(config_dir) = directories::ProjectDirs::from("org", "refscan", "refscan") {
            let xdg_config = config_dir.config_dir().join("refscan.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        // REFSCAN__SCAN__WORKERS=8 etc.
        builder = builder.add_source(
            Environment::with_prefix("REFSCAN")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("scan.skip_collections")
                .try_parsing(true),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Scan options with worker counts clamped; the locator never outgrows the scan pool
    pub fn scan_options(&self) -> ScanOptions {
        let workers = self.scan.workers.max(1);
        ScanOptions {
            skip_collections: self.scan.skip_collections.clone(),
            batch_size: self.scan.batch_size.max(1),
            workers,
            locator_workers: self.scan.locator_workers.clamp(1, workers),
            locate_misplaced_documents: self.scan.locate_misplaced_documents,
        }
    }
}
