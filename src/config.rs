//! Project configuration.
//!
//! Handles loading, validating, and merging `project.toml`. Stock defaults are
//! serialized to a TOML value, the user's file is merged on top, and the merged
//! table is deserialized and validated. Files are sparse: override only what
//! you need.
//!
//! ## Configuration Options
//!
//! ```toml
//! [project]
//! name = "My Site"
//! locale = "en"            # Language used for labels
//! hidden_prefix = "_"      # Segments starting with this are hidden from navigation
//! output_path = "build"    # Relative to the project root
//!
//! [[alternatives]]
//! id = "en"
//! name = "English"
//! primary = true
//!
//! [[alternatives]]
//! id = "de"
//! name = "German"
//! url_prefix = "/de/"
//! locale = "de"
//!
//! [servers.production]
//! name = "Production"
//! target = "file:///srv/www/site"
//!
//! [processing]
//! max_processes = 4        # Parallel workers for hashing (omit for auto)
//! ```
//!
//! Alternatives are an array so their configured order is preserved; that
//! order drives alt listings and URL generation. Unknown keys are rejected to
//! catch typos early.

use crate::slug::{self, PRIMARY_ALT};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Name of the project file at the project root.
pub const PROJECT_FILENAME: &str = "project.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Project configuration loaded from `project.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectConfig {
    /// General project settings.
    pub project: ProjectSection,
    /// Configured alts in declaration order.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<AltConfig>,
    /// Publish targets keyed by id.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub servers: BTreeMap<String, ServerConfig>,
    /// Parallel processing settings.
    pub processing: ProcessingConfig,
}

/// The `[project]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProjectSection {
    /// Human name of the site.
    pub name: String,
    /// Language of labels in `label_i18n` maps.
    pub locale: String,
    /// Segment prefix that hides a subtree from navigation. Empty disables it.
    pub hidden_prefix: String,
    /// Build output directory, relative to the project root.
    pub output_path: String,
}

impl Default for ProjectSection {
    fn default() -> Self {
        Self {
            name: "Lectern Site".to_string(),
            locale: "en".to_string(),
            hidden_prefix: "_".to_string(),
            output_path: "build".to_string(),
        }
    }
}

/// One `[[alternatives]]` entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AltConfig {
    pub id: String,
    pub name: String,
    pub primary: bool,
    /// URL prefix such as `/de/`. Required for non-primary alts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url_prefix: Option<String>,
    /// Language of this alt; defaults to the project locale.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
}

/// One `[servers.<id>]` entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    pub name: String,
    /// Target URL, `scheme://location`.
    pub target: String,
    /// Marks the target used when none is named.
    pub default: bool,
}

/// Parallel processing settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel workers. When absent, defaults to the
    /// number of CPU cores. Values larger than the core count are clamped.
    pub max_processes: Option<usize>,
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

impl ProjectConfig {
    /// Validate config values are consistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.project.locale.trim().is_empty() {
            return Err(ConfigError::Validation(
                "project.locale must not be empty".into(),
            ));
        }
        if self.project.output_path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "project.output_path must not be empty".into(),
            ));
        }
        let primaries = self.alternatives.iter().filter(|a| a.primary).count();
        if !self.alternatives.is_empty() && primaries != 1 {
            return Err(ConfigError::Validation(format!(
                "exactly one alternative must be primary, found {primaries}"
            )));
        }
        let mut seen = Vec::new();
        for alt in &self.alternatives {
            if alt.id == PRIMARY_ALT || !slug::is_valid_id(&alt.id) {
                return Err(ConfigError::Validation(format!(
                    "invalid alternative id '{}'",
                    alt.id
                )));
            }
            if seen.contains(&alt.id.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "duplicate alternative id '{}'",
                    alt.id
                )));
            }
            seen.push(alt.id.as_str());
            if !alt.primary {
                match alt.url_prefix.as_deref() {
                    Some(p) if p.len() > 2 && p.starts_with('/') && p.ends_with('/') => {}
                    _ => {
                        return Err(ConfigError::Validation(format!(
                            "alternative '{}' needs a url_prefix like \"/{}/\"",
                            alt.id, alt.id
                        )));
                    }
                }
            }
        }
        for (id, server) in &self.servers {
            if !server.target.contains("://") {
                return Err(ConfigError::Validation(format!(
                    "servers.{id}.target must look like scheme://location"
                )));
            }
        }
        Ok(())
    }

    /// Resolved alt set, primary first.
    pub fn alt_set(&self) -> AltSet {
        AltSet::from_config(self)
    }
}

// =============================================================================
// Alts
// =============================================================================

/// A resolved alt.
///
/// The primary alt is always reported as [`PRIMARY_ALT`]; its configured id
/// (e.g. `en`) is accepted as an alias on input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Alt {
    pub id: String,
    #[serde(skip)]
    pub alias: Option<String>,
    pub name: String,
    pub is_primary: bool,
    /// Prefix of every URL in this alt, `/` for the primary.
    pub url_prefix: String,
    pub locale: String,
}

impl Alt {
    /// Content file holding this alt's fields inside a record directory.
    pub fn content_filename(&self) -> String {
        if self.is_primary {
            "contents.lr".to_string()
        } else {
            format!("contents+{}.lr", self.id)
        }
    }
}

/// All configured alts in listing order (primary first).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AltSet {
    alts: Vec<Alt>,
}

impl AltSet {
    fn from_config(config: &ProjectConfig) -> Self {
        let locale = config.project.locale.clone();
        let primary = config.alternatives.iter().find(|a| a.primary);
        let mut alts = vec![Alt {
            id: PRIMARY_ALT.to_string(),
            alias: primary.map(|a| a.id.clone()),
            name: primary
                .map(|a| a.name.clone())
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| "Primary".to_string()),
            is_primary: true,
            url_prefix: "/".to_string(),
            locale: primary
                .and_then(|a| a.locale.clone())
                .unwrap_or_else(|| locale.clone()),
        }];
        for alt in config.alternatives.iter().filter(|a| !a.primary) {
            alts.push(Alt {
                id: alt.id.clone(),
                alias: None,
                name: if alt.name.is_empty() {
                    alt.id.clone()
                } else {
                    alt.name.clone()
                },
                is_primary: false,
                url_prefix: alt.url_prefix.clone().unwrap_or_else(|| format!("/{}/", alt.id)),
                locale: alt.locale.clone().unwrap_or_else(|| locale.clone()),
            });
        }
        Self { alts }
    }

    /// The primary alt.
    pub fn primary(&self) -> &Alt {
        &self.alts[0]
    }

    /// Look up an alt by id, accepting `_primary` and the primary's alias.
    pub fn get(&self, name: &str) -> Option<&Alt> {
        self.alts
            .iter()
            .find(|a| a.id == name || a.alias.as_deref() == Some(name))
    }

    /// Alt owning an overlay file name such as `contents+de.lr`.
    pub fn for_overlay_file(&self, filename: &str) -> Option<&Alt> {
        let id = filename.strip_prefix("contents+")?.strip_suffix(".lr")?;
        self.alts.iter().find(|a| !a.is_primary && a.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Alt> {
        self.alts.iter()
    }

    pub fn len(&self) -> usize {
        self.alts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alts.is_empty()
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(ProjectConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `project.toml` from a project root as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist.
pub fn load_raw_config(root: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = root.join(PROJECT_FILENAME);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<ProjectConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: ProjectConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load the project configuration from a project root.
pub fn load_config(root: &Path) -> Result<ProjectConfig, ConfigError> {
    let base = stock_defaults_value()?;
    let overlay = load_raw_config(root)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `project.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# Lectern Project Configuration
# =============================
# All settings are optional. Values shown below are the defaults.
# Unknown keys will cause an error.

[project]
# Human name of the site.
name = "Lectern Site"

# Language used for labels (label_i18n keys).
locale = "en"

# Path segments starting with this prefix are hidden from navigation but
# still built and previewable. Set to "" to disable.
hidden_prefix = "_"

# Build output directory, relative to the project root.
output_path = "build"

# ---------------------------------------------------------------------------
# Alternatives (localized overlays)
# ---------------------------------------------------------------------------
# Each record may carry contents+<id>.lr next to its contents.lr. Exactly one
# alternative is primary; every other one needs a url_prefix.
#
# [[alternatives]]
# id = "en"
# name = "English"
# primary = true
#
# [[alternatives]]
# id = "de"
# name = "German"
# url_prefix = "/de/"
# locale = "de"

# ---------------------------------------------------------------------------
# Publish targets
# ---------------------------------------------------------------------------
# [servers.production]
# name = "Production"
# target = "file:///srv/www/site"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel workers used while hashing sources.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4
"##
}
