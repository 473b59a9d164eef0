//! Expander configuration
//!
//! Every field has a default, so an empty TOML document is a valid
//! configuration:
//!
//! ```toml
//! max_expansions = 10000
//! max_call_depth = 128
//! track_locations = true
//! names = "fresh"
//! default_dialect = "base"
//! entry_dialect = "sweet"
//! ```

use serde::Deserialize;
use std::fmt;
use std::path::Path;

use crate::loader::Dialect;

/// Default evaluator recursion limit
pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

/// How renamed bindings are written into the output tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NameRendering {
    /// `<<hygiene>>` for every renamed binding and every reference to one
    #[default]
    Placeholder,
    /// The unique fresh name (`x%3`)
    Fresh,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExpanderConfig {
    /// Macro invocations allowed per run; unbounded when absent
    pub max_expansions: Option<usize>,
    pub max_call_depth: usize,
    /// Fill `loc` on every output node
    pub track_locations: bool,
    pub names: NameRendering,
    /// Dialect of imported modules that carry no `#lang` pragma
    pub default_dialect: Dialect,
    /// Dialect of the entry program when it carries no pragma
    pub entry_dialect: Dialect,
}

impl Default for ExpanderConfig {
    fn default() -> Self {
        Self {
            max_expansions: None,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            track_locations: false,
            names: NameRendering::Placeholder,
            default_dialect: Dialect::Base,
            entry_dialect: Dialect::Sweet,
        }
    }
}

impl ExpanderConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(ConfigError::Toml)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|error| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            error,
        })?;
        Self::from_toml_str(&text)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: String,
        error: std::io::Error,
    },
    Toml(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, error } => {
                write!(f, "cannot read config '{}': {}", path, error)
            }
            ConfigError::Toml(error) => write!(f, "invalid config: {}", error),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { error, .. } => Some(error),
            ConfigError::Toml(error) => Some(error),
        }
    }
}
