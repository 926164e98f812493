//! Defaults table: the process-local declaration of every known key.
//!
//! Loaded once at process start and read-only afterwards. Each entry fixes
//! the key's kind and provides the preloaded default used when neither the
//! cache, the store nor the caller can supply a value.

use crate::error::DefaultsError;
use crate::{ConfigKey, ConfigKind, ConfigValue};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// Declared default for one key.
#[derive(Debug, Clone, PartialEq)]
pub struct DefaultEntry {
    pub default: ConfigValue,
    pub kind: ConfigKind,
    pub help: String,
}

/// Static mapping of key to declared default and kind.
#[derive(Debug, Clone, Default)]
pub struct DefaultsTable {
    /// Keys in declaration order.
    order: Vec<ConfigKey>,
    entries: HashMap<ConfigKey, DefaultEntry>,
}

#[derive(Debug, Deserialize)]
struct RawEntry {
    default: ConfigValue,
    #[serde(default)]
    help: String,
    kind: Option<ConfigKind>,
}

impl DefaultsTable {
    /// An empty table. Every lookup misses.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder() -> DefaultsTableBuilder {
        DefaultsTableBuilder::default()
    }

    /// Parse a TOML document of the form:
    ///
    /// ```toml
    /// [MAX_RETRIES]
    /// default = 3
    /// help = "Activity processing retries"
    /// kind = "int"        # optional, inferred from `default`
    /// ```
    pub fn from_toml_str(source: &str) -> Result<Self, DefaultsError> {
        let table: toml::Table = toml::from_str(source).map_err(|e| DefaultsError::Parse {
            reason: e.to_string(),
        })?;

        let mut builder = Self::builder();
        for (key, value) in table {
            let raw: RawEntry = value.try_into().map_err(|e: toml::de::Error| {
                DefaultsError::Parse {
                    reason: format!("{}: {}", key, e),
                }
            })?;
            builder = match raw.kind {
                Some(kind) => builder.entry_with_kind(key, kind, raw.default, raw.help),
                None => builder.entry(key, raw.default, raw.help),
            };
        }
        builder.build()
    }

    /// Read and parse a TOML defaults file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DefaultsError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| DefaultsError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&source)
    }

    /// Load a defaults file, degrading to an empty table on any failure.
    ///
    /// A broken defaults file must not stop the process: reads still work
    /// against the store, they only lose their last-resort fallback.
    pub fn load_or_empty(path: impl AsRef<Path>) -> Self {
        match Self::load(path.as_ref()) {
            Ok(table) => {
                tracing::info!(
                    path = %path.as_ref().display(),
                    keys = table.len(),
                    "Loaded default config values"
                );
                table
            }
            Err(e) => {
                tracing::error!(
                    path = %path.as_ref().display(),
                    error = %e,
                    "Failed to load default config values, continuing with none"
                );
                Self::empty()
            }
        }
    }

    /// Preloaded default for `key`.
    pub fn get(&self, key: &ConfigKey) -> Option<&ConfigValue> {
        self.entries.get(key).map(|entry| &entry.default)
    }

    pub fn entry(&self, key: &ConfigKey) -> Option<&DefaultEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &ConfigKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys in declaration order.
    pub fn keys(&self) -> impl Iterator<Item = &ConfigKey> {
        self.order.iter()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Builder for [`DefaultsTable`].
#[derive(Debug, Default)]
pub struct DefaultsTableBuilder {
    pending: Vec<(ConfigKey, Option<ConfigKind>, ConfigValue, String)>,
}

impl DefaultsTableBuilder {
    /// Declare a key whose kind is inferred from its default.
    pub fn entry(
        mut self,
        key: impl Into<ConfigKey>,
        default: impl Into<ConfigValue>,
        help: impl Into<String>,
    ) -> Self {
        self.pending
            .push((key.into(), None, default.into(), help.into()));
        self
    }

    /// Declare a key with an explicit kind.
    pub fn entry_with_kind(
        mut self,
        key: impl Into<ConfigKey>,
        kind: ConfigKind,
        default: impl Into<ConfigValue>,
        help: impl Into<String>,
    ) -> Self {
        self.pending
            .push((key.into(), Some(kind), default.into(), help.into()));
        self
    }

    pub fn build(self) -> Result<DefaultsTable, DefaultsError> {
        let mut table = DefaultsTable::default();
        for (key, kind, default, help) in self.pending {
            if table.entries.contains_key(&key) {
                return Err(DefaultsError::Duplicate { key });
            }
            let kind = match kind {
                Some(declared) if !declared.accepts(&default) => {
                    return Err(DefaultsError::KindMismatch { key, declared });
                }
                Some(declared) => declared,
                None => default.kind(),
            };
            table.order.push(key.clone());
            table
                .entries
                .insert(key, DefaultEntry { default, kind, help });
        }
        Ok(table)
    }
}

// =============================================================================
// TESTS
// =============================================================================
