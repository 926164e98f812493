//! rtconf Core - Configuration Types
//!
//! Pure data structures shared by every other crate: keys, typed scalar
//! values, the defaults table, change log records, circuit state, health
//! reporting, process settings and the error taxonomy.
//!
//! The cache itself is type-agnostic. Values are stored and handed back
//! opaquely; the coercion helpers on [`ConfigValue`] exist for callers.

pub mod audit;
pub mod circuit;
pub mod defaults;
pub mod error;
pub mod health;
pub mod settings;

pub use audit::ChangeLogRecord;
pub use circuit::{CircuitSnapshot, CircuitState};
pub use defaults::{DefaultEntry, DefaultsTable, DefaultsTableBuilder};
pub use error::{
    ChangeLogError, ConfigError, DefaultsError, RtconfError, RtconfResult, StoreError,
    StoreResult,
};
pub use health::{HealthCheck, HealthStatus};
pub use settings::RealtimeSettings;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

// ============================================================================
// CONFIG KEY
// ============================================================================

/// Identifier of a configuration entry.
///
/// Keys are predefined by the hosting application (the defaults table and
/// the source-of-truth store). The cache never invents one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigKey(String);

impl ConfigKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ConfigKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConfigKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for ConfigKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl AsRef<str> for ConfigKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// CONFIG VALUE
// ============================================================================

/// Kind of scalar a key holds, fixed per key by the defaults table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigKind {
    String,
    Int,
    Float,
    Bool,
}

impl ConfigKind {
    /// Whether a value of this kind may be stored under a key of `self`.
    ///
    /// Integers are accepted where floats are declared.
    pub fn accepts(&self, value: &ConfigValue) -> bool {
        matches!(
            (self, value),
            (Self::String, ConfigValue::Str(_))
                | (Self::Int, ConfigValue::Int(_))
                | (Self::Float, ConfigValue::Float(_))
                | (Self::Float, ConfigValue::Int(_))
                | (Self::Bool, ConfigValue::Bool(_))
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Bool => "bool",
        }
    }
}

impl fmt::Display for ConfigKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed configuration scalar.
///
/// Serialized untagged, so `3`, `2.5`, `true` and `"text"` round-trip
/// through JSON and TOML as plain scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl ConfigValue {
    pub fn kind(&self) -> ConfigKind {
        match self {
            Self::Str(_) => ConfigKind::String,
            Self::Int(_) => ConfigKind::Int,
            Self::Float(_) => ConfigKind::Float,
            Self::Bool(_) => ConfigKind::Bool,
        }
    }

    /// Borrow the string payload, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Coerce to an integer.
    ///
    /// Accepts integers, floats with no fractional part and strings that
    /// parse as integers.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            Self::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Coerce to a float.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Str(s) => s.trim().parse().ok(),
            Self::Bool(_) => None,
        }
    }

    /// Coerce to a boolean.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            Self::Str(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            Self::Int(1) => Some(true),
            Self::Int(0) => Some(false),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => f.write_str(s),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for ConfigValue {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

// =============================================================================
// TESTS
// =============================================================================
