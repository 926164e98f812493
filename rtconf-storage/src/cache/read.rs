//! Result of a configuration read, carrying where the value came from.
//!
//! `get` never fails. Callers that care can still tell a fresh store value
//! from a fallback, and an explicit "no value anywhere" from a real value.

use rtconf_core::{ConfigError, ConfigKey, ConfigValue, RtconfResult};

/// Where a resolved value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueSource {
    /// Local cache hit.
    Cache,
    /// Read from the source-of-truth store and cached.
    Store,
    /// The default passed by the caller.
    CallerDefault,
    /// The preloaded default from the defaults table.
    PreloadedDefault,
    /// Nothing available.
    Unavailable,
}

impl ValueSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Store => "store",
            Self::CallerDefault => "caller_default",
            Self::PreloadedDefault => "preloaded_default",
            Self::Unavailable => "unavailable",
        }
    }

    /// Whether the value came from the fallback chain.
    pub fn is_fallback(&self) -> bool {
        matches!(
            self,
            Self::CallerDefault | Self::PreloadedDefault | Self::Unavailable
        )
    }
}

/// A resolved configuration value and its provenance.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigRead {
    value: Option<ConfigValue>,
    source: ValueSource,
}

impl ConfigRead {
    pub fn new(value: ConfigValue, source: ValueSource) -> Self {
        Self {
            value: Some(value),
            source,
        }
    }

    /// The explicit "no value" result.
    pub fn unavailable() -> Self {
        Self {
            value: None,
            source: ValueSource::Unavailable,
        }
    }

    pub fn value(&self) -> Option<&ConfigValue> {
        self.value.as_ref()
    }

    pub fn into_value(self) -> Option<ConfigValue> {
        self.value
    }

    pub fn source(&self) -> ValueSource {
        self.source
    }

    pub fn is_unavailable(&self) -> bool {
        self.value.is_none()
    }

    pub fn is_fallback(&self) -> bool {
        self.source.is_fallback()
    }

    /// The value, or [`ConfigError::Unavailable`] for callers that cannot
    /// proceed without one.
    pub fn require(self, key: &ConfigKey) -> RtconfResult<ConfigValue> {
        self.value.ok_or_else(|| {
            ConfigError::Unavailable { key: key.clone() }.into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtconf_core::RtconfError;

    #[test]
    fn test_unavailable_has_no_value() {
        let read = ConfigRead::unavailable();
        assert!(read.is_unavailable());
        assert!(read.is_fallback());
        assert_eq!(read.value(), None);
        let err = read.require(&"SITE_NAME".into()).unwrap_err();
        assert!(matches!(
            err,
            RtconfError::Config(ConfigError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_store_value_is_not_fallback() {
        let read = ConfigRead::new(ConfigValue::Int(5), ValueSource::Store);
        assert!(!read.is_fallback());
        assert_eq!(read.clone().into_value(), Some(ConfigValue::Int(5)));
        assert_eq!(read.require(&"MAX_RETRIES".into()).unwrap(), ConfigValue::Int(5));
    }

    #[test]
    fn test_source_labels() {
        assert_eq!(ValueSource::PreloadedDefault.as_str(), "preloaded_default");
        assert!(ValueSource::CallerDefault.is_fallback());
        assert!(!ValueSource::Cache.is_fallback());
    }
}
