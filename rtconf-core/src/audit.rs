//! Change log records: the audit trail of accepted configuration mutations.

use crate::{ConfigKey, ConfigValue, Timestamp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// One accepted configuration mutation. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogRecord {
    /// UUIDv7, so ids sort by creation time.
    pub id: Uuid,
    pub key: ConfigKey,
    pub old_value: Option<ConfigValue>,
    pub new_value: ConfigValue,
    pub changed_at: Timestamp,
}

impl ChangeLogRecord {
    /// Record a change observed now.
    pub fn new(key: ConfigKey, old_value: Option<ConfigValue>, new_value: ConfigValue) -> Self {
        Self {
            id: Uuid::now_v7(),
            key,
            old_value,
            new_value,
            changed_at: Utc::now(),
        }
    }
}

impl fmt::Display for ChangeLogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Change '{}' at {}",
            self.key,
            self.changed_at.format("%Y-%m-%d %H:%M")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_display_format() {
        let mut record = ChangeLogRecord::new("MAX_RETRIES".into(), Some(3.into()), 5.into());
        record.changed_at = Utc.with_ymd_and_hms(2026, 3, 1, 14, 5, 59).unwrap();
        assert_eq!(record.to_string(), "Change 'MAX_RETRIES' at 2026-03-01 14:05");
    }

    #[test]
    fn test_ids_are_time_ordered() {
        let a = ChangeLogRecord::new("A".into(), None, 1.into());
        let b = ChangeLogRecord::new("A".into(), Some(1.into()), 2.into());
        assert!(b.id > a.id);
    }

    #[test]
    fn test_json_roundtrip_keeps_null_old_value() {
        let record = ChangeLogRecord::new("SITE_NAME".into(), None, "Logger".into());
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"old_value\":null"));
        let back: ChangeLogRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
    }
}
