use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mutual-exclusion record keyed by entity name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub entity: String,
    pub holder_operation_id: String,
    pub acquired_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Value,
}

impl LockRecord {
    pub fn new(
        entity: impl Into<String>,
        holder_operation_id: impl Into<String>,
        ttl_seconds: u64,
        metadata: Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            entity: entity.into(),
            holder_operation_id: holder_operation_id.into(),
            acquired_at: now,
            ttl_seconds,
            last_heartbeat: now,
            metadata,
        }
    }

    /// Orphaned: the holder stopped heartbeating for longer than the TTL
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.last_heartbeat > Duration::seconds(self.ttl_seconds as i64)
    }

    /// Time since acquisition
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.acquired_at
    }

    /// Time since the last heartbeat
    pub fn heartbeat_age(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_heartbeat
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.last_heartbeat + Duration::seconds(self.ttl_seconds as i64)
    }

    pub fn is_held_by(&self, operation_id: &str) -> bool {
        self.holder_operation_id == operation_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_expiry_uses_heartbeat_not_acquisition() {
        let now = Utc::now();
        let mut record = LockRecord::new("products", "op-1", 60, json!({}));
        record.acquired_at = now - Duration::hours(3);
        record.last_heartbeat = now - Duration::seconds(30);

        assert!(!record.is_expired(now));
        assert!(record.age(now) > Duration::hours(2));

        record.last_heartbeat = now - Duration::seconds(61);
        assert!(record.is_expired(now));
    }

    #[test]
    fn test_holder_check() {
        let record = LockRecord::new("orders", "op-7", 60, json!({"host": "a"}));
        assert!(record.is_held_by("op-7"));
        assert!(!record.is_held_by("op-8"));
        assert_eq!(record.expires_at(), record.last_heartbeat + Duration::seconds(60));
    }
}
