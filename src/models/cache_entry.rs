use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Access frequency classes, hottest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyClass {
    Never,
    VeryLow,
    Low,
    Medium,
    High,
    VeryHigh,
}

impl FrequencyClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Never => "never",
            Self::VeryLow => "very_low",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::VeryHigh => "very_high",
        }
    }
}

impl fmt::Display for FrequencyClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FrequencyClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "never" => Ok(Self::Never),
            "very_low" => Ok(Self::VeryLow),
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "very_high" => Ok(Self::VeryHigh),
            _ => Err(format!("Invalid frequency class: {s}")),
        }
    }
}

/// Point-in-time size observation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeSample {
    pub at: DateTime<Utc>,
    pub size_bytes: u64,
}

/// Working-set cache item tracked by the growth manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
    pub last_accessed: Option<DateTime<Utc>>,
    pub access_frequency_class: FrequencyClass,
    pub ttl_seconds: Option<u64>,
    /// Must survive until the owning run finishes
    pub cleanup_after_sync: bool,
    /// Heavily deprioritized during emergency eviction
    pub always_keep: bool,
    pub access_history: VecDeque<DateTime<Utc>>,
    pub growth_history: VecDeque<SizeSample>,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, size_bytes: u64, ttl_seconds: Option<u64>) -> Self {
        let now = Utc::now();
        let mut growth_history = VecDeque::new();
        growth_history.push_back(SizeSample {
            at: now,
            size_bytes,
        });

        Self {
            key: key.into(),
            size_bytes,
            created_at: now,
            last_accessed: None,
            access_frequency_class: FrequencyClass::Never,
            ttl_seconds,
            cleanup_after_sync: false,
            always_keep: false,
            access_history: VecDeque::new(),
            growth_history,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl_seconds {
            Some(ttl) => (now - self.created_at).num_seconds() > ttl as i64,
            None => false,
        }
    }

    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.created_at).num_seconds().max(0) as f64 / 3600.0
    }

    pub fn size_mb(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_frequency_ordering() {
        assert!(FrequencyClass::VeryHigh > FrequencyClass::High);
        assert!(FrequencyClass::Medium > FrequencyClass::Low);
        assert!(FrequencyClass::VeryLow > FrequencyClass::Never);
        assert_eq!("medium".parse::<FrequencyClass>().unwrap(), FrequencyClass::Medium);
    }

    #[test]
    fn test_expiry_and_age() {
        let now = Utc::now();
        let mut entry = CacheEntry::new("batch:1", 2 * 1024 * 1024, Some(60));
        entry.created_at = now - Duration::minutes(2);

        assert!(entry.is_expired(now));
        assert!((entry.size_mb() - 2.0).abs() < f64::EPSILON);
        assert!(entry.age_hours(now) > 0.03);

        let entry = CacheEntry::new("batch:2", 10, None);
        assert!(!entry.is_expired(now + Duration::days(30)));
    }
}
