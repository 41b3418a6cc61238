//! # Retry Policy Resolver
//!
//! Resolves the retry policy for a classified error or operation kind.
//!
//! ## Precedence
//!
//! Layers are applied lowest first, so later layers win:
//!
//! 1. built-in default table
//! 2. aggressiveness level (`aggressive`, `moderate`, `conservative`, `none`)
//! 3. named policy from configuration, then from the key-value store
//!    (`sync:retry_policy:{kind_type}:{kind}`)
//! 4. explicit per-call override
//!
//! Global caps then clamp `max_attempts` and `max_delay` down, never up.
//! `validation` errors always resolve to zero attempts.
//!
//! ## Delay
//!
//! `delay(attempt) = min(max_delay, base_delay * backoff_factor^attempt)` with
//! 0-based attempts, so `{base 2, factor 2, max 30}` yields 2, 4, 8, 16, 30, 30.

use crate::config::RetryConfig;
use crate::constants::keys;
use crate::store::{load_json, KeyValueStore};
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Error classification used as a retry table key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    Ssl,
    ServerError,
    RateLimit,
    ClientError,
    Validation,
    Concurrency,
    Memory,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 9] = [
        ErrorKind::Network,
        ErrorKind::Timeout,
        ErrorKind::Ssl,
        ErrorKind::ServerError,
        ErrorKind::RateLimit,
        ErrorKind::ClientError,
        ErrorKind::Validation,
        ErrorKind::Concurrency,
        ErrorKind::Memory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Ssl => "ssl",
            Self::ServerError => "server_error",
            Self::RateLimit => "rate_limit",
            Self::ClientError => "client_error",
            Self::Validation => "validation",
            Self::Concurrency => "concurrency",
            Self::Memory => "memory",
        }
    }

    /// Network-level or upstream conditions that usually clear on their own
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Network | Self::Timeout | Self::Ssl | Self::ServerError | Self::RateLimit
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("Invalid error kind: {s}"))
    }
}

/// Operation classification used as a retry table key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    SyncProducts,
    SyncOrders,
    SyncCustomers,
    ApiCalls,
    SslOperations,
    BatchOperations,
}

impl OperationKind {
    pub const ALL: [OperationKind; 6] = [
        OperationKind::SyncProducts,
        OperationKind::SyncOrders,
        OperationKind::SyncCustomers,
        OperationKind::ApiCalls,
        OperationKind::SslOperations,
        OperationKind::BatchOperations,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SyncProducts => "sync_products",
            Self::SyncOrders => "sync_orders",
            Self::SyncCustomers => "sync_customers",
            Self::ApiCalls => "api_calls",
            Self::SslOperations => "ssl_operations",
            Self::BatchOperations => "batch_operations",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("Invalid operation kind: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KindType {
    Error,
    Operation,
}

impl KindType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Operation => "operation",
        }
    }
}

/// Key into the retry tables: a kind together with its kind type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind_type", content = "kind", rename_all = "snake_case")]
pub enum RetryKind {
    Error(ErrorKind),
    Operation(OperationKind),
}

impl RetryKind {
    pub fn kind_type(&self) -> KindType {
        match self {
            Self::Error(_) => KindType::Error,
            Self::Operation(_) => KindType::Operation,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Error(kind) => kind.as_str(),
            Self::Operation(kind) => kind.as_str(),
        }
    }

    /// Parse a `(kind, kind_type)` pair
    pub fn parse(kind: &str, kind_type: &str) -> Result<Self, String> {
        match kind_type {
            "error" => kind.parse().map(Self::Error),
            "operation" => kind.parse().map(Self::Operation),
            other => Err(format!("Invalid kind type: {other}")),
        }
    }
}

impl From<ErrorKind> for RetryKind {
    fn from(kind: ErrorKind) -> Self {
        Self::Error(kind)
    }
}

impl From<OperationKind> for RetryKind {
    fn from(kind: OperationKind) -> Self {
        Self::Operation(kind)
    }
}

impl fmt::Display for RetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind_type().as_str(), self.name())
    }
}

/// Retry aggressiveness levels selectable in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggressiveness {
    Aggressive,
    Moderate,
    Conservative,
    None,
}

impl Aggressiveness {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aggressive => "aggressive",
            Self::Moderate => "moderate",
            Self::Conservative => "conservative",
            Self::None => "none",
        }
    }

    /// Level overrides used when configuration provides none
    pub fn default_levels() -> HashMap<String, RetryPolicyOverride> {
        let level = |max_attempts, base, factor, max| RetryPolicyOverride {
            max_attempts: Some(max_attempts),
            base_delay: Some(base),
            backoff_factor: Some(factor),
            max_delay: Some(max),
            jitter_enabled: None,
        };

        HashMap::from([
            (Self::Aggressive.as_str().to_string(), level(8, 1.0, 1.5, 30.0)),
            (Self::Moderate.as_str().to_string(), level(5, 2.0, 2.0, 120.0)),
            (Self::Conservative.as_str().to_string(), level(3, 5.0, 2.5, 600.0)),
            (
                Self::None.as_str().to_string(),
                RetryPolicyOverride {
                    max_attempts: Some(0),
                    ..Default::default()
                },
            ),
        ])
    }
}

impl std::str::FromStr for Aggressiveness {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "aggressive" => Ok(Self::Aggressive),
            "moderate" => Ok(Self::Moderate),
            "conservative" => Ok(Self::Conservative),
            "none" => Ok(Self::None),
            _ => Err(format!("Invalid aggressiveness level: {s}")),
        }
    }
}

/// Partial policy; unset fields leave the underlying value untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicyOverride {
    pub max_attempts: Option<u32>,
    pub base_delay: Option<f64>,
    pub backoff_factor: Option<f64>,
    pub max_delay: Option<f64>,
    pub jitter_enabled: Option<bool>,
}

impl RetryPolicyOverride {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Seconds
    pub base_delay: f64,
    pub backoff_factor: f64,
    /// Seconds
    pub max_delay: f64,
    pub jitter_enabled: bool,
}

impl RetryPolicy {
    pub const fn new(
        max_attempts: u32,
        base_delay: f64,
        backoff_factor: f64,
        max_delay: f64,
        jitter_enabled: bool,
    ) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            max_delay,
            jitter_enabled,
        }
    }

    /// Policy that never retries
    pub const fn no_retry() -> Self {
        Self::new(0, 0.0, 1.0, 0.0, false)
    }

    /// Built-in default table
    pub fn builtin(kind: RetryKind) -> Self {
        match kind {
            RetryKind::Error(kind) => match kind {
                ErrorKind::Network => Self::new(5, 2.0, 2.0, 60.0, true),
                ErrorKind::Timeout => Self::new(3, 5.0, 2.0, 120.0, true),
                ErrorKind::Ssl => Self::new(3, 10.0, 2.0, 300.0, true),
                ErrorKind::ServerError => Self::new(4, 5.0, 2.0, 180.0, true),
                ErrorKind::RateLimit => Self::new(6, 30.0, 2.0, 600.0, true),
                ErrorKind::ClientError => Self::new(1, 1.0, 1.0, 1.0, false),
                ErrorKind::Validation => Self::no_retry(),
                ErrorKind::Concurrency => Self::new(3, 60.0, 1.5, 600.0, true),
                ErrorKind::Memory => Self::new(2, 30.0, 2.0, 120.0, false),
            },
            RetryKind::Operation(kind) => match kind {
                OperationKind::SyncProducts => Self::new(5, 2.0, 2.0, 120.0, true),
                OperationKind::SyncOrders => Self::new(5, 2.0, 2.0, 120.0, true),
                OperationKind::SyncCustomers => Self::new(4, 3.0, 2.0, 180.0, true),
                OperationKind::ApiCalls => Self::new(3, 1.0, 2.0, 30.0, true),
                OperationKind::SslOperations => Self::new(3, 10.0, 2.0, 300.0, true),
                OperationKind::BatchOperations => Self::new(3, 5.0, 2.0, 300.0, true),
            },
        }
    }

    pub fn apply(&mut self, layer: &RetryPolicyOverride) {
        if let Some(v) = layer.max_attempts {
            self.max_attempts = v;
        }
        if let Some(v) = layer.base_delay {
            self.base_delay = v;
        }
        if let Some(v) = layer.backoff_factor {
            self.backoff_factor = v;
        }
        if let Some(v) = layer.max_delay {
            self.max_delay = v;
        }
        if let Some(v) = layer.jitter_enabled {
            self.jitter_enabled = v;
        }
    }

    /// Clamp down to the global caps
    pub fn cap(&mut self, max_attempts: u32, max_delay: f64) {
        self.max_attempts = self.max_attempts.min(max_attempts);
        self.max_delay = self.max_delay.min(max_delay);
    }

    /// Whether another try is allowed after `attempts_made` retries
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Deterministic delay in seconds for a 0-based attempt
    pub fn delay_seconds(&self, attempt: u32) -> f64 {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let raw = self.base_delay * self.backoff_factor.powi(exponent);
        if raw.is_finite() {
            raw.min(self.max_delay).max(0.0)
        } else {
            self.max_delay.max(0.0)
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        Duration::from_secs_f64(self.delay_seconds(attempt))
    }

    /// Delay with uniform jitter in `[0, jitter_max)`, still capped at `max_delay`
    pub fn jittered_delay(&self, attempt: u32, jitter_max_seconds: f64) -> Duration {
        let mut seconds = self.delay_seconds(attempt);
        if self.jitter_enabled && jitter_max_seconds > 0.0 {
            let mut rng = rand::thread_rng();
            seconds += rng.gen_range(0.0..jitter_max_seconds);
            seconds = seconds.min(self.max_delay.max(0.0));
        }
        Duration::from_secs_f64(seconds)
    }
}

/// Layered retry policy resolution with a per-kind cache
pub struct RetryPolicyResolver {
    config: RetryConfig,
    store: Option<Arc<dyn KeyValueStore>>,
    cache: DashMap<RetryKind, RetryPolicy>,
}

impl fmt::Debug for RetryPolicyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicyResolver")
            .field("config", &self.config)
            .field("has_store", &self.store.is_some())
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl RetryPolicyResolver {
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            store: None,
            cache: DashMap::new(),
        }
    }

    /// Also consult named policies persisted in the key-value store
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn jitter_max_seconds(&self) -> f64 {
        self.config.jitter_max_seconds
    }

    /// Resolve the effective policy for `kind`
    ///
    /// Results without explicit overrides are cached until [`invalidate`](Self::invalidate).
    pub async fn resolve(
        &self,
        kind: impl Into<RetryKind>,
        overrides: Option<&RetryPolicyOverride>,
    ) -> RetryPolicy {
        let kind = kind.into();
        let explicit = overrides.filter(|o| !o.is_empty());

        if explicit.is_none() {
            if let Some(cached) = self.cache.get(&kind) {
                return *cached;
            }
        }

        let mut policy = RetryPolicy::builtin(kind);

        if let Some(level) = self.config.aggressiveness {
            if let Some(layer) = self.config.levels.get(level.as_str()) {
                policy.apply(layer);
            }
        }

        let named = match kind {
            RetryKind::Error(k) => self.config.error_policies.get(k.as_str()),
            RetryKind::Operation(k) => self.config.operation_policies.get(k.as_str()),
        };
        if let Some(layer) = named {
            policy.apply(layer);
        }

        if let Some(layer) = self.stored_policy(kind).await {
            policy.apply(&layer);
        }

        if let Some(layer) = explicit {
            policy.apply(layer);
        }

        policy.cap(
            self.config.global_max_attempts,
            self.config.global_max_delay_seconds,
        );

        if kind == RetryKind::Error(ErrorKind::Validation) {
            policy.max_attempts = 0;
        }

        debug!(
            kind = %kind,
            max_attempts = policy.max_attempts,
            base_delay = policy.base_delay,
            max_delay = policy.max_delay,
            "Resolved retry policy"
        );

        if explicit.is_none() {
            self.cache.insert(kind, policy);
        }
        policy
    }

    /// Drop cached resolutions
    pub fn invalidate(&self) {
        self.cache.clear();
    }

    async fn stored_policy(&self, kind: RetryKind) -> Option<RetryPolicyOverride> {
        let store = self.store.as_ref()?;
        let key = keys::retry_policy(kind.kind_type().as_str(), kind.name());

        match load_json::<RetryPolicyOverride>(store.as_ref(), &key).await {
            Ok(policy) => policy,
            Err(err) => {
                warn!(key = %key, error = %err, "Ignoring unreadable stored retry policy");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryKeyValueStore;
    use serde_json::json;

    #[test]
    fn test_delay_sequence_caps_at_max() {
        let policy = RetryPolicy::new(10, 2.0, 2.0, 30.0, false);
        let delays: Vec<f64> = (0..7).map(|a| policy.delay_seconds(a)).collect();
        assert_eq!(delays, vec![2.0, 4.0, 8.0, 16.0, 30.0, 30.0, 30.0]);
    }

    #[test]
    fn test_jitter_never_exceeds_max_delay() {
        let policy = RetryPolicy::new(10, 2.0, 2.0, 30.0, true);
        for attempt in 0..10 {
            let delay = policy.jittered_delay(attempt, 5.0).as_secs_f64();
            assert!(delay >= policy.delay_seconds(attempt));
            assert!(delay <= 30.0);
        }
    }

    #[test]
    fn test_huge_attempt_does_not_overflow() {
        let policy = RetryPolicy::new(10, 2.0, 2.0, 30.0, false);
        assert_eq!(policy.delay_seconds(u32::MAX), 30.0);
    }

    #[test]
    fn test_kind_parsing() {
        assert_eq!(
            RetryKind::parse("rate_limit", "error").unwrap(),
            RetryKind::Error(ErrorKind::RateLimit)
        );
        assert_eq!(
            RetryKind::parse("api_calls", "operation").unwrap(),
            RetryKind::Operation(OperationKind::ApiCalls)
        );
        assert!(RetryKind::parse("api_calls", "error").is_err());
        assert!(RetryKind::parse("network", "step").is_err());
    }

    #[tokio::test]
    async fn test_validation_never_retries() {
        let resolver = RetryPolicyResolver::new(RetryConfig::default());
        let overrides = RetryPolicyOverride {
            max_attempts: Some(5),
            ..Default::default()
        };
        let policy = resolver
            .resolve(ErrorKind::Validation, Some(&overrides))
            .await;
        assert_eq!(policy.max_attempts, 0);
    }

    #[tokio::test]
    async fn test_precedence_explicit_over_named_over_level() {
        let mut config = RetryConfig::default();
        config.aggressiveness = Some(Aggressiveness::Aggressive);
        config.error_policies.insert(
            "network".into(),
            RetryPolicyOverride {
                base_delay: Some(7.0),
                ..Default::default()
            },
        );
        let resolver = RetryPolicyResolver::new(config);

        let policy = resolver.resolve(ErrorKind::Network, None).await;
        // level supplies attempts, named policy supplies base delay
        assert_eq!(policy.max_attempts, 8);
        assert_eq!(policy.base_delay, 7.0);

        let explicit = RetryPolicyOverride {
            base_delay: Some(0.5),
            ..Default::default()
        };
        let policy = resolver.resolve(ErrorKind::Network, Some(&explicit)).await;
        assert_eq!(policy.base_delay, 0.5);
    }

    #[tokio::test]
    async fn test_global_caps_clamp_down_only() {
        let mut config = RetryConfig::default();
        config.global_max_attempts = 2;
        config.global_max_delay_seconds = 10.0;
        let resolver = RetryPolicyResolver::new(config);

        let policy = resolver.resolve(ErrorKind::RateLimit, None).await;
        assert_eq!(policy.max_attempts, 2);
        assert_eq!(policy.max_delay, 10.0);

        let policy = resolver.resolve(ErrorKind::ClientError, None).await;
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.max_delay, 1.0);
    }

    #[tokio::test]
    async fn test_stored_policy_and_invalidation() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let resolver =
            RetryPolicyResolver::new(RetryConfig::default()).with_store(store.clone());

        let before = resolver.resolve(OperationKind::SyncOrders, None).await;
        assert_eq!(before.max_attempts, 5);

        store
            .set(
                &keys::retry_policy("operation", "sync_orders"),
                json!({"max_attempts": 2}),
            )
            .await
            .unwrap();

        // cached until invalidated
        let cached = resolver.resolve(OperationKind::SyncOrders, None).await;
        assert_eq!(cached.max_attempts, 5);

        resolver.invalidate();
        let after = resolver.resolve(OperationKind::SyncOrders, None).await;
        assert_eq!(after.max_attempts, 2);
    }

    #[tokio::test]
    async fn test_none_level_disables_retries() {
        let mut config = RetryConfig::default();
        config.aggressiveness = Some(Aggressiveness::None);
        let resolver = RetryPolicyResolver::new(config);

        let policy = resolver.resolve(ErrorKind::Network, None).await;
        assert_eq!(policy.max_attempts, 0);
        assert!(!policy.should_retry(0));
    }
}
