//! # Entity Registry
//!
//! Typed mapping from entity name to its sync service and capabilities.
//!
//! ## Overview
//!
//! The orchestrator never talks to an entity adapter directly. A start request
//! is validated against the registered directions, the continuation check only
//! runs for services that opt in, and the retry policy used around transfers
//! can be pinned to an operation kind per entity.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let registry = EntityRegistry::new();
//! registry.register(
//!     "products",
//!     EntityRegistration::new(Arc::new(ProductService::default()))
//!         .with_direction(Direction::RemoteToLocal)
//!         .with_continuation(),
//! );
//! ```

use super::service::EntitySyncService;
use crate::models::Direction;
use crate::orchestration::retry_policy::OperationKind;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Service plus capabilities for one entity type
#[derive(Clone)]
pub struct EntityRegistration {
    pub service: Arc<dyn EntitySyncService>,
    pub directions: HashSet<Direction>,
    /// Probe for items beyond the initial count when the last batch is reached
    pub supports_continuation: bool,
    pub operation_kind: Option<OperationKind>,
}

impl fmt::Debug for EntityRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRegistration")
            .field("directions", &self.directions)
            .field("supports_continuation", &self.supports_continuation)
            .field("operation_kind", &self.operation_kind)
            .finish()
    }
}

impl EntityRegistration {
    pub fn new(service: Arc<dyn EntitySyncService>) -> Self {
        Self {
            service,
            directions: HashSet::new(),
            supports_continuation: false,
            operation_kind: None,
        }
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        self.directions.insert(direction);
        self
    }

    pub fn bidirectional(self) -> Self {
        self.with_direction(Direction::RemoteToLocal)
            .with_direction(Direction::LocalToRemote)
    }

    pub fn with_continuation(mut self) -> Self {
        self.supports_continuation = true;
        self
    }

    pub fn with_operation_kind(mut self, kind: OperationKind) -> Self {
        self.operation_kind = Some(kind);
        self
    }
}

/// Thread-safe registry of entity sync services
#[derive(Default)]
pub struct EntityRegistry {
    entities: RwLock<HashMap<String, EntityRegistration>>,
}

impl fmt::Debug for EntityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityRegistry")
            .field("entities", &self.entities())
            .finish()
    }
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace the service for `entity`
    pub fn register(&self, entity: impl Into<String>, registration: EntityRegistration) {
        let entity = entity.into();
        let directions: Vec<&str> = registration.directions.iter().map(|d| d.as_str()).collect();
        info!(
            entity = %entity,
            directions = ?directions,
            supports_continuation = registration.supports_continuation,
            "📝 Registered entity sync service"
        );
        if self.entities.write().insert(entity.clone(), registration).is_some() {
            debug!(entity = %entity, "Replaced existing registration");
        }
    }

    /// Chainable registration for setup code
    pub fn with(self, entity: impl Into<String>, registration: EntityRegistration) -> Self {
        self.register(entity, registration);
        self
    }

    pub fn get(&self, entity: &str) -> Option<EntityRegistration> {
        self.entities.read().get(entity).cloned()
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.entities.read().contains_key(entity)
    }

    /// Whether `entity` is registered and syncs in `direction`
    pub fn supports(&self, entity: &str, direction: Direction) -> bool {
        self.entities
            .read()
            .get(entity)
            .is_some_and(|r| r.directions.contains(&direction))
    }

    /// Registered entity names, sorted
    pub fn entities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entities.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn unregister(&self, entity: &str) -> bool {
        self.entities.write().remove(entity).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::registry::TransferResult;
    use async_trait::async_trait;
    use serde_json::Value;

    struct NoopService;

    #[async_trait]
    impl EntitySyncService for NoopService {
        async fn count(&self, _direction: Direction, _filters: &Value) -> Result<u64> {
            Ok(0)
        }

        async fn transfer_batch(
            &self,
            _direction: Direction,
            _filters: &Value,
            _offset: u64,
            _limit: usize,
        ) -> Result<TransferResult> {
            Ok(TransferResult::default())
        }
    }

    #[test]
    fn test_supported_combinations() {
        let registry = EntityRegistry::new()
            .with(
                "products",
                EntityRegistration::new(Arc::new(NoopService)).bidirectional(),
            )
            .with(
                "orders",
                EntityRegistration::new(Arc::new(NoopService))
                    .with_direction(Direction::LocalToRemote)
                    .with_operation_kind(OperationKind::SyncOrders),
            );

        assert!(registry.supports("products", Direction::RemoteToLocal));
        assert!(registry.supports("products", Direction::LocalToRemote));
        assert!(registry.supports("orders", Direction::LocalToRemote));
        assert!(!registry.supports("orders", Direction::RemoteToLocal));
        assert!(!registry.supports("customers", Direction::RemoteToLocal));

        assert_eq!(registry.entities(), vec!["orders", "products"]);
        assert_eq!(
            registry.get("orders").and_then(|r| r.operation_kind),
            Some(OperationKind::SyncOrders)
        );
    }

    #[test]
    fn test_unregister() {
        let registry = EntityRegistry::new().with(
            "products",
            EntityRegistration::new(Arc::new(NoopService)).with_continuation(),
        );
        assert!(registry.get("products").is_some_and(|r| r.supports_continuation));
        assert!(registry.unregister("products"));
        assert!(!registry.contains("products"));
    }
}
