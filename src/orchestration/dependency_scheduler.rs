//! # Dependency Scheduler
//!
//! Orders requested entities so prerequisites sync first, and checks that an
//! entity's prerequisites have completed successfully before it starts.
//!
//! Ordering is a depth-first topological sort restricted to the requested
//! entities. A cycle among them is rejected with [`SyncError::Cycle`] before
//! any work starts; no partial order is returned.

use crate::config::DependencyConfig;
use crate::constants::keys;
use crate::error::{Result, SyncError};
use crate::metrics::MetricsSink;
use crate::store::{load_json, KeyValueStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// entity -> prerequisites
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DependencyGraph {
    edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    pub fn new(edges: HashMap<String, Vec<String>>) -> Self {
        Self { edges }
    }

    pub fn with_entity(mut self, entity: &str, prerequisites: &[&str]) -> Self {
        self.edges.insert(
            entity.to_string(),
            prerequisites.iter().map(|p| p.to_string()).collect(),
        );
        self
    }

    pub fn prerequisites(&self, entity: &str) -> &[String] {
        self.edges.get(entity).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl From<&DependencyConfig> for DependencyGraph {
    fn from(config: &DependencyConfig) -> Self {
        Self::new(config.graph.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyCheck {
    pub ok: bool,
    /// Prerequisites without a recorded successful sync
    pub missing: Vec<String>,
}

impl DependencyCheck {
    pub fn satisfied() -> Self {
        Self {
            ok: true,
            missing: Vec::new(),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Visited,
}

pub struct DependencyScheduler {
    graph: DependencyGraph,
    metrics: Arc<dyn MetricsSink>,
    store: Option<Arc<dyn KeyValueStore>>,
    skip_validation: bool,
}

impl std::fmt::Debug for DependencyScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyScheduler")
            .field("graph", &self.graph)
            .field("skip_validation", &self.skip_validation)
            .finish()
    }
}

impl DependencyScheduler {
    pub fn new(graph: DependencyGraph, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            graph,
            metrics,
            store: None,
            skip_validation: false,
        }
    }

    pub fn from_config(config: &DependencyConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            graph: DependencyGraph::from(config),
            metrics,
            store: None,
            skip_validation: config.skip_validation,
        }
    }

    /// Also consult successes persisted at `sync:last_success:{entity}`
    pub fn with_store(mut self, store: Arc<dyn KeyValueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Prerequisite-first order of the requested entities
    pub fn topo_sort<S: AsRef<str>>(&self, entities: &[S]) -> Result<Vec<String>> {
        let requested: HashSet<&str> = entities.iter().map(AsRef::as_ref).collect();
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        let mut stack: Vec<&str> = Vec::new();
        let mut order: Vec<String> = Vec::with_capacity(requested.len());

        for entity in entities {
            self.visit(
                entity.as_ref(),
                &requested,
                &mut marks,
                &mut stack,
                &mut order,
            )?;
        }

        debug!(order = ?order, "Computed entity sync order");
        Ok(order)
    }

    fn visit<'a>(
        &'a self,
        entity: &'a str,
        requested: &HashSet<&'a str>,
        marks: &mut HashMap<&'a str, Mark>,
        stack: &mut Vec<&'a str>,
        order: &mut Vec<String>,
    ) -> Result<()> {
        match marks.get(entity) {
            Some(Mark::Visited) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = stack.iter().position(|e| *e == entity).unwrap_or(0);
                let mut path: Vec<String> = stack[start..].iter().map(|e| e.to_string()).collect();
                path.push(entity.to_string());
                return Err(SyncError::Cycle { path });
            }
            None => {}
        }

        marks.insert(entity, Mark::Visiting);
        stack.push(entity);

        for prerequisite in self.graph.prerequisites(entity) {
            if requested.contains(prerequisite.as_str()) {
                self.visit(prerequisite, requested, marks, stack, order)?;
            }
        }

        stack.pop();
        marks.insert(entity, Mark::Visited);
        order.push(entity.to_string());
        Ok(())
    }

    /// Check that every prerequisite of `entity` has a successful sync on record
    pub async fn validate_dependencies(&self, entity: &str, skip: bool) -> DependencyCheck {
        if skip || self.skip_validation {
            debug!(entity = %entity, "Dependency validation bypassed");
            return DependencyCheck::satisfied();
        }

        let mut missing = Vec::new();
        for prerequisite in self.graph.prerequisites(entity) {
            if self.last_success(prerequisite).await.is_none() {
                missing.push(prerequisite.clone());
            }
        }

        if !missing.is_empty() {
            info!(entity = %entity, missing = ?missing, "Prerequisites not yet synced");
        }

        DependencyCheck {
            ok: missing.is_empty(),
            missing,
        }
    }

    async fn last_success(&self, entity: &str) -> Option<DateTime<Utc>> {
        if let Some(store) = &self.store {
            match load_json::<PersistedSuccess>(store.as_ref(), &keys::last_success(entity)).await {
                Ok(Some(success)) => return Some(success.finished_at),
                Ok(None) => {}
                Err(error) => {
                    warn!(entity = %entity, error = %error, "Could not read persisted sync success");
                }
            }
        }
        self.metrics.last_successful_sync(entity).await
    }
}

/// Last completed run of an entity, persisted by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedSuccess {
    pub operation_id: String,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::InMemoryMetrics;
    use crate::models::Direction;
    use crate::store::InMemoryKeyValueStore;

    fn catalog_graph() -> DependencyGraph {
        DependencyGraph::default()
            .with_entity("geo", &[])
            .with_entity("categories", &["geo"])
            .with_entity("products", &["categories"])
    }

    #[test]
    fn test_orders_prerequisites_first() {
        let scheduler = DependencyScheduler::new(catalog_graph(), Arc::new(InMemoryMetrics::default()));
        let order = scheduler
            .topo_sort(&["products", "geo", "categories"])
            .unwrap();
        assert_eq!(order, vec!["geo", "categories", "products"]);
    }

    #[test]
    fn test_unrequested_prerequisites_are_ignored() {
        let scheduler = DependencyScheduler::new(catalog_graph(), Arc::new(InMemoryMetrics::default()));
        let order = scheduler.topo_sort(&["products", "geo"]).unwrap();
        assert_eq!(order, vec!["geo", "products"]);
    }

    #[test]
    fn test_cycle_is_rejected_with_path() {
        let graph = DependencyGraph::default()
            .with_entity("a", &["b"])
            .with_entity("b", &["c"])
            .with_entity("c", &["a"]);
        let scheduler = DependencyScheduler::new(graph, Arc::new(InMemoryMetrics::default()));

        match scheduler.topo_sort(&["a", "b", "c"]) {
            Err(SyncError::Cycle { path }) => {
                assert_eq!(path.first(), path.last());
                assert_eq!(path.len(), 4);
            }
            other => panic!("expected cycle error, got {other:?}"),
        }
    }

    #[test]
    fn test_duplicates_appear_once() {
        let scheduler = DependencyScheduler::new(catalog_graph(), Arc::new(InMemoryMetrics::default()));
        let order = scheduler.topo_sort(&["geo", "geo", "categories"]).unwrap();
        assert_eq!(order, vec!["geo", "categories"]);
    }

    #[tokio::test]
    async fn test_validation_uses_recorded_successes() {
        let metrics = Arc::new(InMemoryMetrics::default());
        let scheduler = DependencyScheduler::new(catalog_graph(), metrics.clone());

        let check = scheduler.validate_dependencies("products", false).await;
        assert!(!check.ok);
        assert_eq!(check.missing, vec!["categories"]);

        metrics.mark_successful("categories", Direction::RemoteToLocal);
        assert!(scheduler.validate_dependencies("products", false).await.ok);

        assert!(scheduler.validate_dependencies("categories", true).await.ok);
    }

    #[tokio::test]
    async fn test_persisted_success_satisfies_prerequisite() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let scheduler = DependencyScheduler::new(catalog_graph(), Arc::new(InMemoryMetrics::default()))
            .with_store(store.clone());
        assert!(!scheduler.validate_dependencies("categories", false).await.ok);

        let success = PersistedSuccess {
            operation_id: "op-geo".into(),
            finished_at: Utc::now(),
        };
        crate::store::save_json(store.as_ref(), &keys::last_success("geo"), &success)
            .await
            .unwrap();

        assert!(scheduler.validate_dependencies("categories", false).await.ok);
    }
}
