//! # Health Tree
//!
//! Components self-report; the tree aggregates. The root status is the
//! worst status among the children, so a single erroring component is
//! visible at the top without hiding the healthy rest.

use serde::Serialize;
use shared_types::{Component, ComponentHealth, ComponentStatus};
use std::sync::Arc;

/// Aggregated health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Tree-root name (the service).
    pub name: String,
    /// Worst child status.
    pub status: ComponentStatus,
    /// Per-component reports.
    pub components: Vec<ComponentHealth>,
}

/// Collects component handles and produces aggregated reports.
pub struct HealthTree {
    service_name: String,
    components: Vec<Arc<dyn Component>>,
}

impl HealthTree {
    /// Create an empty tree.
    #[must_use]
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            components: Vec::new(),
        }
    }

    /// Register a component.
    pub fn register(&mut self, component: Arc<dyn Component>) {
        self.components.push(component);
    }

    /// Registered component count.
    #[must_use]
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Poll every component and fold the tree.
    pub async fn report(&self) -> HealthReport {
        let mut components = Vec::with_capacity(self.components.len());
        for component in &self.components {
            components.push(component.health().await);
        }
        let status = components
            .iter()
            .map(|c| c.status)
            .max_by_key(ComponentStatus::severity)
            .unwrap_or(ComponentStatus::Healthy);
        HealthReport {
            name: self.service_name.clone(),
            status,
            components,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use shared_types::ComponentError;

    struct FixedComponent {
        name: &'static str,
        status: ComponentStatus,
    }

    #[async_trait]
    impl Component for FixedComponent {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn start(&self) -> Result<(), ComponentError> {
            Ok(())
        }

        async fn stop(&self) -> Result<(), ComponentError> {
            Ok(())
        }

        async fn health(&self) -> ComponentHealth {
            ComponentHealth {
                name: self.name.to_string(),
                status: self.status,
                details: serde_json::Value::Null,
            }
        }
    }

    #[tokio::test]
    async fn test_worst_status_wins() {
        let mut tree = HealthTree::new("photon-flow");
        tree.register(Arc::new(FixedComponent {
            name: "a",
            status: ComponentStatus::Healthy,
        }));
        tree.register(Arc::new(FixedComponent {
            name: "b",
            status: ComponentStatus::Degraded,
        }));

        let report = tree.report().await;
        assert_eq!(report.status, ComponentStatus::Degraded);
        assert_eq!(report.components.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_tree_is_healthy() {
        let tree = HealthTree::new("photon-flow");
        assert_eq!(tree.report().await.status, ComponentStatus::Healthy);
        assert!(tree.is_empty());
    }
}
