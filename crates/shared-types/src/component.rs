//! # Component Trait - Lifecycle Contract
//!
//! The contract every long-running component (queue, worker pool, fabric,
//! scheduler) implements so the runtime can start, stop, and monitor them
//! uniformly.
//!
//! Components are constructed "not ready": they reject work until `start()`
//! has completed. Communication between them goes through the event bus and
//! the queue, never through direct calls into each other's internals.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Error type for component lifecycle operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentError {
    /// The component that encountered the error.
    pub component: String,
    /// Error kind.
    pub kind: ComponentErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl ComponentError {
    /// Build an error for a component.
    #[must_use]
    pub fn new(
        component: impl Into<String>,
        kind: ComponentErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            component: component.into(),
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ComponentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.component, self.kind, self.message)
    }
}

impl std::error::Error for ComponentError {}

/// Categories of component lifecycle errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComponentErrorKind {
    /// Component failed to initialize.
    StartupFailed,
    /// A required backend never became reachable.
    BackendUnreachable,
    /// Component encountered a runtime error.
    RuntimeError,
    /// Component failed to shut down within its deadline.
    ShutdownTimeout,
    /// Configuration is invalid.
    ConfigurationError,
}

impl fmt::Display for ComponentErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartupFailed => write!(f, "StartupFailed"),
            Self::BackendUnreachable => write!(f, "BackendUnreachable"),
            Self::RuntimeError => write!(f, "RuntimeError"),
            Self::ShutdownTimeout => write!(f, "ShutdownTimeout"),
            Self::ConfigurationError => write!(f, "ConfigurationError"),
        }
    }
}

/// Health status of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    /// Component is starting up.
    Starting,
    /// Component is running normally.
    Healthy,
    /// Component is running but impaired (e.g., backend flapping).
    Degraded,
    /// Component is not running.
    Stopped,
    /// Component encountered an error.
    Error,
}

impl ComponentStatus {
    /// Rollup ordering: the worst status wins when aggregating a tree.
    #[must_use]
    pub fn severity(&self) -> u8 {
        match self {
            Self::Healthy => 0,
            Self::Starting => 1,
            Self::Degraded => 2,
            Self::Stopped => 3,
            Self::Error => 4,
        }
    }
}

/// Self-reported health of one component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    /// Component name.
    pub name: String,
    /// Current status.
    pub status: ComponentStatus,
    /// Component-specific detail fields.
    pub details: serde_json::Value,
}

impl ComponentHealth {
    /// A healthy report with no details.
    #[must_use]
    pub fn healthy(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: ComponentStatus::Healthy,
            details: serde_json::Value::Null,
        }
    }

    /// Attach detail fields.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Lifecycle contract implemented by every long-running component.
#[async_trait]
pub trait Component: Send + Sync {
    /// Stable component name used in health trees and logs.
    fn name(&self) -> &'static str;

    /// Start background tasks and begin accepting work.
    async fn start(&self) -> Result<(), ComponentError>;

    /// Stop gracefully: refuse new work, finish in-flight work, release tasks.
    async fn stop(&self) -> Result<(), ComponentError>;

    /// Self-reported health snapshot.
    async fn health(&self) -> ComponentHealth;
}
