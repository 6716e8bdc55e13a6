//! # Pipeline Registry
//!
//! Immutable map from pipeline name to its ordered stages. Built once at
//! wiring time; the executor only reads it.

use crate::stage::Stage;
use crate::stages::{MetadataExtraction, Optimization, Thumbnails, Validation};
use crate::{FULL_PIPELINE, QUICK_PIPELINE};
use std::collections::HashMap;
use std::sync::Arc;

/// One registered pipeline.
pub struct Pipeline {
    /// Pipeline name.
    pub name: String,
    /// Stages in execution order.
    pub stages: Vec<Arc<dyn Stage>>,
}

impl Pipeline {
    /// The ordered stage names.
    #[must_use]
    pub fn stage_names(&self) -> Vec<String> {
        self.stages.iter().map(|s| s.name().to_string()).collect()
    }
}

/// Immutable registry of pipelines.
pub struct PipelineRegistry {
    pipelines: HashMap<String, Arc<Pipeline>>,
}

impl PipelineRegistry {
    /// Start building a registry.
    #[must_use]
    pub fn builder() -> PipelineRegistryBuilder {
        PipelineRegistryBuilder {
            pipelines: HashMap::new(),
        }
    }

    /// The registry with the two default pipelines.
    #[must_use]
    pub fn with_defaults() -> Self {
        let validation: Arc<dyn Stage> = Arc::new(Validation);
        let metadata: Arc<dyn Stage> = Arc::new(MetadataExtraction);
        let thumbnails: Arc<dyn Stage> = Arc::new(Thumbnails::default());
        let optimization: Arc<dyn Stage> = Arc::new(Optimization);

        Self::builder()
            .pipeline(
                FULL_PIPELINE,
                vec![
                    validation.clone(),
                    metadata.clone(),
                    thumbnails.clone(),
                    optimization,
                ],
            )
            .pipeline(QUICK_PIPELINE, vec![validation, metadata, thumbnails])
            .build()
    }

    /// Look up a pipeline.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<Pipeline>> {
        self.pipelines.get(name).cloned()
    }

    /// Stage names of a pipeline, if registered.
    #[must_use]
    pub fn stage_names(&self, name: &str) -> Option<Vec<String>> {
        self.pipelines.get(name).map(|p| p.stage_names())
    }

    /// Registered pipeline names.
    #[must_use]
    pub fn pipeline_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.pipelines.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Builder producing an immutable [`PipelineRegistry`].
pub struct PipelineRegistryBuilder {
    pipelines: HashMap<String, Arc<Pipeline>>,
}

impl PipelineRegistryBuilder {
    /// Register a pipeline. Re-registering a name replaces it (only during
    /// building; the finished registry never changes).
    #[must_use]
    pub fn pipeline(mut self, name: &str, stages: Vec<Arc<dyn Stage>>) -> Self {
        self.pipelines.insert(
            name.to_string(),
            Arc::new(Pipeline {
                name: name.to_string(),
                stages,
            }),
        );
        self
    }

    /// Freeze the registry.
    #[must_use]
    pub fn build(self) -> PipelineRegistry {
        PipelineRegistry {
            pipelines: self.pipelines,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_pipelines_registered() {
        let registry = PipelineRegistry::with_defaults();
        assert_eq!(
            registry.pipeline_names(),
            vec![FULL_PIPELINE.to_string(), QUICK_PIPELINE.to_string()]
        );
    }

    #[test]
    fn test_full_pipeline_stage_order() {
        let registry = PipelineRegistry::with_defaults();
        assert_eq!(
            registry.stage_names(FULL_PIPELINE).expect("registered"),
            vec![
                "validation",
                "metadata_extraction",
                "thumbnails",
                "optimization"
            ]
        );
    }

    #[test]
    fn test_quick_pipeline_omits_optimization() {
        let registry = PipelineRegistry::with_defaults();
        let names = registry.stage_names(QUICK_PIPELINE).expect("registered");
        assert!(!names.contains(&"optimization".to_string()));
        assert_eq!(names.len(), 3);
    }

    #[test]
    fn test_unknown_pipeline_is_none() {
        let registry = PipelineRegistry::with_defaults();
        assert!(registry.get("nonexistent").is_none());
    }
}
