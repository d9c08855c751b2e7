//! Knowledge tracing: a GRU sequence model and the two-state fallback.

pub mod bkt;
pub mod dkt;
pub mod gru;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

pub use dkt::{EvaluationReport, Interaction, KnowledgeTracer, TracerState, TrainingReport};

use crate::adaptive::types::CourseId;

/// Trained tracers keyed by course. Models are immutable once installed;
/// retraining installs a replacement.
#[derive(Default)]
pub struct TracerRegistry {
    models: RwLock<HashMap<CourseId, Arc<KnowledgeTracer>>>,
}

impl TracerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the model it replaced, if any.
    pub fn install(&self, course_id: impl Into<String>, tracer: KnowledgeTracer) -> Option<Arc<KnowledgeTracer>> {
        self.models.write().insert(course_id.into(), Arc::new(tracer))
    }

    pub fn get(&self, course_id: &str) -> Option<Arc<KnowledgeTracer>> {
        self.models.read().get(course_id).cloned()
    }

    pub fn evict(&self, course_id: &str) -> Option<Arc<KnowledgeTracer>> {
        self.models.write().remove(course_id)
    }

    pub fn courses(&self) -> Vec<CourseId> {
        let mut courses: Vec<CourseId> = self.models.read().keys().cloned().collect();
        courses.sort();
        courses
    }

    pub fn len(&self) -> usize {
        self.models.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.read().is_empty()
    }
}
