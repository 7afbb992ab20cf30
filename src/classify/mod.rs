//! Email classification.
//!
//! The gateway owns the fixed label set and turns whatever a
//! [`ScoringBackend`] produces into a well-formed single-label distribution.
//!
//! Backends:
//! - **lexical**: built-in keyword scorer, no network
//! - **inference**: remote zero-shot model over HTTP

pub mod inference;
pub mod lexical;

pub use inference::InferenceBackend;
pub use lexical::LexicalBackend;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::{ClassifierBackend, ClassifierConfig};
use crate::error::ClassifyError;

/// Outcome of classifying one text.
///
/// `labels` and `scores` have the same length and order, most confident first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub sequence: String,
    pub labels: Vec<String>,
    pub scores: Vec<f32>,
}

impl ClassificationResult {
    /// Routing decision: the top label and its score.
    pub fn primary(&self) -> Option<(&str, f32)> {
        let label = self.labels.first()?;
        let score = self.scores.first()?;
        Some((label.as_str(), *score))
    }
}

/// Pluggable scoring capability behind the gateway.
///
/// Implementations return raw `(label, score)` pairs; they need not be
/// sorted, complete or normalized.
#[async_trait]
pub trait ScoringBackend: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    async fn score(&self, text: &str, labels: &[String])
    -> Result<Vec<(String, f32)>, ClassifyError>;
}

/// Create the scoring backend selected by configuration.
pub fn create_backend(config: &ClassifierConfig) -> Result<Arc<dyn ScoringBackend>, ClassifyError> {
    match config.backend {
        ClassifierBackend::Lexical => {
            tracing::info!("Using lexical classifier");
            Ok(Arc::new(LexicalBackend::new()))
        }
        ClassifierBackend::Inference => {
            tracing::info!(endpoint = %config.endpoint, model = %config.model, "Using inference classifier");
            Ok(Arc::new(InferenceBackend::from_config(config)?))
        }
    }
}

/// Classifies text against a fixed, ordered label set.
pub struct ClassificationGateway {
    backend: Arc<dyn ScoringBackend>,
    labels: Vec<String>,
}

impl ClassificationGateway {
    pub fn new(backend: Arc<dyn ScoringBackend>, labels: Vec<String>) -> Self {
        Self { backend, labels }
    }

    pub fn from_config(config: &ClassifierConfig) -> Result<Self, ClassifyError> {
        Ok(Self::new(create_backend(config)?, config.labels.clone()))
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub async fn classify(&self, text: &str) -> Result<ClassificationResult, ClassifyError> {
        if text.trim().is_empty() {
            return Err(ClassifyError::EmptyInput);
        }

        let raw = self.backend.score(text, &self.labels).await?;
        let ranked = normalize(&self.labels, raw).ok_or_else(|| ClassifyError::InvalidResponse {
            backend: self.backend.name().to_string(),
            reason: "no scores for any configured label".into(),
        })?;

        let (labels, scores): (Vec<String>, Vec<f32>) = ranked.into_iter().unzip();
        Ok(ClassificationResult {
            sequence: text.to_string(),
            labels,
            scores,
        })
    }
}

/// Project raw backend scores onto `labels` as a sorted distribution.
///
/// Returns `None` when no raw entry names a configured label.
fn normalize(labels: &[String], raw: Vec<(String, f32)>) -> Option<Vec<(String, f32)>> {
    let mut scores = vec![0.0_f32; labels.len()];
    let mut matched = false;
    for (label, score) in raw {
        if let Some(idx) = labels.iter().position(|l| *l == label) {
            scores[idx] = if score.is_finite() { score.max(0.0) } else { 0.0 };
            matched = true;
        }
    }
    if !matched {
        return None;
    }

    let total: f32 = scores.iter().sum();
    if total > 0.0 {
        scores.iter_mut().for_each(|s| *s /= total);
    } else {
        let uniform = 1.0 / labels.len() as f32;
        scores.iter_mut().for_each(|s| *s = uniform);
    }

    let mut ranked: Vec<(String, f32)> = labels.iter().cloned().zip(scores).collect();
    // sort_by is stable: ties keep configuration order
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    Some(ranked)
}
