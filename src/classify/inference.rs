//! Remote zero-shot classification over HTTP.
//!
//! Speaks the Hugging Face inference API shape:
//! `POST {endpoint}/models/{model}` with
//! `{"inputs": text, "parameters": {"candidate_labels": [...], "multi_label": false}}`.

use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use super::ScoringBackend;
use crate::config::ClassifierConfig;
use crate::error::ClassifyError;

const BACKEND_NAME: &str = "inference";

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    inputs: &'a str,
    parameters: InferenceParameters<'a>,
}

#[derive(Debug, Serialize)]
struct InferenceParameters<'a> {
    candidate_labels: &'a [String],
    multi_label: bool,
}

#[derive(Debug, Deserialize)]
struct LabelScore {
    label: String,
    score: f32,
}

/// Both response shapes served by zero-shot endpoints.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InferenceResponse {
    Ranked { labels: Vec<String>, scores: Vec<f32> },
    Pairs(Vec<LabelScore>),
}

impl InferenceResponse {
    fn into_pairs(self) -> Result<Vec<(String, f32)>, ClassifyError> {
        match self {
            InferenceResponse::Ranked { labels, scores } => {
                if labels.len() != scores.len() {
                    return Err(invalid(format!(
                        "{} labels but {} scores",
                        labels.len(),
                        scores.len()
                    )));
                }
                Ok(labels.into_iter().zip(scores).collect())
            }
            InferenceResponse::Pairs(pairs) => {
                Ok(pairs.into_iter().map(|p| (p.label, p.score)).collect())
            }
        }
    }
}

/// Zero-shot classifier behind an HTTP inference endpoint.
pub struct InferenceBackend {
    client: reqwest::Client,
    url: String,
    api_token: Option<SecretString>,
}

impl InferenceBackend {
    pub fn new(
        endpoint: &str,
        model: &str,
        api_token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, ClassifyError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| backend_error(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: format!("{}/models/{}", endpoint.trim_end_matches('/'), model),
            api_token,
        })
    }

    pub fn from_config(config: &ClassifierConfig) -> Result<Self, ClassifyError> {
        Self::new(
            &config.endpoint,
            &config.model,
            config.api_token.clone(),
            config.timeout,
        )
    }
}

#[async_trait]
impl ScoringBackend for InferenceBackend {
    fn name(&self) -> &str {
        BACKEND_NAME
    }

    async fn score(
        &self,
        text: &str,
        labels: &[String],
    ) -> Result<Vec<(String, f32)>, ClassifyError> {
        let body = InferenceRequest {
            inputs: text,
            parameters: InferenceParameters {
                candidate_labels: labels,
                multi_label: false,
            },
        };

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(token) = &self.api_token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                backend_error("request timed out".into())
            } else {
                backend_error(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "Inference endpoint returned error");
            return Err(backend_error(format!("status {status}: {body}")));
        }

        let parsed: InferenceResponse = response
            .json()
            .await
            .map_err(|e| invalid(format!("unrecognized response body: {e}")))?;
        parsed.into_pairs()
    }
}

fn backend_error(reason: String) -> ClassifyError {
    ClassifyError::Backend {
        backend: BACKEND_NAME.to_string(),
        reason,
    }
}

fn invalid(reason: String) -> ClassifyError {
    ClassifyError::InvalidResponse {
        backend: BACKEND_NAME.to_string(),
        reason,
    }
}
