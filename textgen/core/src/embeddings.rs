//! Embedding Service
//!
//! Text embeddings go through their own [`ConcurrencyLimiter`], sized from the
//! embeddings limits endpoint. It shares nothing with the generation limiter.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::capacity::CapacityProbe;
use crate::config::ClientConfig;
use crate::error::{Result, SdkError};
use crate::limiter::{ConcurrencyLimiter, ExecuteOptions};
use crate::transport::{RequestFacade, RequestOptions};

/// Embeddings endpoint
pub const EMBEDDINGS_PATH: &str = "/v2/text/embeddings?version=2023-11-22";

/// Embeddings limits endpoint
pub const EMBEDDINGS_LIMITS_PATH: &str = "/v2/text/embeddings/limits?version=2023-11-22";

/// An embeddings request for one or more texts
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EmbeddingRequest {
    model_id: String,
    input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

impl EmbeddingRequest {
    /// Embed `inputs` with `model_id`
    pub fn new<I, S>(model_id: impl Into<String>, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            model_id: model_id.into(),
            input: inputs.into_iter().map(Into::into).collect(),
            parameters: None,
        }
    }

    /// Attach model parameters (e.g. `truncate_input_tokens`)
    #[must_use]
    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Number of texts to embed
    #[must_use]
    pub fn len(&self) -> usize {
        self.input.len()
    }

    /// Whether there is nothing to embed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.input.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    results: Vec<EmbeddingResult>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResult {
    embedding: Vec<f32>,
}

/// Embeddings with a dedicated concurrency limiter
pub struct EmbeddingService {
    facade: Arc<dyn RequestFacade>,
    limiter: ConcurrencyLimiter,
}

impl std::fmt::Debug for EmbeddingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingService")
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl EmbeddingService {
    /// Create a service over `facade`
    pub fn new(facade: Arc<dyn RequestFacade>, config: &ClientConfig) -> Self {
        let probe = Arc::new(CapacityProbe::new(
            Arc::clone(&facade),
            EMBEDDINGS_LIMITS_PATH,
            config.allowance_ttl,
        ));
        Self {
            limiter: ConcurrencyLimiter::new("embeddings", probe),
            facade,
        }
    }

    /// The limiter guarding embedding requests
    #[must_use]
    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// One embedding vector per input, in input order
    pub async fn create(
        &self,
        request: EmbeddingRequest,
        options: ExecuteOptions,
    ) -> Result<Vec<Vec<f32>>> {
        if request.is_empty() {
            return Err(SdkError::invalid_input("embedding request has no input"));
        }
        let expected = request.len();
        let body = serde_json::to_value(&request)?;

        let payload = self
            .limiter
            .execute(
                || {
                    let request_options = RequestOptions {
                        timeout: options.timeout,
                        cancel: options.cancel.clone(),
                    };
                    self.facade.post(EMBEDDINGS_PATH, body.clone(), request_options)
                },
                options.clone(),
            )
            .await?;

        let response: EmbeddingResponse = serde_json::from_value(payload)?;
        if response.results.len() != expected {
            return Err(SdkError::internal(format!(
                "expected {expected} embeddings, got {}",
                response.results.len()
            )));
        }
        Ok(response.results.into_iter().map(|r| r.embedding).collect())
    }
}
