//! Generation request and result types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SdkError};

/// What a generation request runs against
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationTarget {
    /// A model by identifier
    ModelId(String),
    /// A stored prompt template by identifier
    PromptId(String),
}

/// One logical generation input.
///
/// Built once through the constructors and `with_*` methods, then handed to
/// the scheduler by value.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GenerationRequest {
    #[serde(flatten)]
    target: GenerationTarget,
    input: String,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    parameters: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    moderations: Option<serde_json::Value>,
}

impl GenerationRequest {
    /// Request against a model
    pub fn for_model(model_id: impl Into<String>, input: impl Into<String>) -> Self {
        Self::new(GenerationTarget::ModelId(model_id.into()), input)
    }

    /// Request against a prompt template
    pub fn for_prompt(prompt_id: impl Into<String>, input: impl Into<String>) -> Self {
        Self::new(GenerationTarget::PromptId(prompt_id.into()), input)
    }

    /// Request against an explicit target
    pub fn new(target: GenerationTarget, input: impl Into<String>) -> Self {
        Self {
            target,
            input: input.into(),
            parameters: serde_json::Map::new(),
            moderations: None,
        }
    }

    /// Set one generation parameter (e.g. `max_new_tokens`)
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// Replace all generation parameters
    #[must_use]
    pub fn with_parameters(mut self, parameters: serde_json::Map<String, serde_json::Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Attach a moderation configuration
    #[must_use]
    pub fn with_moderations(mut self, moderations: serde_json::Value) -> Self {
        self.moderations = Some(moderations);
        self
    }

    /// Target of this request
    #[must_use]
    pub fn target(&self) -> &GenerationTarget {
        &self.target
    }

    /// Input text
    #[must_use]
    pub fn input(&self) -> &str {
        &self.input
    }

    /// Generation parameters
    #[must_use]
    pub fn parameters(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.parameters
    }

    /// JSON body sent to the API
    pub fn to_body(&self) -> Result<serde_json::Value> {
        serde_json::to_value(self)
            .map_err(|e| SdkError::internal_with("failed to encode generation request", e))
    }
}

/// Why generation stopped
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    /// Still generating
    #[default]
    NotFinished,
    /// Hit `max_new_tokens`
    MaxTokens,
    /// Model emitted end-of-sequence
    EosToken,
    /// Request was cancelled
    Cancelled,
    /// Time limit reached
    TimeLimit,
    /// A stop sequence matched
    StopSequence,
    /// Token limit of the model reached
    TokenLimit,
    /// Generation failed
    Error,
}

impl StopReason {
    /// Whether this reason ends generation
    #[must_use]
    pub fn is_final(self) -> bool {
        self != Self::NotFinished
    }
}

/// Outcome of one generation (or one partial step of a stream)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationResult {
    /// Generated text
    pub generated_text: String,
    /// Tokens generated
    pub generated_token_count: u32,
    /// Tokens in the input
    pub input_token_count: u32,
    /// Why generation stopped
    pub stop_reason: StopReason,
}

impl GenerationResult {
    /// Fold a later partial result into this one.
    ///
    /// Text is appended; counts and stop reason take the later value when the
    /// later value is set.
    pub fn absorb(&mut self, later: &GenerationResult) {
        self.generated_text.push_str(&later.generated_text);
        if later.generated_token_count > 0 {
            self.generated_token_count = later.generated_token_count;
        }
        if later.input_token_count > 0 {
            self.input_token_count = later.input_token_count;
        }
        if later.stop_reason.is_final() {
            self.stop_reason = later.stop_reason;
        }
    }
}

/// Response of the unary generation endpoint
#[derive(Clone, Debug, Deserialize)]
pub struct GenerationResponse {
    /// Response identifier
    #[serde(default)]
    pub id: Option<String>,
    /// Model that served the request
    #[serde(default)]
    pub model_id: Option<String>,
    /// Creation timestamp
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    /// One result per input
    pub results: Vec<GenerationResult>,
}

impl GenerationResponse {
    /// Parse a response payload that must carry exactly one result
    pub fn single_result(payload: serde_json::Value) -> Result<GenerationResult> {
        let response: GenerationResponse = serde_json::from_value(payload)
            .map_err(|e| SdkError::internal_with("unexpected generation response", e))?;

        let count = response.results.len();
        let mut results = response.results.into_iter();
        match (results.next(), count) {
            (Some(result), 1) => Ok(result),
            _ => Err(SdkError::internal(format!(
                "expected exactly one generation result, got {count}"
            ))),
        }
    }
}

/// Partial result fields as they appear on the wire
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
struct PartialResult {
    generated_text: Option<String>,
    generated_token_count: Option<u32>,
    input_token_count: Option<u32>,
    stop_reason: Option<StopReason>,
}

/// One raw event of a generation stream
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct StreamChunk {
    #[serde(flatten)]
    partial: PartialResult,
    results: Vec<PartialResult>,
    #[serde(alias = "moderations")]
    moderation: Option<serde_json::Value>,
}

/// A normalized chunk delivered to stream consumers
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GenerationChunk {
    /// Zero-filled result merged with the fields the chunk carried
    pub result: GenerationResult,
    /// Moderation payload, if any
    pub moderation: Option<serde_json::Value>,
}

impl StreamChunk {
    /// Merge the chunk over a zero-filled [`GenerationResult`]
    #[must_use]
    pub fn normalize(self) -> GenerationChunk {
        let mut result = GenerationResult::default();
        let partials = std::iter::once(self.partial).chain(self.results);
        for partial in partials {
            if let Some(text) = partial.generated_text {
                result.generated_text.push_str(&text);
            }
            if let Some(count) = partial.generated_token_count {
                result.generated_token_count = count;
            }
            if let Some(count) = partial.input_token_count {
                result.input_token_count = count;
            }
            if let Some(reason) = partial.stop_reason {
                result.stop_reason = reason;
            }
        }
        GenerationChunk {
            result,
            moderation: self.moderation,
        }
    }
}
