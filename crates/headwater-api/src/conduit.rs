//! Conduit wire types: generation, batch, and tokenization.
//!
//! These are the JSON shapes exchanged between the Headwater server and its
//! clients on the `/conduit/*` routes. Field names follow the wire contract
//! (`prompt_strings_list`, `input_variables_list`, `prompt_str`), so the
//! same structs serialize identically on both sides.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{GenerationError, ItemFailure};

/// Speaker of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Model selection and sampling controls.
///
/// Shared by every item of a batch; never mutated during execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Model identifier understood by the generation backend (e.g. `"llama3.1:latest"`).
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
    /// Optional system prompt prepended to every request built from these params.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
}

impl GenerationParams {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            max_tokens: None,
            temperature: None,
            top_p: None,
            stop: Vec::new(),
            system: None,
        }
    }
}

/// How much the server reports about a request in its logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verbosity {
    Silent,
    #[default]
    Summary,
    Detailed,
}

/// Execution options: caching, verbosity, and project scoping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConduitOptions {
    /// Project scope. Cached responses are never shared between projects.
    #[serde(default = "default_project_name")]
    pub project_name: String,
    #[serde(default)]
    pub use_cache: bool,
    #[serde(default)]
    pub verbosity: Verbosity,
}

fn default_project_name() -> String {
    "headwater".to_string()
}

impl Default for ConduitOptions {
    fn default() -> Self {
        Self {
            project_name: default_project_name(),
            use_cache: false,
            verbosity: Verbosity::default(),
        }
    }
}

/// One fully-resolved generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub messages: Vec<Message>,
    pub params: GenerationParams,
    #[serde(default)]
    pub options: ConduitOptions,
}

impl GenerationRequest {
    /// Build a request for a single user prompt, honouring `params.system`.
    pub fn from_prompt(prompt: &str, params: &GenerationParams, options: &ConduitOptions) -> Self {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &params.system {
            messages.push(Message::system(system.clone()));
        }
        messages.push(Message::user(prompt));
        Self {
            messages,
            params: params.clone(),
            options: options.clone(),
        }
    }
}

/// Result of one generation call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub model: String,
    pub message: Message,
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
}

impl GenerationResponse {
    /// The generated text.
    pub fn content(&self) -> &str {
        &self.message.content
    }
}

/// A batch of generation requests sharing params and options.
///
/// Exactly one of `prompt_strings_list` or `input_variables_list` must be
/// non-empty; `prompt_str` is the template applied to each variable map.
/// The shape is checked by [`crate::batch::BatchDescription::shape`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    /// Fully rendered prompts, one per item.
    #[serde(default)]
    pub prompt_strings_list: Vec<String>,
    /// Variable maps, one per item, rendered against `prompt_str`.
    #[serde(default)]
    pub input_variables_list: Vec<BTreeMap<String, String>>,
    /// Jinja-style template (`{{ name }}`) used with `input_variables_list`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_str: Option<String>,
    pub params: GenerationParams,
    #[serde(default)]
    pub options: ConduitOptions,
}

impl BatchRequest {
    pub fn from_prompts(prompts: Vec<String>, params: GenerationParams) -> Self {
        Self {
            prompt_strings_list: prompts,
            input_variables_list: Vec::new(),
            prompt_str: None,
            params,
            options: ConduitOptions::default(),
        }
    }

    pub fn from_template(
        template: impl Into<String>,
        variables: Vec<BTreeMap<String, String>>,
        params: GenerationParams,
    ) -> Self {
        Self {
            prompt_strings_list: Vec::new(),
            input_variables_list: variables,
            prompt_str: Some(template.into()),
            params,
            options: ConduitOptions::default(),
        }
    }

    /// Number of items the request declares.
    pub fn declared_len(&self) -> usize {
        self.prompt_strings_list.len() + self.input_variables_list.len()
    }
}

/// Outcome of one batch item on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchItemResult {
    Ok { response: GenerationResponse },
    Error { error: ItemFailure },
}

impl BatchItemResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, BatchItemResult::Ok { .. })
    }

    pub fn response(&self) -> Option<&GenerationResponse> {
        match self {
            BatchItemResult::Ok { response } => Some(response),
            BatchItemResult::Error { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&ItemFailure> {
        match self {
            BatchItemResult::Ok { .. } => None,
            BatchItemResult::Error { error } => Some(error),
        }
    }
}

impl From<Result<GenerationResponse, GenerationError>> for BatchItemResult {
    fn from(outcome: Result<GenerationResponse, GenerationError>) -> Self {
        match outcome {
            Ok(response) => BatchItemResult::Ok { response },
            Err(err) => BatchItemResult::Error {
                error: ItemFailure::from(&err),
            },
        }
    }
}

/// Response for `POST /conduit/batch`.
///
/// `results[i]` always corresponds to item `i` of the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResponse {
    pub results: Vec<BatchItemResult>,
}

impl BatchResponse {
    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.succeeded()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizationRequest {
    /// Model whose tokenizer is used.
    pub model: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizationResponse {
    pub model: String,
    pub input_text: String,
    pub token_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureKind;

    #[test]
    fn batch_request_defaults_missing_lists() {
        let req: BatchRequest =
            serde_json::from_str(r#"{"prompt_strings_list":["a"],"params":{"model":"m1"}}"#)
                .unwrap();
        assert!(req.input_variables_list.is_empty());
        assert_eq!(req.prompt_str, None);
        assert_eq!(req.options.project_name, "headwater");
        assert!(!req.options.use_cache);
        assert_eq!(req.declared_len(), 1);
    }

    #[test]
    fn item_result_is_tagged_by_status() {
        let ok: BatchItemResult = Ok(GenerationResponse {
            model: "m1".into(),
            message: Message::assistant("hi"),
            input_tokens: 2,
            output_tokens: 1,
            duration_ms: 5,
            stop_reason: None,
        })
        .into();
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["response"]["message"]["content"], "hi");

        let err: BatchItemResult = Err(GenerationError::Unavailable("refused".into())).into();
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"]["kind"], "unavailable");
        assert_eq!(err.failure().unwrap().kind, FailureKind::Unavailable);
    }

    #[test]
    fn from_prompt_prepends_system_message() {
        let mut params = GenerationParams::new("m1");
        params.system = Some("be brief".into());
        let req = GenerationRequest::from_prompt("Say hi", &params, &ConduitOptions::default());
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].role, Role::System);
        assert_eq!(req.messages[1], Message::user("Say hi"));
    }

    #[test]
    fn batch_response_counts() {
        let resp = BatchResponse {
            results: vec![
                Err(GenerationError::Disabled).into(),
                Err(GenerationError::Internal("boom".into())).into(),
            ],
        };
        assert_eq!(resp.succeeded(), 0);
        assert_eq!(resp.failed(), 2);
    }
}
