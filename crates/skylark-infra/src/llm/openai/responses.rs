//! Wire types for the OpenAI Responses API (`POST {api_base}/responses`).
//!
//! async-openai is built here with only the chat-completion feature, so
//! this endpoint is spoken with plain reqwest + serde.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use skylark_types::conversation::TurnRole;
use skylark_types::llm::GenerateRequest;

#[derive(Debug, Serialize)]
pub(crate) struct ResponsesRequest {
    pub model: String,
    pub input: Vec<Value>,
    pub max_output_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

impl ResponsesRequest {
    pub(crate) fn build(request: &GenerateRequest, model: String) -> Self {
        let mut input = Vec::with_capacity(request.history.len() + 2);
        if let Some(system) = &request.system {
            input.push(json!({ "role": "system", "content": system }));
        }
        for turn in &request.history {
            let role = match turn.role {
                TurnRole::User => "user",
                TurnRole::Assistant => "assistant",
            };
            input.push(json!({ "role": role, "content": turn.text }));
        }

        if request.images.is_empty() {
            input.push(json!({ "role": "user", "content": request.prompt }));
        } else {
            let mut parts = vec![json!({ "type": "input_text", "text": request.prompt })];
            parts.extend(
                request
                    .images
                    .iter()
                    .map(|url| json!({ "type": "input_image", "image_url": url })),
            );
            input.push(json!({ "role": "user", "content": parts }));
        }

        Self {
            model,
            input,
            max_output_tokens: request.max_tokens,
            temperature: request.temperature,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponsesResponse {
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Debug, Deserialize)]
struct OutputContent {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl ResponsesResponse {
    /// `output_text` when present, else the concatenated `output_text`
    /// parts of every `message` item.
    pub(crate) fn text(&self) -> String {
        if let Some(text) = self.output_text.as_deref().filter(|t| !t.trim().is_empty()) {
            return text.to_string();
        }
        self.output
            .iter()
            .filter(|item| item.kind == "message")
            .flat_map(|item| item.content.iter())
            .filter(|part| part.kind == "output_text")
            .filter_map(|part| part.text.as_deref())
            .collect()
    }
}
