//! OpenAI-compatible LLM provider.
//!
//! A single [`OpenAiProvider`] talks to OpenAI, DeepSeek and any other
//! backend that speaks chat completions, optionally preferring the newer
//! Responses API. In `auto` mode the Responses API is tried first and,
//! once the backend answers 400/404/405 for it, chat completions are used
//! for the rest of the process lifetime.
//!
//! Uses [`async_openai`] for chat completions and reqwest for Responses.

mod responses;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_openai::Client;
use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
    ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImage,
    ChatCompletionRequestMessageContentPartText, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, ChatCompletionRequestUserMessageContentPart,
    CreateChatCompletionRequest, ImageUrl,
};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::Semaphore;

use skylark_core::llm::provider::LlmProvider;
use skylark_types::config::OpenAiConfig;
use skylark_types::conversation::TurnRole;
use skylark_types::llm::{ApiMode, GenerateRequest, LlmError};

use self::responses::{ResponsesRequest, ResponsesResponse};

/// OpenAI-compatible provider.
///
/// Does NOT derive Debug: the API key lives inside both HTTP clients.
pub struct OpenAiProvider {
    chat: Client<OpenAIConfig>,
    http: reqwest::Client,
    api_base: String,
    api_key: SecretString,
    model: String,
    mode: ApiMode,
    temperature: f32,
    /// Set once the Responses API has been found missing in `auto` mode.
    responses_unsupported: AtomicBool,
    /// Send `max_completion_tokens` instead of `max_tokens`.
    completion_tokens_param: bool,
    permits: Semaphore,
    timeout: Duration,
}

impl OpenAiProvider {
    pub fn new(config: &OpenAiConfig) -> Result<Self, LlmError> {
        let api_base = config.api_base.trim().trim_end_matches('/').to_string();
        let openai_config = OpenAIConfig::new()
            .with_api_key(&config.api_key)
            .with_api_base(&api_base);
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| LlmError::Provider {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            chat: Client::with_config(openai_config),
            http,
            completion_tokens_param: is_openai_host(&api_base),
            api_base,
            api_key: SecretString::from(config.api_key.clone()),
            model: config.model.clone(),
            mode: config.api_mode,
            temperature: config.temperature,
            responses_unsupported: AtomicBool::new(false),
            permits: Semaphore::new(config.max_concurrency.max(1)),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        })
    }

    fn model_for(&self, request: &GenerateRequest) -> String {
        request
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&self.model)
            .to_string()
    }

    async fn dispatch(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        match self.mode {
            ApiMode::Chat => self.chat_completion(request).await,
            ApiMode::Responses => self.responses(request).await,
            ApiMode::Auto => {
                if self.responses_unsupported.load(Ordering::Relaxed) {
                    return self.chat_completion(request).await;
                }
                match self.responses(request).await {
                    Err(e @ (LlmError::Unsupported(_) | LlmError::InvalidRequest(_))) => {
                        tracing::warn!(
                            error = %e,
                            "Responses API unavailable, switching to chat completions"
                        );
                        self.responses_unsupported.store(true, Ordering::Relaxed);
                        self.chat_completion(request).await
                    }
                    other => other,
                }
            }
        }
    }

    /// Build a [`CreateChatCompletionRequest`] from a [`GenerateRequest`].
    #[allow(deprecated)]
    fn build_chat_request(&self, request: &GenerateRequest) -> CreateChatCompletionRequest {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::new();

        if let Some(ref system) = request.system {
            messages.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessage {
                    content: ChatCompletionRequestSystemMessageContent::Text(system.clone()),
                    name: None,
                },
            ));
        }

        for turn in &request.history {
            let message = match turn.role {
                TurnRole::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessage {
                        content: ChatCompletionRequestUserMessageContent::Text(turn.text.clone()),
                        name: None,
                    },
                ),
                TurnRole::Assistant => ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessage {
                        content: Some(ChatCompletionRequestAssistantMessageContent::Text(
                            turn.text.clone(),
                        )),
                        refusal: None,
                        name: None,
                        audio: None,
                        tool_calls: None,
                        function_call: None,
                    },
                ),
            };
            messages.push(message);
        }

        let content = if request.images.is_empty() {
            ChatCompletionRequestUserMessageContent::Text(request.prompt.clone())
        } else {
            let mut parts = vec![ChatCompletionRequestUserMessageContentPart::Text(
                ChatCompletionRequestMessageContentPartText {
                    text: request.prompt.clone(),
                },
            )];
            parts.extend(request.images.iter().map(|url| {
                ChatCompletionRequestUserMessageContentPart::ImageUrl(
                    ChatCompletionRequestMessageContentPartImage {
                        image_url: ImageUrl {
                            url: url.clone(),
                            detail: None,
                        },
                    },
                )
            }));
            ChatCompletionRequestUserMessageContent::Array(parts)
        };
        messages.push(ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessage {
                content,
                name: None,
            },
        ));

        let mut req = CreateChatCompletionRequest {
            model: self.model_for(request),
            messages,
            temperature: Some(request.temperature.unwrap_or(self.temperature)),
            ..Default::default()
        };
        if self.completion_tokens_param {
            req.max_completion_tokens = Some(request.max_tokens);
        } else {
            req.max_tokens = Some(request.max_tokens);
        }
        req
    }

    async fn chat_completion(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        let response = self
            .chat
            .chat()
            .create(self.build_chat_request(request))
            .await
            .map_err(map_openai_error)?;

        Ok(response
            .choices
            .first()
            .and_then(|c| c.message.content.clone())
            .unwrap_or_default())
    }

    async fn responses(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        let mut body = ResponsesRequest::build(request, self.model_for(request));
        body.temperature = Some(request.temperature.unwrap_or(self.temperature));

        let response = self
            .http
            .post(format!("{}/responses", self.api_base))
            .bearer_auth(self.api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Provider {
                message: format!("HTTP request failed: {}", e.without_url()),
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after_ms = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|secs| secs * 1000);
            let error_body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                400 => LlmError::InvalidRequest(error_body),
                401 | 403 => LlmError::AuthenticationFailed,
                404 | 405 => LlmError::Unsupported(format!("responses ({status})")),
                429 => LlmError::RateLimited { retry_after_ms },
                500..=599 => LlmError::Overloaded(format!("HTTP {status}: {error_body}")),
                _ => LlmError::Provider {
                    message: format!("HTTP {status}: {error_body}"),
                },
            });
        }

        let parsed: ResponsesResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Deserialization(format!("failed to parse response: {e}")))?;
        Ok(parsed.text())
    }
}

impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        let _permit = self.permits.acquire().await.map_err(|_| LlmError::Provider {
            message: "provider is shutting down".into(),
        })?;

        let text = tokio::time::timeout(self.timeout, self.dispatch(request))
            .await
            .map_err(|_| LlmError::Timeout(self.timeout.as_secs()))??;

        let text = text.trim();
        if text.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(text.to_string())
    }
}

/// Hosts under `openai.com` reject `max_tokens` for newer models.
fn is_openai_host(api_base: &str) -> bool {
    let rest = api_base
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = rest
        .split('/')
        .next()
        .unwrap_or_default()
        .split(':')
        .next()
        .unwrap_or_default()
        .to_lowercase();
    host == "openai.com" || host.ends_with(".openai.com")
}

/// Map an `async_openai::error::OpenAIError` to an [`LlmError`].
fn map_openai_error(err: async_openai::error::OpenAIError) -> LlmError {
    use async_openai::error::OpenAIError;

    match &err {
        OpenAIError::ApiError(api_err) => {
            let code = api_err.code.as_deref().unwrap_or("");
            let error_type = api_err.r#type.as_deref().unwrap_or("");

            if code == "invalid_api_key"
                || code == "authentication_error"
                || error_type == "authentication_error"
                || api_err.message.contains("Incorrect API key")
                || api_err.message.contains("Invalid API key")
            {
                LlmError::AuthenticationFailed
            } else if code == "rate_limit_exceeded" || error_type == "rate_limit_error" {
                LlmError::RateLimited {
                    retry_after_ms: None,
                }
            } else if code == "server_error" || error_type == "overloaded_error" {
                LlmError::Overloaded(api_err.message.clone())
            } else {
                LlmError::Provider {
                    message: err.to_string(),
                }
            }
        }
        OpenAIError::Reqwest(reqwest_err) => match reqwest_err.status().map(|s| s.as_u16()) {
            Some(401) => LlmError::AuthenticationFailed,
            Some(429) => LlmError::RateLimited {
                retry_after_ms: None,
            },
            Some(500..=599) => LlmError::Overloaded(err.to_string()),
            _ => LlmError::Provider {
                message: err.to_string(),
            },
        },
        OpenAIError::JSONDeserialize(_, content) => {
            LlmError::Deserialization(format!("failed to parse response: {content}"))
        }
        OpenAIError::InvalidArgument(msg) => LlmError::InvalidRequest(msg.clone()),
        _ => LlmError::Provider {
            message: err.to_string(),
        },
    }
}
