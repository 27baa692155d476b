//! services/api/src/adapters/openai_llm.rs
//!
//! This module contains the adapter for OpenAI-compatible chat completion models.
//! It implements the `ModelTransport` port from the core crate.

use artifact_studio_core::ports::{ModelTransport, TextStream, TransportError};
use artifact_studio_core::request::{ContentPart, GenerationRequest};
use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::chat::{
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessageArgs,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart,
        CreateChatCompletionRequest, CreateChatCompletionRequestArgs, ImageUrlArgs,
    },
    Client,
};
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use futures::StreamExt;
use std::time::Duration;
use tracing::warn;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ModelTransport` using the chat completions API.
#[derive(Clone)]
pub struct OpenAiModelAdapter {
    client: Client<OpenAIConfig>,
}

impl OpenAiModelAdapter {
    /// Creates a new `OpenAiModelAdapter`.
    pub fn new(client: Client<OpenAIConfig>) -> Self {
        Self { client }
    }

    /// Builds a client for `api_key` whose own retry loop is switched off.
    /// Rate-limit retries belong to the `Dispatcher`.
    pub fn from_api_key(api_key: &str) -> Self {
        let client = Client::with_config(OpenAIConfig::new().with_api_key(api_key))
            .with_backoff(no_retry_backoff());
        Self::new(client)
    }

    fn build_request(
        &self,
        request: &GenerationRequest,
        stream: bool,
    ) -> Result<CreateChatCompletionRequest, TransportError> {
        let parts = request
            .parts
            .iter()
            .map(convert_part)
            .collect::<Result<Vec<_>, _>>()?;

        let messages = vec![
            ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessageArgs::default()
                    .content(request.system_instruction.as_str())
                    .build()
                    .map_err(build_error)?,
            ),
            ChatCompletionRequestMessage::User(
                ChatCompletionRequestUserMessageArgs::default()
                    .content(parts)
                    .build()
                    .map_err(build_error)?,
            ),
        ];

        CreateChatCompletionRequestArgs::default()
            .model(request.model.as_str())
            .messages(messages)
            .stream(stream)
            .build()
            .map_err(build_error)
    }
}

fn no_retry_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        max_elapsed_time: Some(Duration::ZERO),
        ..Default::default()
    }
}

/// Images travel as data URLs and text files are inlined. Any other type is
/// rejected so the caller sees the failure instead of a request without the file.
fn convert_part(part: &ContentPart) -> Result<ChatCompletionRequestUserMessageContentPart, TransportError> {
    match part {
        ContentPart::Text(text) => Ok(ChatCompletionRequestMessageContentPartTextArgs::default()
            .text(text.as_str())
            .build()
            .map_err(build_error)?
            .into()),
        ContentPart::InlineData { mime_type, data } if mime_type.starts_with("image/") => {
            let image_url = ImageUrlArgs::default()
                .url(format!("data:{};base64,{}", mime_type, data))
                .build()
                .map_err(build_error)?;
            Ok(ChatCompletionRequestMessageContentPartImageArgs::default()
                .image_url(image_url)
                .build()
                .map_err(build_error)?
                .into())
        }
        ContentPart::InlineData { mime_type, data } if mime_type.starts_with("text/") => {
            let bytes = BASE64_STANDARD
                .decode(data.as_bytes())
                .map_err(|e| TransportError::fatal(None, format!("Invalid attachment data: {}", e)))?;
            let text = String::from_utf8_lossy(&bytes).into_owned();
            Ok(ChatCompletionRequestMessageContentPartTextArgs::default()
                .text(text)
                .build()
                .map_err(build_error)?
                .into())
        }
        ContentPart::InlineData { mime_type, .. } => {
            warn!("Rejecting attachment of type {}: not supported by chat completions.", mime_type);
            Err(TransportError::fatal(
                None,
                format!("Attachments of type {} are not supported by this model.", mime_type),
            ))
        }
    }
}

fn build_error(e: OpenAIError) -> TransportError {
    TransportError::fatal(None, format!("Failed to build chat request: {}", e))
}

/// Rate limits come back as API errors whose text names the 429 or the
/// `rate_limit_exceeded` code.
fn map_openai_error(e: OpenAIError) -> TransportError {
    let message = e.to_string();
    let code = message
        .contains("rate_limit_exceeded")
        .then_some("rate_limit_exceeded");
    TransportError::classify(None, code, message)
}

//=========================================================================================
// `ModelTransport` Trait Implementation
//=========================================================================================

#[async_trait]
impl ModelTransport for OpenAiModelAdapter {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, TransportError> {
        let chat_request = self.build_request(request, false)?;

        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(map_openai_error)?;

        Ok(response
            .choices
            .into_iter()
            .find_map(|choice| choice.message.content)
            .unwrap_or_default())
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> Result<TextStream, TransportError> {
        let chat_request = self.build_request(request, true)?;

        let stream = self
            .client
            .chat()
            .create_stream(chat_request)
            .await
            .map_err(map_openai_error)?;

        let deltas = stream.filter_map(|item| async move {
            match item {
                Ok(chunk) => chunk
                    .choices
                    .into_iter()
                    .find_map(|choice| choice.delta.content)
                    .filter(|text| !text.is_empty())
                    .map(Ok),
                Err(e) => Some(Err(map_openai_error(e))),
            }
        });
        Ok(Box::pin(deltas))
    }
}
