//! services/api/src/adapters/gemini_llm.rs
//!
//! This module contains the adapter for the Gemini REST API. It implements the
//! `ModelTransport` port, using `generateContent` for single-shot calls and
//! `streamGenerateContent?alt=sse` for streaming.

use artifact_studio_core::ports::{ModelTransport, TextStream, TransportError};
use artifact_studio_core::request::{ContentPart, GenerationRequest};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tracing::debug;

const BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `ModelTransport` against the Gemini HTTP API.
#[derive(Clone)]
pub struct GeminiModelAdapter {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiModelAdapter {
    /// Creates a new adapter with the provided API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: BASE_URL.to_string(),
        }
    }

    /// Points the adapter at a different endpoint (e.g. a proxy).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn post(&self, url: String, request: &GenerationRequest) -> Result<Response, TransportError> {
        let body = GenerateContentRequest::from_request(request);
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| TransportError::fatal(None, format!("Gemini API request failed: {err}")))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read Gemini error body".to_string());
            return Err(map_http_error(status, &body_text));
        }
        Ok(response)
    }
}

//=========================================================================================
// `ModelTransport` Trait Implementation
//=========================================================================================

#[async_trait]
impl ModelTransport for GeminiModelAdapter {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, TransportError> {
        let url = format!("{}/{}:generateContent", self.base_url, request.model);
        let response = self.post(url, request).await?;

        let parsed: GenerateContentResponse = response.json().await.map_err(|err| {
            TransportError::fatal(None, format!("Failed to parse Gemini response: {err}"))
        })?;
        Ok(parsed.text())
    }

    async fn generate_stream(&self, request: &GenerationRequest) -> Result<TextStream, TransportError> {
        let url = format!("{}/{}:streamGenerateContent?alt=sse", self.base_url, request.model);
        let response = self.post(url, request).await?;
        let mut bytes = response.bytes_stream();

        let deltas = async_stream::stream! {
            let mut buffer: Vec<u8> = Vec::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(err) => {
                        yield Err(TransportError::fatal(None, format!("Gemini stream interrupted: {err}")));
                        return;
                    }
                };
                buffer.extend_from_slice(&chunk);

                // SSE events are line-delimited; keep any partial line for the next chunk.
                while let Some(newline) = buffer.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = buffer.drain(..=newline).collect();
                    let line = String::from_utf8_lossy(&line);
                    match parse_sse_line(&line) {
                        Some(Ok(text)) => yield Ok(text),
                        Some(Err(err)) => {
                            yield Err(err);
                            return;
                        }
                        None => {}
                    }
                }
            }
            if !buffer.is_empty() {
                let line = String::from_utf8_lossy(&buffer).into_owned();
                if let Some(item) = parse_sse_line(&line) {
                    yield item;
                }
            }
            debug!("Gemini stream finished.");
        };
        Ok(Box::pin(deltas))
    }
}

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
}

impl GenerateContentRequest {
    fn from_request(request: &GenerationRequest) -> Self {
        let parts = request
            .parts
            .iter()
            .map(|part| match part {
                ContentPart::Text(text) => Part::Text { text: text.clone() },
                ContentPart::InlineData { mime_type, data } => Part::InlineData {
                    inline_data: InlineDataPayload {
                        mime_type: mime_type.clone(),
                        data: data.clone(),
                    },
                },
            })
            .collect();

        let system_instruction = (!request.system_instruction.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part::Text {
                text: request.system_instruction.clone(),
            }],
        });

        Self {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
            system_instruction,
        }
    }
}

#[derive(Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(untagged)]
enum Part {
    Text {
        text: String,
    },
    InlineData {
        #[serde(rename = "inlineData")]
        inline_data: InlineDataPayload,
    },
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InlineDataPayload {
    mime_type: String,
    data: String,
}

#[derive(Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

impl GenerateContentResponse {
    /// Concatenated text of the first candidate; empty when there is none.
    fn text(self) -> String {
        self.candidates
            .and_then(|candidates| candidates.into_iter().next())
            .and_then(|candidate| candidate.content)
            .map(|content| content.parts.into_iter().filter_map(|part| part.text).collect())
            .unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ContentResponse>,
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    parts: Vec<PartResponse>,
}

#[derive(Deserialize)]
struct PartResponse {
    text: Option<String>,
}

#[derive(Deserialize)]
struct ErrorWrapper {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    code: Option<u16>,
    message: Option<String>,
    status: Option<String>,
}

//=========================================================================================
// Helpers
//=========================================================================================

fn map_http_error(status: u16, body: &str) -> TransportError {
    match serde_json::from_str::<ErrorWrapper>(body) {
        Ok(wrapper) => {
            let message = wrapper.error.message.unwrap_or_else(|| body.to_string());
            TransportError::classify(
                Some(wrapper.error.code.unwrap_or(status)),
                wrapper.error.status.as_deref(),
                message,
            )
        }
        Err(_) => TransportError::classify(Some(status), None, body.to_string()),
    }
}

/// Interprets one SSE line. `None` for blank lines, comments and events without text.
fn parse_sse_line(line: &str) -> Option<Result<String, TransportError>> {
    let data = line.trim().strip_prefix("data:")?.trim();
    if data.is_empty() {
        return None;
    }
    if let Ok(wrapper) = serde_json::from_str::<ErrorWrapper>(data) {
        let message = wrapper.error.message.unwrap_or_else(|| data.to_string());
        return Some(Err(TransportError::classify(
            wrapper.error.code,
            wrapper.error.status.as_deref(),
            message,
        )));
    }
    match serde_json::from_str::<GenerateContentResponse>(data) {
        Ok(response) => {
            let text = response.text();
            (!text.is_empty()).then_some(Ok(text))
        }
        Err(err) => Some(Err(TransportError::fatal(
            None,
            format!("Failed to parse Gemini stream event: {err}"),
        ))),
    }
}
