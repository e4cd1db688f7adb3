// SPDX-License-Identifier: GPL-3.0-or-later

//! Payload shapes for each [`WireFormat`].

use crate::error::{ProviderError, Result};
use crate::models::ChatRequest;
use crate::profile::WireFormat;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

// ============================================================================
// OpenAI-compatible
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiMessage {
    #[serde(default)]
    content: Option<String>,
}

// ============================================================================
// Anthropic
// ============================================================================

#[derive(Debug, Serialize)]
struct AnthropicRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    system: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(rename = "type")]
    block_type: String,
    #[serde(default)]
    text: Option<String>,
}

// ============================================================================
// Gemini
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct GeminiPart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeminiContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    temperature: f32,
    max_output_tokens: u32,
    response_mime_type: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    system_instruction: GeminiContent,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<GeminiContent>,
}

// ============================================================================
// Ollama
// ============================================================================

#[derive(Debug, Serialize)]
struct OllamaOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Debug, Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Debug, Deserialize)]
struct OllamaResponse {
    message: Option<OllamaMessage>,
}

#[derive(Debug, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

fn messages<'a>(request: &'a ChatRequest) -> Vec<Message<'a>> {
    vec![
        Message {
            role: "system",
            content: &request.system,
        },
        Message {
            role: "user",
            content: &request.prompt,
        },
    ]
}

/// Serialize a chat request for the given format.
pub(crate) fn encode_request(wire: WireFormat, model: &str, request: &ChatRequest) -> Result<Value> {
    let value = match wire {
        WireFormat::OpenAiChat => serde_json::to_value(OpenAiRequest {
            model,
            messages: messages(request),
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        })?,
        WireFormat::Anthropic => serde_json::to_value(AnthropicRequest {
            model,
            max_tokens: request.max_tokens,
            system: &request.system,
            messages: vec![Message {
                role: "user",
                content: &request.prompt,
            }],
            temperature: request.temperature,
        })?,
        WireFormat::Gemini => serde_json::to_value(GeminiRequest {
            contents: vec![GeminiContent {
                role: Some("user".to_string()),
                parts: vec![GeminiPart {
                    text: Some(request.prompt.clone()),
                }],
            }],
            system_instruction: GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: Some(request.system.clone()),
                }],
            },
            generation_config: GeminiGenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
                response_mime_type: "application/json",
            },
        })?,
        WireFormat::Ollama => serde_json::to_value(OllamaRequest {
            model,
            messages: messages(request),
            stream: false,
            options: OllamaOptions {
                temperature: request.temperature,
                num_predict: request.max_tokens,
            },
        })?,
    };
    Ok(value)
}

/// Extract the assistant text from a completion response body.
pub(crate) fn decode_completion(wire: WireFormat, body: &str) -> Result<String> {
    let text = match wire {
        WireFormat::OpenAiChat => {
            let response: OpenAiResponse = serde_json::from_str(body)?;
            response
                .choices
                .into_iter()
                .next()
                .and_then(|choice| choice.message.content)
                .ok_or_else(|| ProviderError::InvalidResponse("no choices in response".into()))?
        }
        WireFormat::Anthropic => {
            let response: AnthropicResponse = serde_json::from_str(body)?;
            response
                .content
                .into_iter()
                .filter(|block| block.block_type == "text")
                .filter_map(|block| block.text)
                .collect::<Vec<_>>()
                .join("")
        }
        WireFormat::Gemini => {
            let response: GeminiResponse = serde_json::from_str(body)?;
            response
                .candidates
                .into_iter()
                .next()
                .and_then(|candidate| candidate.content)
                .map(|content| {
                    content
                        .parts
                        .into_iter()
                        .filter_map(|part| part.text)
                        .collect::<Vec<_>>()
                        .join("")
                })
                .ok_or_else(|| ProviderError::InvalidResponse("no candidates in response".into()))?
        }
        WireFormat::Ollama => {
            let response: OllamaResponse = serde_json::from_str(body)?;
            response
                .message
                .map(|message| message.content)
                .ok_or_else(|| ProviderError::InvalidResponse("no message in response".into()))?
        }
    };

    if text.trim().is_empty() {
        return Err(ProviderError::InvalidResponse("empty completion".into()));
    }
    Ok(text)
}

/// Extract model identifiers from a model listing response.
pub(crate) fn decode_models(wire: WireFormat, body: &str) -> Result<Vec<String>> {
    let value: Value = serde_json::from_str(body)?;
    let models = match wire {
        WireFormat::OpenAiChat | WireFormat::Anthropic => value["data"]
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| item["id"].as_str().map(str::to_string))
                    .collect()
            }),
        WireFormat::Gemini => value["models"].as_array().map(|items| {
            items
                .iter()
                .filter_map(|item| item["name"].as_str())
                .map(|name| name.trim_start_matches("models/").to_string())
                .collect()
        }),
        WireFormat::Ollama => value["models"].as_array().map(|items| {
            items
                .iter()
                .filter_map(|item| item["name"].as_str().map(str::to_string))
                .collect()
        }),
    };
    models.ok_or_else(|| ProviderError::InvalidResponse("unexpected model listing".into()))
}
