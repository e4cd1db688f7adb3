// SPDX-License-Identifier: GPL-3.0-or-later

use encore_domain::ProviderKind;

/// Request/response schema spoken by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// `POST {base}/chat/completions`
    OpenAiChat,
    /// `POST {base}/v1/messages`
    Anthropic,
    /// `POST {base}/v1beta/models/{model}:generateContent`
    Gemini,
    /// `POST {base}/api/chat`
    Ollama,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStyle {
    None,
    Bearer,
    /// `x-api-key` header.
    ApiKeyHeader,
    /// `key` query parameter.
    QueryKey,
}

/// Static description of one backend.
#[derive(Debug, Clone, Copy)]
pub struct ProviderProfile {
    pub kind: ProviderKind,
    pub wire: WireFormat,
    pub auth: AuthStyle,
    pub default_base_url: &'static str,
    pub default_model: &'static str,
    /// Largest number of recommendations asked for in one call.
    pub max_items_per_request: usize,
}

const PROFILES: [ProviderProfile; 9] = [
    ProviderProfile {
        kind: ProviderKind::Ollama,
        wire: WireFormat::Ollama,
        auth: AuthStyle::None,
        default_base_url: "http://localhost:11434",
        default_model: "llama3.2",
        max_items_per_request: 25,
    },
    ProviderProfile {
        kind: ProviderKind::LmStudio,
        wire: WireFormat::OpenAiChat,
        auth: AuthStyle::None,
        default_base_url: "http://localhost:1234/v1",
        default_model: "local-model",
        max_items_per_request: 25,
    },
    ProviderProfile {
        kind: ProviderKind::OpenAi,
        wire: WireFormat::OpenAiChat,
        auth: AuthStyle::Bearer,
        default_base_url: "https://api.openai.com/v1",
        default_model: "gpt-4o-mini",
        max_items_per_request: 50,
    },
    ProviderProfile {
        kind: ProviderKind::Anthropic,
        wire: WireFormat::Anthropic,
        auth: AuthStyle::ApiKeyHeader,
        default_base_url: "https://api.anthropic.com",
        default_model: "claude-3-5-haiku-latest",
        max_items_per_request: 50,
    },
    ProviderProfile {
        kind: ProviderKind::Gemini,
        wire: WireFormat::Gemini,
        auth: AuthStyle::QueryKey,
        default_base_url: "https://generativelanguage.googleapis.com",
        default_model: "gemini-1.5-flash",
        max_items_per_request: 50,
    },
    ProviderProfile {
        kind: ProviderKind::Groq,
        wire: WireFormat::OpenAiChat,
        auth: AuthStyle::Bearer,
        default_base_url: "https://api.groq.com/openai/v1",
        default_model: "llama-3.3-70b-versatile",
        max_items_per_request: 40,
    },
    ProviderProfile {
        kind: ProviderKind::DeepSeek,
        wire: WireFormat::OpenAiChat,
        auth: AuthStyle::Bearer,
        default_base_url: "https://api.deepseek.com/v1",
        default_model: "deepseek-chat",
        max_items_per_request: 50,
    },
    ProviderProfile {
        kind: ProviderKind::Perplexity,
        wire: WireFormat::OpenAiChat,
        auth: AuthStyle::Bearer,
        default_base_url: "https://api.perplexity.ai",
        default_model: "sonar",
        max_items_per_request: 30,
    },
    ProviderProfile {
        kind: ProviderKind::OpenRouter,
        wire: WireFormat::OpenAiChat,
        auth: AuthStyle::Bearer,
        default_base_url: "https://openrouter.ai/api/v1",
        default_model: "openai/gpt-4o-mini",
        max_items_per_request: 50,
    },
];

impl ProviderProfile {
    pub fn for_kind(kind: ProviderKind) -> &'static ProviderProfile {
        PROFILES
            .iter()
            .find(|profile| profile.kind == kind)
            .unwrap_or(&PROFILES[0])
    }

    pub fn requires_api_key(&self) -> bool {
        self.auth != AuthStyle::None
    }
}
