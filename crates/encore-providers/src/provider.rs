// SPDX-License-Identifier: GPL-3.0-or-later

use crate::error::Result;
use crate::models::{ChatCompletion, ChatRequest};
use crate::ProviderHealth;

/// Anything that can answer a chat completion request.
///
/// Implemented by [`crate::ProviderClient`]; the failover chain only sees this trait.
#[async_trait::async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Stable identifier used in logs and cache keys, e.g. `openai`.
    fn id(&self) -> &str;

    fn model(&self) -> &str;

    /// Largest number of recommendations to request in one call.
    fn max_items_per_request(&self) -> usize;

    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion>;

    async fn list_models(&self) -> Result<Vec<String>>;

    fn health(&self) -> Option<ProviderHealth> {
        None
    }
}
