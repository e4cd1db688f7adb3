// SPDX-License-Identifier: GPL-3.0-or-later

//! Recommendation reconciliation: parse what providers return, top up until
//! the list is full, fail over between providers, and turn the result into
//! import list items.

pub mod cache;
pub mod cleanup;
pub mod error;
pub mod failover;
pub mod library;
pub mod prompt;
pub mod sanitizer;
pub mod service;
pub mod topup;

pub use cache::{CacheKey, RecommendationCache};
pub use cleanup::{execute_cleanup, plan_duplicate_cleanup, CleanupPlan, CleanupReport, DuplicateGroup};
pub use error::{RecommendationError, Result};
pub use failover::ProviderChain;
pub use library::LibraryProfile;
pub use prompt::PromptBuilder;
pub use sanitizer::{RecommendationSanitizer, SanitizedBatch};
pub use service::{FetchReport, ImportListService, ImportListServiceBuilder};
pub use topup::{
    BatchGenerator, GenerationRequest, StopReason, TopUpController, TopUpOutcome, TopUpSettings,
    TopUpState,
};
