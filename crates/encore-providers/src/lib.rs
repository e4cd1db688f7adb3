// SPDX-License-Identifier: GPL-3.0-or-later

//! Chat-completion clients for the AI backends Encore asks for recommendations.
//!
//! All nine backends go through [`ProviderClient`]; the differences between
//! them (endpoint, payload shape, authentication, limits) live in a static
//! profile table keyed by [`ProviderKind`]. Each client carries its own rate
//! limiter, circuit breaker and health counters.

pub mod circuit_breaker;
pub mod client;
pub mod error;
pub mod health;
pub mod models;
pub mod profile;
pub mod provider;
pub mod rate_limiter;
mod wire;

pub use circuit_breaker::{CallPermit, CircuitBreaker, CircuitState};
pub use client::{ProviderClient, ProviderClientBuilder};
pub use encore_domain::ProviderKind;
pub use error::{ProviderError, Result};
pub use health::ProviderHealth;
pub use models::{ChatCompletion, ChatRequest};
pub use profile::{AuthStyle, ProviderProfile, WireFormat};
pub use provider::CompletionProvider;
pub use rate_limiter::RateLimiter;
