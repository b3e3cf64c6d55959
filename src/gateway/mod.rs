//! Provider gateway for OpenRouter chat completions.
//!
//! One HTTP call per method, no retries here: the retry policy belongs to
//! [`crate::inference::InferenceClient`].

pub mod error;
pub mod openrouter;
pub mod types;

use std::sync::Arc;

pub use error::{ErrorContext, ProviderError};
pub use openrouter::{ChatProvider, OpenRouterAdapter};
pub use types::*;

use crate::config::HarnessConfig;

/// Build the OpenRouter provider described by `config`.
///
/// Fails with [`ProviderError::Config`] when no API key is configured.
pub fn provider_from_config(config: &HarnessConfig) -> Result<Arc<dyn ChatProvider>, ProviderError> {
    let api_key = config
        .api_key
        .as_deref()
        .ok_or_else(|| ProviderError::config("OPENROUTER_API_KEY not set"))?;
    let adapter = OpenRouterAdapter::with_config(api_key, &config.base_url, config.call_timeout)?;
    Ok(Arc::new(adapter))
}
