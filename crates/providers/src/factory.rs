//! Backend factory: turns `[model]` / `[summary_model]` config sections
//! into ready-to-use providers.
//!
//! Every backend is validated here, at construction, so a misconfigured
//! model surfaces at startup instead of on the first user turn.

use std::sync::Arc;
use std::time::Duration;
use stockwise_config::{AppConfig, BackendConfig, RemoteBackendConfig};
use stockwise_core::error::ProviderError;
use stockwise_core::provider::{ModelOptions, Provider};
use tracing::info;
use crate::openai_compat::OpenAiCompatProvider;
use crate::retry::{RetryPolicy, RetryingProvider};

/// A provider paired with the generation options it should be called with.
#[derive(Clone)]
pub struct Backend {
    pub provider: Arc<dyn Provider>,
    pub options: ModelOptions,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("provider", &self.provider.name())
            .field("options", &self.options)
            .finish()
    }
}

/// Generation options for a backend section.
pub fn options_for(backend: &BackendConfig) -> Result<ModelOptions, ProviderError> {
    let mut options = ModelOptions::new(backend.model()).with_temperature(backend.temperature());
    if let Some(max_tokens) = backend.max_tokens() {
        options = options.with_max_tokens(max_tokens);
    }
    options.validate()?;
    Ok(options)
}

fn remote(
    name: &str,
    default_url: Option<&str>,
    remote: &RemoteBackendConfig,
    api_key: Option<String>,
    key_required: bool,
) -> Result<Arc<dyn Provider>, ProviderError> {
    let api_key = match api_key {
        Some(key) => key,
        None if key_required => {
            return Err(ProviderError::NotConfigured(format!(
                "no API key for the {name} backend (set api_key or the provider's env var)"
            )));
        }
        None => String::new(),
    };
    let base_url = remote
        .base_url
        .as_deref()
        .or(default_url)
        .ok_or_else(|| ProviderError::NotConfigured(format!("{name} backend requires base_url")))?;

    Ok(Arc::new(
        OpenAiCompatProvider::new(name, base_url, api_key)
            .with_timeout(Duration::from_secs(remote.timeout_secs)),
    ))
}

/// Build the raw (un-retried) provider for one backend section.
pub fn build_provider(
    backend: &BackendConfig,
    api_key: Option<String>,
) -> Result<Arc<dyn Provider>, ProviderError> {
    match backend {
        BackendConfig::Openai(r) => remote(
            "openai",
            Some(OpenAiCompatProvider::openai("").base_url()),
            r,
            api_key,
            true,
        ),
        BackendConfig::Gemini(r) => remote(
            "gemini",
            Some(OpenAiCompatProvider::gemini("").base_url()),
            r,
            api_key,
            true,
        ),
        BackendConfig::Ollama(r) => remote(
            "ollama",
            Some(OpenAiCompatProvider::ollama(None).base_url()),
            r,
            api_key.or_else(|| Some("ollama".into())),
            false,
        ),
        BackendConfig::Compatible(r) => remote("compatible", None, r, api_key, false),
        #[cfg(feature = "local")]
        BackendConfig::Local(l) => Ok(Arc::new(crate::local::LocalProvider::new(&l.model))),
        #[cfg(not(feature = "local"))]
        BackendConfig::Local(_) => Err(ProviderError::NotConfigured(
            "local inference requires building with the `local` feature".into(),
        )),
    }
}

/// Build a backend section wrapped in the configured retry policy.
pub fn build_backend(
    config: &AppConfig,
    backend: &BackendConfig,
) -> Result<Backend, ProviderError> {
    let options = options_for(backend)?;
    let raw = build_provider(backend, config.api_key_for(backend))?;
    let provider = Arc::new(RetryingProvider::new(raw, RetryPolicy::from_config(&config.retry)));

    info!(
        backend = backend.kind(),
        model = %options.model,
        "Model backend ready"
    );

    Ok(Backend { provider, options })
}

/// The reasoning backend from `[model]`.
pub fn build_reasoning_backend(config: &AppConfig) -> Result<Backend, ProviderError> {
    build_backend(config, &config.model)
}

/// The summarization backend from `[summary_model]`.
pub fn build_summary_backend(config: &AppConfig) -> Result<Backend, ProviderError> {
    build_backend(config, &config.summary_model)
}
