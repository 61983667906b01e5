//! Automated review collaborators.
//!
//! The gate only needs `send(system_prompt, user_message, model) -> text` from
//! a provider. Providers are registered per [`ProviderFamily`]; the family is
//! derived from the model identifier's prefix.

mod command;
mod verdict;

pub use command::CommandProvider;
pub use verdict::{parse_verdict, ReviewVerdict};

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ReviewError;

/// A language-model backend able to answer one review request.
#[async_trait]
pub trait ReviewProvider: Send + Sync {
    async fn send(
        &self,
        system_prompt: &str,
        user_message: &str,
        model: &str,
    ) -> std::result::Result<String, ReviewError>;
}

/// Provider family, keyed off model name prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFamily {
    Anthropic,
    OpenAi,
    Google,
    Zhipu,
    DeepSeek,
    Qwen,
    Mistral,
    /// Local / self-hosted models.
    Ollama,
}

impl ProviderFamily {
    pub fn from_model(model: &str) -> Self {
        let m = model.trim().to_ascii_lowercase();
        let has = |prefixes: &[&str]| prefixes.iter().any(|p| m.starts_with(p));

        if has(&["claude"]) {
            ProviderFamily::Anthropic
        } else if has(&["gpt", "o1", "o3", "o4", "chatgpt"]) {
            ProviderFamily::OpenAi
        } else if has(&["gemini"]) {
            ProviderFamily::Google
        } else if has(&["glm"]) {
            ProviderFamily::Zhipu
        } else if has(&["deepseek"]) {
            ProviderFamily::DeepSeek
        } else if has(&["qwen"]) {
            ProviderFamily::Qwen
        } else if has(&["mistral", "codestral"]) {
            ProviderFamily::Mistral
        } else {
            ProviderFamily::Ollama
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderFamily::Anthropic => "anthropic",
            ProviderFamily::OpenAi => "openai",
            ProviderFamily::Google => "google",
            ProviderFamily::Zhipu => "zhipu",
            ProviderFamily::DeepSeek => "deepseek",
            ProviderFamily::Qwen => "qwen",
            ProviderFamily::Mistral => "mistral",
            ProviderFamily::Ollama => "ollama",
        }
    }
}

impl fmt::Display for ProviderFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Providers by family, with an optional catch-all.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderFamily, Arc<dyn ReviewProvider>>,
    fallback: Option<Arc<dyn ReviewProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, family: ProviderFamily, provider: Arc<dyn ReviewProvider>) -> Self {
        self.providers.insert(family, provider);
        self
    }

    pub fn with_fallback(mut self, provider: Arc<dyn ReviewProvider>) -> Self {
        self.fallback = Some(provider);
        self
    }

    /// Provider for `model`, or the fallback when its family is not registered.
    pub fn resolve(&self, model: &str) -> Option<Arc<dyn ReviewProvider>> {
        self.providers
            .get(&ProviderFamily::from_model(model))
            .or(self.fallback.as_ref())
            .cloned()
    }

    /// Send through the provider resolved for `model`.
    pub async fn send(
        &self,
        system_prompt: &str,
        user_message: &str,
        model: &str,
    ) -> std::result::Result<String, ReviewError> {
        let provider = self.resolve(model).ok_or_else(|| ReviewError::NoProvider {
            model: model.to_string(),
        })?;
        provider.send(system_prompt, user_message, model).await
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty() && self.fallback.is_none()
    }
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut families: Vec<_> = self.providers.keys().map(|k| k.as_str()).collect();
        families.sort_unstable();
        f.debug_struct("ProviderRegistry")
            .field("families", &families)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}
