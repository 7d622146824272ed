//! Configuration for the completion and image generation clients.

use std::env;
use std::fmt;
use std::time::Duration;

use crate::error::AiError;

/// Chat models offered to users.
pub const AVAILABLE_MODELS: &[&str] = &["gpt-4o-mini", "gpt-4o", "chatgpt-4o-latest"];

/// Model used when a request does not name one.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Settings for the OpenAI-compatible completion API.
#[derive(Clone)]
pub struct CompletionConfig {
    /// Base URL up to and including the version segment.
    pub api_base: String,
    pub api_key: String,
    /// Request timeout for non-streaming calls.
    pub timeout: Duration,
}

impl CompletionConfig {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_base: api_base.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Load from the environment.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `OPENAI_API_KEY` | (required) |
    /// | `OPENAI_API_BASE` | `https://api.openai.com/v1` |
    pub fn from_env() -> Result<Self, AiError> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| AiError::Configuration("OPENAI_API_KEY is not set".into()))?;
        let api_base =
            env::var("OPENAI_API_BASE").unwrap_or_else(|_| "https://api.openai.com/v1".into());

        Ok(Self::new(api_base, api_key))
    }
}

// Hand-written so the key never ends up in logs.
impl fmt::Debug for CompletionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionConfig")
            .field("api_base", &self.api_base)
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Settings for the queue-based image generation API.
#[derive(Clone)]
pub struct ImageConfig {
    pub queue_url: String,
    pub api_key: String,
    pub poll_interval: Duration,
    pub max_attempts: u32,
}

impl ImageConfig {
    pub fn new(queue_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            queue_url: queue_url.into(),
            api_key: api_key.into(),
            poll_interval: Duration::from_secs(1),
            max_attempts: 60,
        }
    }

    /// Load from the environment. Returns `None` when `FAL_KEY` is unset.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `FAL_KEY` | (optional) |
    /// | `FAL_QUEUE_URL` | `https://queue.fal.run` |
    pub fn from_env() -> Option<Self> {
        let api_key = env::var("FAL_KEY").ok().filter(|k| !k.is_empty())?;
        let queue_url = env::var("FAL_QUEUE_URL").unwrap_or_else(|_| "https://queue.fal.run".into());

        Some(Self::new(queue_url, api_key))
    }
}

impl fmt::Debug for ImageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageConfig")
            .field("queue_url", &self.queue_url)
            .field("api_key", &"<redacted>")
            .field("poll_interval", &self.poll_interval)
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}
