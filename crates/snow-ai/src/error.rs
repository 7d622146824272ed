use thiserror::Error;

/// Errors from the external AI services. None of them are retried here;
/// the caller decides whether to resubmit.
#[derive(Debug, Error)]
pub enum AiError {
    #[error("completion failed: {cause}")]
    CompletionFailed { cause: String },

    #[error("image generation timed out after {attempts} status checks")]
    GenerationTimeout { attempts: u32 },

    #[error("image generation failed: {cause}")]
    GenerationFailed { cause: String },

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl AiError {
    pub fn completion(cause: impl Into<String>) -> Self {
        Self::CompletionFailed { cause: cause.into() }
    }

    pub fn generation(cause: impl Into<String>) -> Self {
        Self::GenerationFailed { cause: cause.into() }
    }
}
