//! Adapters for the two external AI services: an OpenAI-compatible chat
//! completion API (plain and streaming) and a queue-based image generation API.

pub mod api_types;
pub mod completion;
pub mod config;
pub mod error;
pub mod image;
pub mod sentiment;

pub use api_types::WireMessage;
pub use completion::{ChatCompleter, CompletionClient, CompletionRequest, SnapshotStream};
pub use config::{AVAILABLE_MODELS, CompletionConfig, DEFAULT_MODEL, ImageConfig};
pub use error::AiError;
pub use image::{GenerationOptions, ImageGenerator};
pub use sentiment::{Sentiment, classify_sentiment};
