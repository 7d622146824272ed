//! Client for a queue-based image generation API.
//!
//! A job is submitted, then its status URL is polled on a fixed interval until
//! it completes, fails, or the attempt budget runs out.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use snow_types::models::ImageSize;
use tracing::{debug, info};

use crate::config::ImageConfig;
use crate::error::AiError;

/// User-facing model keys and the provider paths they map to.
pub const IMAGE_MODELS: &[(&str, &str)] = &[
    ("flux-dev", "fal-ai/flux/dev"),
    ("sd-v3-medium", "fal-ai/stable-diffusion-v3-medium"),
    ("flux-realism", "fal-ai/flux-realism"),
    ("flux-lora", "fal-ai/flux-lora"),
    ("flux-dev-image-to-image", "fal-ai/flux/dev/image-to-image"),
    ("lora-image-to-image", "fal-ai/lora/image-to-image"),
    ("fast-sdxl", "fal-ai/fast-sdxl"),
];

pub fn model_path(key: &str) -> Option<&'static str> {
    IMAGE_MODELS
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, path)| *path)
}

pub fn is_image_to_image(key: &str) -> bool {
    key.contains("image-to-image")
}

/// Encode raw image bytes as a `data:` URI accepted as a source image.
pub fn data_uri(subtype: &str, bytes: &[u8]) -> String {
    format!("data:image/{};base64,{}", subtype, B64.encode(bytes))
}

#[derive(Debug, Clone)]
pub struct GenerationOptions {
    pub image_size: ImageSize,
    pub inference_steps: u32,
    pub guidance_scale: f32,
    /// URL or data URI; only sent for image-to-image models.
    pub source_image: Option<String>,
    pub disable_safety_checker: bool,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            image_size: ImageSize::default(),
            inference_steps: 28,
            guidance_scale: 3.5,
            source_image: None,
            disable_safety_checker: false,
        }
    }
}

#[derive(Debug, Serialize)]
struct JobArguments<'a> {
    prompt: &'a str,
    image_size: &'static str,
    num_inference_steps: u32,
    guidance_scale: f32,
    num_images: u32,
    enable_safety_checker: bool,
    sync_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    image_url: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct QueuedJob {
    request_id: String,
    status_url: String,
    response_url: String,
}

#[derive(Debug, Deserialize)]
struct JobStatus {
    status: String,
}

#[derive(Debug, Deserialize)]
struct JobResult {
    #[serde(default)]
    images: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    url: String,
}

/// Where a polled job stands.
#[derive(Debug, PartialEq, Eq)]
enum Progress {
    Queued,
    InProgress,
    Completed,
    Other(String),
}

impl Progress {
    fn parse(status: &str) -> Self {
        match status {
            "IN_QUEUE" => Progress::Queued,
            "IN_PROGRESS" => Progress::InProgress,
            "COMPLETED" => Progress::Completed,
            other => Progress::Other(other.to_string()),
        }
    }
}

pub struct ImageGenerator {
    http: Client,
    config: ImageConfig,
}

impl ImageGenerator {
    pub fn new(config: ImageConfig) -> Result<Self, AiError> {
        let http = Client::builder()
            .build()
            .map_err(|e| AiError::Configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http, config })
    }

    /// Generate one image and return its URL.
    pub async fn generate(
        &self,
        prompt: &str,
        model_key: &str,
        options: &GenerationOptions,
    ) -> Result<String, AiError> {
        let path = model_path(model_key)
            .ok_or_else(|| AiError::generation(format!("unknown model '{}'", model_key)))?;

        let source_image = if is_image_to_image(model_key) {
            options.source_image.as_deref()
        } else {
            None
        };

        let arguments = JobArguments {
            prompt,
            image_size: options.image_size.as_str(),
            num_inference_steps: options.inference_steps,
            guidance_scale: options.guidance_scale,
            num_images: 1,
            enable_safety_checker: !options.disable_safety_checker,
            sync_mode: false,
            image_url: source_image,
        };

        let url = format!("{}/{}", self.config.queue_url.trim_end_matches('/'), path);
        let job: QueuedJob = self
            .send(self.http.post(&url).json(&arguments))
            .await?
            .json()
            .await
            .map_err(|e| AiError::generation(format!("unreadable submit response: {}", e)))?;

        info!("Submitted image job {} to {}", job.request_id, path);

        for attempt in 1..=self.config.max_attempts {
            let status: JobStatus = self
                .send(self.http.get(&job.status_url))
                .await?
                .json()
                .await
                .map_err(|e| AiError::generation(format!("unreadable status response: {}", e)))?;

            match Progress::parse(&status.status) {
                Progress::Completed => return self.fetch_result(&job).await,
                Progress::Queued | Progress::InProgress => {
                    debug!("Image job {} {} (attempt {})", job.request_id, status.status, attempt);
                    if attempt < self.config.max_attempts {
                        tokio::time::sleep(self.config.poll_interval).await;
                    }
                }
                Progress::Other(other) => {
                    return Err(AiError::generation(format!("unknown status: {}", other)));
                }
            }
        }

        Err(AiError::GenerationTimeout {
            attempts: self.config.max_attempts,
        })
    }

    async fn fetch_result(&self, job: &QueuedJob) -> Result<String, AiError> {
        let result: JobResult = self
            .send(self.http.get(&job.response_url))
            .await?
            .json()
            .await
            .map_err(|e| AiError::generation(format!("unreadable result: {}", e)))?;

        result
            .images
            .into_iter()
            .next()
            .map(|image| image.url)
            .ok_or_else(|| AiError::generation("job completed without images"))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<reqwest::Response, AiError> {
        let response = request
            .header("Authorization", format!("Key {}", self.config.api_key))
            .send()
            .await
            .map_err(|e| AiError::generation(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AiError::generation(format!("API error ({}): {}", status.as_u16(), body)));
        }

        Ok(response)
    }
}
