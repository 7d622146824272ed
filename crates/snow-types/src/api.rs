use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ImageSize, LearningStyle, Tone};

// -- JWT Claims --

/// JWT claims issued at register/login and checked by the auth middleware.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub token: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub user_id: Uuid,
    pub username: String,
    pub token: String,
}

// -- Posts --

/// An image attached to a new post, sent inline as base64.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImageUpload {
    /// Original file name; only its extension is kept.
    pub filename: String,
    pub data: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreatePostRequest {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub image: Option<ImageUpload>,
}

#[derive(Debug, Serialize)]
pub struct PostResponse {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    /// First 200 characters of `content`, with `...` appended when cut.
    pub preview: String,
    pub author_id: Uuid,
    pub author_username: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub image_url: Option<String>,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateConversationRequest {
    pub title: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub tone: Option<Tone>,
    #[serde(default)]
    pub style: Option<LearningStyle>,
}

// -- Images --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerateImageRequest {
    pub prompt: String,
    #[serde(default = "default_image_model")]
    pub model: String,
    #[serde(default)]
    pub image_size: ImageSize,
    #[serde(default = "default_inference_steps")]
    pub inference_steps: u32,
    #[serde(default = "default_guidance_scale")]
    pub guidance_scale: f32,
    /// Base64 source image for image-to-image models.
    #[serde(default)]
    pub input_image: Option<String>,
    /// MIME subtype of `input_image` (`png`, `jpeg`).
    #[serde(default)]
    pub input_image_type: Option<String>,
    #[serde(default)]
    pub disable_safety_checker: bool,
}

fn default_image_model() -> String {
    "flux-dev".to_string()
}

fn default_inference_steps() -> u32 {
    28
}

fn default_guidance_scale() -> f32 {
    3.5
}

#[derive(Debug, Serialize)]
pub struct GenerateImageResponse {
    pub image_url: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_request_fills_defaults() {
        let req: GenerateImageRequest =
            serde_json::from_str(r#"{"prompt":"a snowy owl"}"#).unwrap();
        assert_eq!(req.model, "flux-dev");
        assert_eq!(req.image_size, ImageSize::Landscape4x3);
        assert_eq!(req.inference_steps, 28);
        assert!((req.guidance_scale - 3.5).abs() < f32::EPSILON);
        assert!(!req.disable_safety_checker);
    }

    #[test]
    fn send_message_rejects_unknown_fields() {
        let res = serde_json::from_str::<SendMessageRequest>(r#"{"content":"hi","temp":1}"#);
        assert!(res.is_err());
    }
}
