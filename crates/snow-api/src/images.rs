use axum::{Extension, Json, extract::State, response::IntoResponse};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use tracing::info;

use snow_ai::image::{data_uri, model_path};
use snow_ai::{ChatCompleter, GenerationOptions, ImageGenerator};
use snow_types::api::{GenerateImageRequest, GenerateImageResponse};

use crate::error::{Result, ServiceError};
use crate::session::SessionContext;
use crate::state::AppState;

pub const INFERENCE_STEPS: std::ops::RangeInclusive<u32> = 1..=50;
pub const GUIDANCE_SCALE: std::ops::RangeInclusive<f32> = 0.0..=20.0;

const SOURCE_IMAGE_TYPES: &[&str] = &["png", "jpeg", "jpg"];

/// Check the request and turn it into generator options.
pub fn generation_options(req: &GenerateImageRequest) -> Result<GenerationOptions> {
    if req.prompt.trim().is_empty() {
        return Err(ServiceError::validation("prompt is required"));
    }
    if !INFERENCE_STEPS.contains(&req.inference_steps) {
        return Err(ServiceError::validation("inference_steps must be between 1 and 50"));
    }
    if !GUIDANCE_SCALE.contains(&req.guidance_scale) {
        return Err(ServiceError::validation("guidance_scale must be between 0 and 20"));
    }

    let source_image = match &req.input_image {
        Some(encoded) => {
            let subtype = req.input_image_type.as_deref().unwrap_or("png");
            if !SOURCE_IMAGE_TYPES.contains(&subtype) {
                return Err(ServiceError::validation(
                    "input_image_type must be png, jpeg or jpg",
                ));
            }
            let bytes = B64
                .decode(encoded)
                .map_err(|_| ServiceError::validation("input_image is not valid base64"))?;
            Some(data_uri(subtype, &bytes))
        }
        None => None,
    };

    Ok(GenerationOptions {
        image_size: req.image_size,
        inference_steps: req.inference_steps,
        guidance_scale: req.guidance_scale,
        source_image,
        disable_safety_checker: req.disable_safety_checker,
    })
}

pub async fn generate_image(
    generator: Option<&ImageGenerator>,
    req: &GenerateImageRequest,
) -> Result<String> {
    let options = generation_options(req)?;
    if model_path(&req.model).is_none() {
        return Err(ServiceError::GenerationFailed(format!("unknown model '{}'", req.model)));
    }
    let generator = generator
        .ok_or_else(|| ServiceError::GenerationFailed("image generation is not configured".into()))?;

    Ok(generator.generate(&req.prompt, &req.model, &options).await?)
}

pub async fn generate<C: ChatCompleter + 'static>(
    State(state): State<AppState<C>>,
    Extension(session): Extension<SessionContext>,
    Json(req): Json<GenerateImageRequest>,
) -> Result<impl IntoResponse> {
    info!("Image requested by {} with model {}", session.username, req.model);
    let image_url = generate_image(state.images.as_ref(), &req).await?;
    Ok(Json(GenerateImageResponse { image_url }))
}
