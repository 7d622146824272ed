use std::sync::Arc;

use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use tracing::info;
use uuid::Uuid;

use snow_ai::ChatCompleter;
use snow_db::Database;
use snow_types::api::{CreatePostRequest, PostResponse};
use snow_types::models::Post;

use crate::error::{Result, ServiceError};
use crate::session::SessionContext;
use crate::state::{AppState, run_blocking};
use crate::storage::{ObjectStore, extension_of};

/// Number of posts shown on the front page.
pub const RECENT_POSTS_LIMIT: u32 = 5;

pub const MAX_TITLE_LEN: usize = 100;

const PREVIEW_CHARS: usize = 200;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Raw image attached to a new post.
pub struct NewImage {
    pub filename: String,
    pub bytes: Vec<u8>,
}

fn validate_post(title: &str, content: &str, image: Option<&NewImage>) -> Result<()> {
    if title.trim().is_empty() {
        return Err(ServiceError::validation("title is required"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(ServiceError::validation(format!(
            "title must be at most {} characters",
            MAX_TITLE_LEN
        )));
    }
    if content.trim().is_empty() {
        return Err(ServiceError::validation("content is required"));
    }
    if let Some(image) = image {
        let ext = extension_of(&image.filename).unwrap_or_default();
        if !IMAGE_EXTENSIONS.contains(&ext.as_str()) {
            return Err(ServiceError::validation("image must be a png, jpg or jpeg file"));
        }
    }
    Ok(())
}

/// Publish a post, uploading its image first when one is attached.
pub async fn create_post(
    db: &Arc<Database>,
    storage: &ObjectStore,
    title: &str,
    content: &str,
    author_id: Uuid,
    image: Option<NewImage>,
) -> Result<Post> {
    validate_post(title, content, image.as_ref())?;

    let image_url = match image {
        Some(image) => Some(storage.put(&image.filename, &image.bytes).await?),
        None => None,
    };

    let post_id = Uuid::new_v4();
    let db = db.clone();
    let (title, content) = (title.to_string(), content.to_string());
    let row = run_blocking(move || {
        Ok(db.insert_post(
            &post_id.to_string(),
            &title,
            &content,
            &author_id.to_string(),
            image_url.as_deref(),
        )?)
    })
    .await?;

    info!("Post {} published by {}", post_id, author_id);
    Ok(row.into_post()?)
}

/// Newest posts first, each joined with its author's username.
pub fn list_recent_posts(db: &Database, limit: u32) -> Result<Vec<Post>> {
    db.recent_posts(limit)?
        .into_iter()
        .map(|row| row.into_post().map_err(ServiceError::from))
        .collect()
}

/// First 200 characters of `content`, with `...` appended when cut.
pub fn preview(content: &str) -> String {
    let mut chars = content.char_indices();
    match chars.nth(PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}

fn to_response(post: Post) -> PostResponse {
    PostResponse {
        preview: preview(&post.content),
        id: post.id,
        title: post.title,
        content: post.content,
        author_id: post.author_id,
        author_username: post.author_username,
        created_at: post.created_at,
        image_url: post.image_url,
    }
}

pub async fn recent_posts<C: ChatCompleter + 'static>(
    State(state): State<AppState<C>>,
) -> Result<impl IntoResponse> {
    let db = state.db.clone();
    let posts = run_blocking(move || list_recent_posts(&db, RECENT_POSTS_LIMIT)).await?;
    Ok(Json(posts.into_iter().map(to_response).collect::<Vec<_>>()))
}

pub async fn publish_post<C: ChatCompleter + 'static>(
    State(state): State<AppState<C>>,
    Extension(session): Extension<SessionContext>,
    Json(req): Json<CreatePostRequest>,
) -> Result<impl IntoResponse> {
    let image = match req.image {
        Some(upload) => Some(NewImage {
            bytes: B64
                .decode(&upload.data)
                .map_err(|_| ServiceError::validation("image data is not valid base64"))?,
            filename: upload.filename,
        }),
        None => None,
    };

    let post = create_post(
        &state.db,
        &state.storage,
        &req.title,
        &req.content,
        session.user_id,
        image,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(to_response(post))))
}
