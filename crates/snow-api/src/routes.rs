use axum::{
    Router, middleware,
    routing::{delete, get, post},
};

use snow_ai::ChatCompleter;

use crate::middleware::require_auth;
use crate::state::AppState;
use crate::{auth, conversations, images, posts};

/// All API routes. Everything except registration, login and the post
/// listing requires a bearer token.
pub fn router<C: ChatCompleter + 'static>(state: AppState<C>) -> Router {
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register::<C>))
        .route("/auth/login", post(auth::login::<C>))
        .route("/posts", get(posts::recent_posts::<C>))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/posts", post(posts::publish_post::<C>))
        .route(
            "/conversations",
            get(conversations::list::<C>).post(conversations::create::<C>),
        )
        .route("/conversations/{conversation_id}", delete(conversations::delete::<C>))
        .route(
            "/conversations/{conversation_id}/messages",
            get(conversations::history::<C>).post(conversations::send_message::<C>),
        )
        .route(
            "/conversations/{conversation_id}/messages/stream",
            post(conversations::stream_message::<C>),
        )
        .route("/images", post(images::generate::<C>))
        .layer(middleware::from_fn_with_state(state.jwt.clone(), require_auth))
        .with_state(state);

    Router::new().merge(public_routes).merge(protected_routes)
}
