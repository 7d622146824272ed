use std::sync::Arc;

use snow_ai::ImageGenerator;
use snow_db::Database;
use tracing::error;

use crate::auth::JwtKeys;
use crate::error::{Result, ServiceError};
use crate::storage::ObjectStore;

pub type AppState<C> = Arc<AppStateInner<C>>;

/// Shared handles for every request. `C` is the chat completer, the real HTTP
/// client in the server and a scripted one in tests.
pub struct AppStateInner<C> {
    pub db: Arc<Database>,
    pub jwt: JwtKeys,
    pub completer: Arc<C>,
    /// `None` when no image provider key is configured.
    pub images: Option<ImageGenerator>,
    pub storage: ObjectStore,
}

impl<C> AppStateInner<C> {
    pub fn new(db: Database, jwt: JwtKeys, completer: C, storage: ObjectStore) -> Self {
        Self {
            db: Arc::new(db),
            jwt,
            completer: Arc::new(completer),
            images: None,
            storage,
        }
    }

    pub fn with_images(mut self, images: ImageGenerator) -> Self {
        self.images = Some(images);
        self
    }
}

/// Run SQLite or password-hashing work off the async runtime.
pub async fn run_blocking<F, T>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        ServiceError::Internal(format!("blocking task failed: {}", e))
    })?
}
