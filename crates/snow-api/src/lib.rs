pub mod auth;
pub mod conversations;
pub mod error;
pub mod images;
pub mod middleware;
pub mod posts;
pub mod routes;
pub mod session;
pub mod state;
pub mod storage;

pub use error::{Result, ServiceError};
pub use routes::router;
pub use state::{AppState, AppStateInner};
