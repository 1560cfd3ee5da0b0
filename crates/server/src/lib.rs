//! HyperFS server: HTTP/WebDAV adapter over the file service.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod service;
pub mod state;
pub mod sweep;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use service::FileService;
pub use state::AppState;
