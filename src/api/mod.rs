pub mod error;
pub mod handlers;
pub mod routes;
pub mod session;

pub use error::ApiError;
pub use handlers::AppState;
pub use routes::{create_router, resource_router};
pub use session::{with_session, SessionFuture};
