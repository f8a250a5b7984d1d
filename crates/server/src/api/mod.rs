pub mod handlers;
pub mod middleware;
pub mod plugins;
pub mod providers;
pub mod routes;
pub mod search;

pub use handlers::{ApiError, ErrorResponse};
pub use routes::create_router;
