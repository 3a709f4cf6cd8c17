pub mod ai;
pub mod auth;
pub mod chats;
pub mod error;
pub mod folders;
pub mod market;
pub mod messages;
pub mod middleware;
pub mod premium;
pub mod realtime;
pub mod routes;
pub mod search;
pub mod state;

pub use error::{ApiError, ApiResult};
pub use routes::router;
pub use state::{AppState, AppStateInner};
