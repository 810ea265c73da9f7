mod app;
mod middleware;
mod state;

pub use app::create_app;
pub use middleware::{api_key_auth, track_http_metrics};
pub use state::{AppState, StateError};
