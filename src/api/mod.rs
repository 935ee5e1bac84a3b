// src/api/mod.rs
pub mod handlers;
pub mod routes;
pub mod state;

pub use handlers::ws::{forward_events, WsBroker};
pub use routes::configure_routes;
pub use state::AppState;
