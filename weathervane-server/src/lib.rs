//! http front of the weathervane lookup
//!
//! `main` loads the `Settings`, builds the handles and serves `routes::router`.

pub mod config;
pub mod logging;
pub mod routes;

pub use routes::{AppState, router};
