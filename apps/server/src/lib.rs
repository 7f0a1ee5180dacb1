pub mod api;
pub mod config;
pub mod error;
pub mod main_lib;

pub use main_lib::{build_provider_manager, build_state, init_tracing, AppState};
