pub mod config;
pub mod dtos;
pub mod handlers;
pub mod services;
pub mod startup;
pub mod utils;

pub use startup::{build_router, AppState, Application, Backends};
