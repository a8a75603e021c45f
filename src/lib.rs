pub mod avatar_cache;
pub mod config;
pub mod errors;
pub mod utils;
pub mod web;

pub use config::Config;
pub use errors::{AppError, AppResult};
