//! HTTP request handlers organized by endpoint

pub mod api;
pub mod avatars;
pub mod health;
