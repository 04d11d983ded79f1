//! HTTP route handlers.

pub mod files;
pub mod health;
