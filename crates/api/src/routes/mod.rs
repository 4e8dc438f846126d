//! HTTP route handlers.

pub mod groups;
pub mod health;
pub mod rides;
pub mod ws;
