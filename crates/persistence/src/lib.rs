//! Persistence layer for the Ridepool backend.
//!
//! This crate contains:
//! - Database connection management
//! - Entity definitions (database row mappings)
//! - Repository implementations
//! - SQL migrations (embedded by the api binary)

pub mod db;
pub mod entities;
pub mod metrics;
pub mod repositories;
