//! Domain layer for the Ridepool backend.
//!
//! This crate contains:
//! - Domain models (rides, groups, roster entries, channel events)
//! - Business logic services (ride matching)
//! - Domain error types

pub mod models;
pub mod services;
