//! Shared utilities for the Ridepool backend.
//!
//! This crate provides common functionality used across all other crates:
//! - JWT access-token validation
//! - Common validation logic

pub mod jwt;
pub mod validation;
