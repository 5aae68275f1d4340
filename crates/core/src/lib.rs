//! Core types and utilities for the price oracle
//!
//! This crate provides shared types used across all components:
//! - Chains, token pairs and price observations
//! - Typed per-source metadata
//! - Error taxonomy
//! - Configuration surface
//! - Clock abstraction

pub mod clock;
pub mod config;
pub mod errors;
pub mod observation;
pub mod types;

pub use clock::*;
pub use config::*;
pub use errors::*;
pub use observation::*;
pub use types::*;
