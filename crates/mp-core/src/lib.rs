//! # mp-core
//!
//! Core types shared by the Manufacturing Portal RS crates:
//! - The portal error taxonomy and validation error collection
//! - Result type alias
//! - Configuration types and loading

pub mod config;
pub mod error;

pub use error::*;

/// Standard Result type for portal operations
pub type PortalResult<T> = Result<T, PortalError>;
