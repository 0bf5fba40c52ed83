//! Utility modules shared across the crate.
//!
//! - Error types
//! - Symbol interning
//! - Code formatting
//! - JIT configuration

pub mod errors;
pub mod intern;
pub mod pretty;
pub mod config;

// Re-exports
pub use errors::*;
pub use intern::{intern, unique_name, Symbol};
pub use config::JitConfig;
