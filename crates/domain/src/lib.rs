//! # Postgate Domain
//!
//! Business domain types for the publishing pipeline.
//!
//! This crate contains:
//! - Publish jobs, content payloads and receipts
//! - The structured failure returned by the third-party publish call
//! - Credentials handed to the publisher
//! - Domain error types and Result definitions
//!
//! ## Architecture
//! - No dependencies on other Postgate crates
//! - Only external dependencies allowed
//! - Pure domain models and data structures

pub mod constants;
pub mod errors;
pub mod macros;
pub mod types;

// Re-export commonly used items
pub use errors::*;
pub use types::*;
