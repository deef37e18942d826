//! # docbridge-core
//!
//! Core types, traits, and abstractions for docbridge.
//!
//! This crate provides the data model (credentials, pending contents, remote
//! blocks, import jobs), the shared error type, default constants, and the
//! collaborator traits the sync engine depends on.

pub mod defaults;
pub mod error;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use models::*;
pub use traits::*;
