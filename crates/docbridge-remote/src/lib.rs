//! # docbridge-remote
//!
//! REST access to the remote document platform.
//!
//! This crate provides:
//! - Per-endpoint-class rate limiting
//! - Bounded exponential-backoff retry
//! - Uniform `{code, msg, data}` envelope decoding and error classification
//! - OAuth token lifecycle with deduplicated refresh and interactive re-auth
//! - The [`DocumentApi`] trait and its HTTP implementation
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use docbridge_remote::{
//!     AuthSignal, FileCredentialStore, HttpDocumentApi, LogAuthorizationPrompt, RemoteConfig,
//!     RestClient, TokenManager,
//! };
//!
//! #[tokio::main]
//! async fn main() -> docbridge_remote::Result<()> {
//!     let rest = Arc::new(RestClient::new(RemoteConfig::from_env())?);
//!     let tokens = TokenManager::load(
//!         rest.clone(),
//!         Arc::new(FileCredentialStore::new("credentials.json")),
//!         Arc::new(LogAuthorizationPrompt),
//!         AuthSignal::new(),
//!     )
//!     .await?;
//!     let api = HttpDocumentApi::new(rest, tokens);
//!     let _ = api;
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod rate_limit;
pub mod retry;
pub mod types;

// Re-export core types
pub use docbridge_core::*;

pub use api::{DocumentApi, HttpDocumentApi};
pub use auth::TokenManager;
pub use config::RemoteConfig;
pub use error::RemoteErrorCode;
pub use http::RestClient;
pub use rate_limit::{EndpointClass, RateLimit, RateLimiter};
pub use retry::RetryPolicy;
pub use types::{
    text_run, BlockPage, BlockUpdate, BlockUpdateRequest, CreateDescendantRequest,
    CreatedDescendants, DriveFileKind, ImportTaskResult, MediaKind, NewBlock,
};
