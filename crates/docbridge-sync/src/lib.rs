//! # docbridge-sync
//!
//! Publishing engine built on top of [`docbridge_remote`].
//!
//! This crate provides:
//! - Import jobs: upload a Markdown source, convert it, poll until settled
//! - Placeholder resolution: bind images, files, callouts and linked notes
//! - In-place replacement of an existing document with rollback
//! - The [`Publisher`] facade returning structured [`PublishResult`]s
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use docbridge_sync::{FsContentSource, HttpDocumentApi, Publisher, SyncConfig};
//! # async fn demo(api: HttpDocumentApi) {
//! let auth = Arc::new(api.tokens().clone());
//! let publisher = Publisher::new(
//!     Arc::new(api),
//!     auth,
//!     Arc::new(FsContentSource::new("vault")),
//!     SyncConfig::from_env(),
//! );
//! let result = publisher.publish("Notes", "# Notes\n\nHello", &[]).await;
//! println!("{:?}", result.url);
//! # }
//! ```

pub mod blocks;
pub mod config;
pub mod copy;
pub mod import;
pub mod permissions;
pub mod placeholder;
pub mod publisher;
pub mod replace;

#[cfg(test)]
pub mod mock;

// Re-export remote and core types
pub use docbridge_remote::*;

pub use blocks::{fetch_all_blocks, BlockTree};
pub use config::SyncConfig;
pub use copy::{BlockCopier, CopyReport};
pub use import::{classify, DocumentImporter, ImportPoller, ImportedDocument};
pub use permissions::{discard_file, set_link_sharing};
pub use placeholder::{PlaceholderMatch, PlaceholderPattern, PlaceholderResolver, ResolveReport};
pub use publisher::{Authenticator, Publisher};
pub use replace::{parse_document_url, DocumentRef, ReplaceOrchestrator, ReplaceOutcome};
