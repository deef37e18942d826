//! Centralized default constants for docbridge.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers. Organized by domain area.

use std::time::Duration;

// =============================================================================
// REMOTE PLATFORM
// =============================================================================

/// Default open-platform REST base URL.
pub const BASE_URL: &str = "https://open.feishu.cn/open-apis";

/// Default OAuth authorize endpoint (opened in the user's browser).
pub const AUTH_URL: &str = "https://accounts.feishu.cn/open-apis/authen/v1/authorize";

/// Default OAuth redirect URI registered for the app.
pub const REDIRECT_URI: &str = "http://localhost:8080/callback";

/// OAuth scopes requested during re-authorization.
pub const OAUTH_SCOPE: &str = "docx:document drive:drive wiki:wiki:readonly offline_access";

/// Public URL prefix for converted documents.
pub const DOC_BASE_URL: &str = "https://feishu.cn/docx";

/// Public URL prefix for raw drive files.
pub const FILE_BASE_URL: &str = "https://feishu.cn/file";

/// HTTP request timeout in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Business codes the platform uses for an expired or invalid access token.
pub const TOKEN_EXPIRED_CODES: &[i64] = &[99991661, 99991663, 99991664, 99991665, 99991668, 99991677];

/// Business code for "too many requests".
pub const RATE_LIMIT_CODE: i64 = 99991400;

/// Business codes meaning the drive object is already gone.
pub const FILE_GONE_CODES: &[i64] = &[1061007, 1061003];

// =============================================================================
// TOKEN LIFECYCLE
// =============================================================================

/// Maximum wait for the out-of-band "authorization completed" signal.
pub const REAUTH_TIMEOUT: Duration = Duration::from_secs(300);

/// Delay after the authorization signal so token storage can land.
pub const REAUTH_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Capacity of the authorization signal broadcast channel.
pub const AUTH_SIGNAL_CAPACITY: usize = 8;

/// How often the CLI checks the credential file for a fresh token pair.
pub const CREDENTIAL_POLL_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// RATE LIMITING
// =============================================================================

/// Document metadata endpoints: calls per second.
pub const DOCUMENT_RATE_PER_SEC: u32 = 5;

/// Document metadata endpoints: calls per minute.
pub const DOCUMENT_RATE_PER_MIN: u32 = 300;

/// Import job endpoints: calls per second.
pub const IMPORT_RATE_PER_SEC: u32 = 3;

/// Import job endpoints: calls per minute.
pub const IMPORT_RATE_PER_MIN: u32 = 100;

/// Block mutation endpoints: calls per second.
pub const BLOCK_RATE_PER_SEC: u32 = 3;

/// Block mutation endpoints: calls per minute.
pub const BLOCK_RATE_PER_MIN: u32 = 150;

/// Drive endpoints (uploads, permissions, deletes): calls per second.
pub const DRIVE_RATE_PER_SEC: u32 = 5;

/// Drive endpoints: calls per minute.
pub const DRIVE_RATE_PER_MIN: u32 = 200;

// =============================================================================
// RETRY
// =============================================================================

/// Maximum attempts for a rate-limited call (including the first).
pub const RETRY_MAX_ATTEMPTS: u32 = 4;

/// First backoff delay; doubled per attempt.
pub const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Upper bound for a single backoff delay.
pub const RETRY_MAX_DELAY: Duration = Duration::from_secs(8);

// =============================================================================
// IMPORT JOB
// =============================================================================

/// Total time allowed for an import job to finish.
pub const IMPORT_TIMEOUT_MS: u64 = 60_000;

/// Maximum number of status polls.
pub const IMPORT_MAX_ATTEMPTS: u32 = 25;

/// Attempts during which a failure-looking status without a document is
/// still treated as transient.
pub const IMPORT_TRANSIENT_FAILURE_ATTEMPTS: u32 = 8;

/// `job_status` values meaning the import finished.
pub const IMPORT_SUCCESS_STATUSES: &[i64] = &[0, 3];

/// `job_status` values meaning the import is still running.
pub const IMPORT_PENDING_STATUSES: &[i64] = &[1, 2];

/// Poll delay for a given 1-based attempt number.
pub fn import_poll_delay(attempt: u32) -> Duration {
    match attempt {
        0..=3 => Duration::from_secs(1),
        4..=8 => Duration::from_secs(2),
        _ => Duration::from_secs(3),
    }
}

// =============================================================================
// BLOCKS
// =============================================================================

/// Page size for block listing.
pub const BLOCK_PAGE_SIZE: u32 = 500;

/// Maximum blocks in a single descendant-creation call.
pub const BLOCK_BATCH_LIMIT: usize = 1000;

/// Delay between sequential descendant chunks.
pub const BLOCK_CHUNK_DELAY: Duration = Duration::from_millis(300);

/// Maximum children removed per batch-delete call.
pub const BLOCK_DELETE_BATCH: usize = 50;

/// Maximum requests in one `batch_update` call.
pub const BLOCK_UPDATE_BATCH: usize = 200;

// =============================================================================
// PLACEHOLDERS
// =============================================================================

/// Prefix shared by every placeholder core, used for cheap pre-filtering.
pub const PLACEHOLDER_MARKER: &str = "OB_";

/// Escaped marker as it appears after the remote Markdown import.
pub const PLACEHOLDER_MARKER_ESCAPED: &str = "OB\\_";

/// Concurrent attachment reads.
pub const ATTACHMENT_READ_CONCURRENCY: usize = 4;

/// Maximum nesting of sub-document uploads.
pub const SUBDOCUMENT_MAX_DEPTH: usize = 3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn import_poll_delay_is_progressive() {
        assert_eq!(import_poll_delay(1), Duration::from_secs(1));
        assert_eq!(import_poll_delay(3), Duration::from_secs(1));
        assert_eq!(import_poll_delay(4), Duration::from_secs(2));
        assert_eq!(import_poll_delay(8), Duration::from_secs(2));
        assert_eq!(import_poll_delay(9), Duration::from_secs(3));
        assert_eq!(import_poll_delay(25), Duration::from_secs(3));
    }

    #[test]
    fn status_sets_are_disjoint() {
        for code in IMPORT_SUCCESS_STATUSES {
            assert!(!IMPORT_PENDING_STATUSES.contains(code));
        }
    }

    #[test]
    fn batch_limits_are_sane() {
        assert!(BLOCK_DELETE_BATCH <= BLOCK_BATCH_LIMIT);
        assert!(IMPORT_TRANSIENT_FAILURE_ATTEMPTS < IMPORT_MAX_ATTEMPTS);
        assert!(RETRY_BASE_DELAY < RETRY_MAX_DELAY);
    }
}
