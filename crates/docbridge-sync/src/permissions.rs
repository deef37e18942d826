//! Best-effort sharing and cleanup helpers.
//!
//! Both helpers log and swallow failures: a document that was published but
//! could not be shared, or a temporary file that could not be removed, is not
//! a failed publish.

use docbridge_core::LinkSharePolicy;
use docbridge_remote::{DocumentApi, DriveFileKind};
use tracing::{debug, warn};

/// Apply the link-sharing policy to a document. Returns whether it stuck.
pub async fn set_link_sharing(
    api: &dyn DocumentApi,
    document_id: &str,
    policy: LinkSharePolicy,
) -> bool {
    match api.set_public_permission(document_id, policy).await {
        Ok(()) => {
            debug!(document_id, policy = policy.as_str(), "Link sharing applied");
            true
        }
        Err(e) => {
            warn!(document_id, policy = policy.as_str(), error = %e, "Failed to apply link sharing");
            false
        }
    }
}

/// Delete a drive object. Already-gone objects count as deleted.
pub async fn discard_file(api: &dyn DocumentApi, token: &str, kind: DriveFileKind) -> bool {
    match api.delete_file(token, kind).await {
        Ok(()) => {
            debug!(file_token = token, kind = kind.as_str(), "Drive object deleted");
            true
        }
        Err(e) => {
            warn!(file_token = token, kind = kind.as_str(), error = %e, "Failed to delete drive object");
            false
        }
    }
}
