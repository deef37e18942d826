//! Typed document-platform operations.
//!
//! [`DocumentApi`] is the seam between the sync engine and the network:
//! [`HttpDocumentApi`] implements it against the REST API, tests use an
//! in-memory double.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, info, warn};

use docbridge_core::{defaults, Error, LinkSharePolicy, RemoteBlock, Result};

use crate::auth::TokenManager;
use crate::http::RestClient;
use crate::rate_limit::EndpointClass;
use crate::retry::RetryPolicy;
use crate::types::*;

/// Operations the sync engine needs from the remote platform.
#[async_trait]
pub trait DocumentApi: Send + Sync {
    /// Upload a raw source file for import. Returns the drive file token.
    async fn upload_source(&self, file_name: &str, bytes: Vec<u8>, extension: &str)
        -> Result<String>;

    /// Start an import job converting an uploaded file into a document.
    async fn create_import_task(
        &self,
        file_token: &str,
        file_name: &str,
        extension: &str,
        folder_token: &str,
    ) -> Result<String>;

    /// Current state of an import job.
    async fn get_import_task(&self, ticket: &str) -> Result<ImportTaskResult>;

    /// One page of a document's blocks.
    async fn list_blocks(&self, document_id: &str, page_token: Option<&str>) -> Result<BlockPage>;

    /// Insert children under `parent_id` at `index` (append when `None`).
    async fn create_children(
        &self,
        document_id: &str,
        parent_id: &str,
        index: Option<usize>,
        children: Vec<NewBlock>,
    ) -> Result<Vec<RemoteBlock>>;

    /// Insert a nested subtree in one call.
    async fn create_descendants(
        &self,
        document_id: &str,
        parent_id: &str,
        request: CreateDescendantRequest,
    ) -> Result<CreatedDescendants>;

    /// Delete children `[start, end)` of `parent_id`.
    async fn delete_children(
        &self,
        document_id: &str,
        parent_id: &str,
        start: usize,
        end: usize,
    ) -> Result<()>;

    async fn update_block(&self, document_id: &str, block_id: &str, update: BlockUpdate)
        -> Result<()>;

    async fn batch_update_blocks(
        &self,
        document_id: &str,
        requests: Vec<BlockUpdateRequest>,
    ) -> Result<()>;

    /// Upload media bound to an image or file block. Returns the media token.
    async fn upload_block_media(
        &self,
        document_id: &str,
        block_id: &str,
        kind: MediaKind,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String>;

    async fn set_public_permission(&self, document_id: &str, policy: LinkSharePolicy)
        -> Result<()>;

    async fn delete_file(&self, token: &str, kind: DriveFileKind) -> Result<()>;

    /// Resolve a wiki node token to the underlying document token.
    async fn resolve_wiki_node(&self, token: &str) -> Result<String>;
}

/// [`DocumentApi`] over HTTP.
pub struct HttpDocumentApi {
    rest: Arc<RestClient>,
    tokens: TokenManager,
    retry: RetryPolicy,
}

impl HttpDocumentApi {
    pub fn new(rest: Arc<RestClient>, tokens: TokenManager) -> Self {
        Self {
            rest,
            tokens,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    /// Authenticated, throttled, retried call.
    ///
    /// `build` is invoked once per attempt because multipart bodies cannot be
    /// cloned. A rejected token triggers one refresh and a single replay.
    async fn call<T, B>(&self, label: &str, class: EndpointClass, build: B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Fn(&RestClient, &str) -> Result<reqwest::RequestBuilder> + Send + Sync,
    {
        let attempt = |token: String| {
            let build = &build;
            async move {
                self.retry
                    .run(label, || async {
                        let req = build(&self.rest, &token)?;
                        self.rest.execute::<T>(class, req).await
                    })
                    .await
            }
        };

        let token = self.tokens.access_token().await?;
        match attempt(token.clone()).await {
            Err(e) if e.is_auth() => {
                info!(op = label, "Token rejected mid-operation, refreshing");
                if self.tokens.refresh_stale(&token).await {
                    let token = self.tokens.access_token().await?;
                    attempt(token).await
                } else {
                    Err(e)
                }
            }
            other => other,
        }
    }
}

#[async_trait]
impl DocumentApi for HttpDocumentApi {
    async fn upload_source(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        extension: &str,
    ) -> Result<String> {
        debug!(file_name, size = bytes.len(), "Uploading source file");
        let extra = json!({ "obj_type": "docx", "file_extension": extension }).to_string();
        let data: UploadData = self
            .call("upload_source", EndpointClass::Drive, |rest, token| {
                let part = Part::bytes(bytes.clone())
                    .file_name(file_name.to_string())
                    .mime_str("application/octet-stream")
                    .map_err(|e| Error::Internal(format!("Failed to create multipart: {}", e)))?;
                let form = Form::new()
                    .text("file_name", file_name.to_string())
                    .text("parent_type", "ccm_import_open")
                    .text("size", bytes.len().to_string())
                    .text("extra", extra.clone())
                    .part("file", part);
                Ok(rest
                    .request(Method::POST, "/drive/v1/medias/upload_all", Some(token))
                    .multipart(form))
            })
            .await?;
        Ok(data.file_token)
    }

    async fn create_import_task(
        &self,
        file_token: &str,
        file_name: &str,
        extension: &str,
        folder_token: &str,
    ) -> Result<String> {
        let body = ImportTaskRequest {
            file_extension: extension.to_string(),
            file_token: file_token.to_string(),
            doc_type: "docx".to_string(),
            file_name: file_name.to_string(),
            point: ImportPoint {
                mount_type: 1,
                mount_key: folder_token.to_string(),
            },
        };
        let data: ImportTaskCreated = self
            .call("create_import_task", EndpointClass::ImportJob, |rest, token| {
                Ok(rest
                    .request(Method::POST, "/drive/v1/import_tasks", Some(token))
                    .json(&body))
            })
            .await?;
        info!(ticket = %data.ticket, "Import task created");
        Ok(data.ticket)
    }

    async fn get_import_task(&self, ticket: &str) -> Result<ImportTaskResult> {
        let path = format!("/drive/v1/import_tasks/{}", ticket);
        let data: ImportTaskData = self
            .call("get_import_task", EndpointClass::ImportJob, |rest, token| {
                Ok(rest.request(Method::GET, &path, Some(token)))
            })
            .await?;
        Ok(data.result)
    }

    async fn list_blocks(&self, document_id: &str, page_token: Option<&str>) -> Result<BlockPage> {
        let path = format!("/docx/v1/documents/{}/blocks", document_id);
        let page_size = defaults::BLOCK_PAGE_SIZE.to_string();
        self.call("list_blocks", EndpointClass::DocumentMetadata, |rest, token| {
            let mut query = vec![("page_size", page_size.as_str()), ("document_revision_id", "-1")];
            if let Some(pt) = page_token {
                query.push(("page_token", pt));
            }
            Ok(rest.request(Method::GET, &path, Some(token)).query(&query))
        })
        .await
    }

    async fn create_children(
        &self,
        document_id: &str,
        parent_id: &str,
        index: Option<usize>,
        children: Vec<NewBlock>,
    ) -> Result<Vec<RemoteBlock>> {
        let path = format!(
            "/docx/v1/documents/{}/blocks/{}/children",
            document_id, parent_id
        );
        let body = CreateChildrenRequest {
            children,
            index: index.map(|i| i as i64),
        };
        let data: CreatedChildren = self
            .call("create_children", EndpointClass::BlockMutation, |rest, token| {
                Ok(rest
                    .request(Method::POST, &path, Some(token))
                    .query(&[("document_revision_id", "-1")])
                    .json(&body))
            })
            .await?;
        Ok(data.children)
    }

    async fn create_descendants(
        &self,
        document_id: &str,
        parent_id: &str,
        request: CreateDescendantRequest,
    ) -> Result<CreatedDescendants> {
        let path = format!(
            "/docx/v1/documents/{}/blocks/{}/descendant",
            document_id, parent_id
        );
        self.call("create_descendants", EndpointClass::BlockMutation, |rest, token| {
            Ok(rest
                .request(Method::POST, &path, Some(token))
                .query(&[("document_revision_id", "-1")])
                .json(&request))
        })
        .await
    }

    async fn delete_children(
        &self,
        document_id: &str,
        parent_id: &str,
        start: usize,
        end: usize,
    ) -> Result<()> {
        let path = format!(
            "/docx/v1/documents/{}/blocks/{}/children/batch_delete",
            document_id, parent_id
        );
        let body = BatchDeleteRequest {
            start_index: start,
            end_index: end,
        };
        let _: Empty = self
            .call("delete_children", EndpointClass::BlockMutation, |rest, token| {
                Ok(rest
                    .request(Method::DELETE, &path, Some(token))
                    .query(&[("document_revision_id", "-1")])
                    .json(&body))
            })
            .await?;
        Ok(())
    }

    async fn update_block(
        &self,
        document_id: &str,
        block_id: &str,
        update: BlockUpdate,
    ) -> Result<()> {
        let path = format!("/docx/v1/documents/{}/blocks/{}", document_id, block_id);
        let _: Empty = self
            .call("update_block", EndpointClass::BlockMutation, |rest, token| {
                Ok(rest
                    .request(Method::PATCH, &path, Some(token))
                    .query(&[("document_revision_id", "-1")])
                    .json(&update))
            })
            .await?;
        Ok(())
    }

    async fn batch_update_blocks(
        &self,
        document_id: &str,
        requests: Vec<BlockUpdateRequest>,
    ) -> Result<()> {
        let path = format!("/docx/v1/documents/{}/blocks/batch_update", document_id);
        let body = BatchUpdateRequest { requests };
        let _: Empty = self
            .call("batch_update_blocks", EndpointClass::BlockMutation, |rest, token| {
                Ok(rest
                    .request(Method::PATCH, &path, Some(token))
                    .query(&[("document_revision_id", "-1")])
                    .json(&body))
            })
            .await?;
        Ok(())
    }

    async fn upload_block_media(
        &self,
        document_id: &str,
        block_id: &str,
        kind: MediaKind,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<String> {
        debug!(block_id, file_name, size = bytes.len(), "Uploading block media");
        let extra = json!({ "drive_route_token": document_id }).to_string();
        let data: UploadData = self
            .call("upload_block_media", EndpointClass::Drive, |rest, token| {
                let part = Part::bytes(bytes.clone())
                    .file_name(file_name.to_string())
                    .mime_str("application/octet-stream")
                    .map_err(|e| Error::Internal(format!("Failed to create multipart: {}", e)))?;
                let form = Form::new()
                    .text("file_name", file_name.to_string())
                    .text("parent_type", kind.parent_type())
                    .text("parent_node", block_id.to_string())
                    .text("size", bytes.len().to_string())
                    .text("extra", extra.clone())
                    .part("file", part);
                Ok(rest
                    .request(Method::POST, "/drive/v1/medias/upload_all", Some(token))
                    .multipart(form))
            })
            .await?;
        Ok(data.file_token)
    }

    async fn set_public_permission(
        &self,
        document_id: &str,
        policy: LinkSharePolicy,
    ) -> Result<()> {
        let path = format!("/drive/v1/permissions/{}/public", document_id);
        let body = PublicPermissionRequest {
            link_share_entity: policy.as_str().to_string(),
        };
        let _: Empty = self
            .call("set_public_permission", EndpointClass::Drive, |rest, token| {
                Ok(rest
                    .request(Method::PATCH, &path, Some(token))
                    .query(&[("type", "docx")])
                    .json(&body))
            })
            .await?;
        Ok(())
    }

    async fn delete_file(&self, token: &str, kind: DriveFileKind) -> Result<()> {
        let path = format!("/drive/v1/files/{}", token);
        let result: Result<Empty> = self
            .call("delete_file", EndpointClass::Drive, |rest, bearer| {
                Ok(rest
                    .request(Method::DELETE, &path, Some(bearer))
                    .query(&[("type", kind.as_str())]))
            })
            .await;
        match result {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(file_token = token, "File already gone");
                Ok(())
            }
            Err(e) => {
                warn!(file_token = token, error = %e, "Failed to delete file");
                Err(e)
            }
        }
    }

    async fn resolve_wiki_node(&self, token: &str) -> Result<String> {
        let data: WikiNodeData = self
            .call("resolve_wiki_node", EndpointClass::DocumentMetadata, |rest, bearer| {
                Ok(rest
                    .request(Method::GET, "/wiki/v2/spaces/get_node", Some(bearer))
                    .query(&[("token", token)]))
            })
            .await?;
        if data.node.obj_type != "docx" && !data.node.obj_type.is_empty() {
            return Err(Error::InvalidInput(format!(
                "wiki node is a {}, not a docx document",
                data.node.obj_type
            )));
        }
        Ok(data.node.obj_token)
    }
}
