//! Object-storage endpoint used by the staged backend.

use async_trait::async_trait;
use dam_upload_models::{Chunk, MultipartPolicy};
use reqwest::multipart;

use crate::UploadError;

/// Everything needed to post one part to the storage endpoint.
#[derive(Debug)]
pub struct StagedPart<'a> {
    /// Storage endpoint URL.
    pub endpoint: &'a str,
    /// Payload, moved into the form's file field.
    pub chunk: Chunk,
    /// Total chunks in this upload.
    pub chunk_count: u32,
    /// Filename of the file being uploaded.
    pub filename: &'a str,
    pub policy: &'a MultipartPolicy,
}

/// Accepts signed part uploads.
#[async_trait]
pub trait StagingStore: Send + Sync {
    /// Posts one part.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Staging`] on a non-2xx response and
    /// [`UploadError::Http`] if the request could not be sent.
    async fn put_part(&self, part: StagedPart<'_>) -> Result<(), UploadError>;
}

/// [`StagingStore`] that posts `multipart/form-data` with the signed
/// policy fields.
pub struct HttpStagingStore {
    client: reqwest::Client,
}

impl HttpStagingStore {
    #[must_use]
    pub const fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

/// Builds the form for one part. The file field goes last since the
/// storage endpoint ignores fields after it.
fn part_form(part: StagedPart<'_>) -> multipart::Form {
    let key = part.policy.object_key(part.chunk.index);
    multipart::Form::new()
        .text("chunk", part.chunk.index.to_string())
        .text("chunks", part.chunk_count.to_string())
        .text("Filename", key.clone())
        .text("key", key)
        .text("name", part.filename.to_string())
        .text("acl", part.policy.acl.clone())
        .text("Content-Type", part.policy.content_type.clone())
        .text("Policy", part.policy.policy.clone())
        .text(
            "success_action_status",
            part.policy.success_action_status.clone(),
        )
        .text("x-amz-algorithm", part.policy.algorithm.clone())
        .text("x-amz-credential", part.policy.credential.clone())
        .text("x-amz-date", part.policy.date.clone())
        .text("X-Amz-Signature", part.policy.signature.clone())
        .part(
            "file",
            multipart::Part::bytes(part.chunk.bytes).file_name(part.filename.to_string()),
        )
}

#[async_trait]
impl StagingStore for HttpStagingStore {
    async fn put_part(&self, part: StagedPart<'_>) -> Result<(), UploadError> {
        let index = part.chunk.index;
        let response = self
            .client
            .post(part.endpoint)
            .multipart(part_form(part))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        log::warn!("Storage endpoint rejected chunk {index} with HTTP {status}: {body}");
        Err(UploadError::Staging {
            index,
            status: status.as_u16(),
            body,
        })
    }
}
