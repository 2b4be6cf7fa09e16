//! Direct chunk upload to the asset service.
//!
//! Each chunk is posted with its SHA-256 under a per-upload UUID. The
//! finalize response echoes the import id in the `X-API-Correlation-ID`
//! header.

use std::sync::Arc;

use async_trait::async_trait;
use dam_upload_models::params::FinaliseUploadParams;
use dam_upload_models::{Chunk, ImportHandle, TransferSummary};
use uuid::Uuid;

use super::{BackendKind, ChunkAck, UploadBackend};
use crate::api::{AssetService, CORRELATION_ID_HEADER};
use crate::hash::sha256_hex;
use crate::{Stage, UploadError};

pub struct DirectBackend {
    service: Arc<dyn AssetService>,
    upload_id: String,
}

impl DirectBackend {
    /// Creates a backend with a fresh upload id.
    #[must_use]
    pub fn new(service: Arc<dyn AssetService>) -> Self {
        Self {
            service,
            upload_id: Uuid::new_v4().to_string(),
        }
    }

    #[must_use]
    pub fn upload_id(&self) -> &str {
        &self.upload_id
    }
}

#[async_trait]
impl UploadBackend for DirectBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Direct
    }

    async fn transport_chunk(&self, chunk: Chunk) -> Result<ChunkAck, UploadError> {
        let sha256 = sha256_hex(&chunk.bytes);
        let ack = ChunkAck {
            index: chunk.index,
            bytes: chunk.len(),
        };
        self.service
            .upload_chunk(&self.upload_id, chunk, &sha256)
            .await?;
        log::debug!("Uploaded chunk {} ({} bytes)", ack.index, ack.bytes);
        Ok(ack)
    }

    async fn finalize(&self, summary: &TransferSummary) -> Result<ImportHandle, UploadError> {
        let params = FinaliseUploadParams {
            chunks_count: summary.chunk_count,
            file_name: summary.filename.clone(),
            file_size: summary.file_size,
            sha256: summary.sha256.clone(),
            intent: summary.intent,
        };
        let correlation_id = self
            .service
            .finalise_upload(&self.upload_id, &params)
            .await?
            .ok_or_else(|| {
                UploadError::protocol(
                    Stage::FinaliseUpload,
                    format!("missing {CORRELATION_ID_HEADER} header"),
                )
            })?;

        let handle = ImportHandle::from_comma_joined(&correlation_id).ok_or_else(|| {
            UploadError::protocol(
                Stage::FinaliseUpload,
                format!("empty {CORRELATION_ID_HEADER} header"),
            )
        })?;
        log::info!(
            "Finalized direct upload {} as import {handle}",
            self.upload_id
        );
        Ok(handle)
    }
}
