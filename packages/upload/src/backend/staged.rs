//! Staged upload through object storage.
//!
//! Setup runs once per file: resolve the closest storage endpoint, then
//! request a [`StagingTicket`]. Each chunk is posted to storage with the
//! ticket's signed policy and then registered with the asset service.
//! Registration of a chunk never starts before its staging succeeded.

use std::sync::Arc;

use async_trait::async_trait;
use dam_upload_models::params::{
    FinaliseStagedUploadQuery, RegisterChunkQuery, RequestUploadQuery,
};
use dam_upload_models::{Chunk, ImportHandle, StagingTicket, TransferSummary};

use super::{BackendKind, ChunkAck, UploadBackend};
use crate::api::AssetService;
use crate::storage::{StagedPart, StagingStore};
use crate::{Stage, UploadError};

pub struct StagedBackend {
    service: Arc<dyn AssetService>,
    store: Arc<dyn StagingStore>,
    endpoint: String,
    ticket: StagingTicket,
    filename: String,
    chunk_count: u32,
}

impl StagedBackend {
    /// Resolves the storage endpoint and requests a ticket for `filename`.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError`] if either setup request fails.
    pub async fn begin(
        service: Arc<dyn AssetService>,
        store: Arc<dyn StagingStore>,
        filename: &str,
        chunk_count: u32,
    ) -> Result<Self, UploadError> {
        let endpoint = service.closest_storage_endpoint().await?;
        log::info!("Staging to {endpoint}");

        let ticket = service
            .request_staging_ticket(&RequestUploadQuery {
                filename: filename.to_string(),
            })
            .await?;
        log::debug!(
            "Got staging ticket {} (target {})",
            ticket.file.upload_id,
            ticket.file.target_id
        );

        Ok(Self {
            service,
            store,
            endpoint,
            ticket,
            filename: filename.to_string(),
            chunk_count,
        })
    }

    #[must_use]
    pub const fn ticket(&self) -> &StagingTicket {
        &self.ticket
    }
}

#[async_trait]
impl UploadBackend for StagedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Staged
    }

    async fn transport_chunk(&self, chunk: Chunk) -> Result<ChunkAck, UploadError> {
        let index = chunk.index;
        let bytes = chunk.len();

        self.store
            .put_part(StagedPart {
                endpoint: &self.endpoint,
                chunk,
                chunk_count: self.chunk_count,
                filename: &self.filename,
                policy: &self.ticket.policy,
            })
            .await?;

        self.service
            .register_chunk(&RegisterChunkQuery::for_part(&self.ticket, index))
            .await?;
        log::debug!("Staged and registered chunk {index} ({bytes} bytes)");

        Ok(ChunkAck { index, bytes })
    }

    async fn finalize(&self, summary: &TransferSummary) -> Result<ImportHandle, UploadError> {
        let raw = self
            .service
            .finalise_staged_upload(&FinaliseStagedUploadQuery::for_ticket(
                &self.ticket,
                summary.chunk_count,
            ))
            .await?;

        let handle = ImportHandle::from_comma_joined(&raw)
            .ok_or_else(|| UploadError::protocol(Stage::FinaliseStaged, "empty import id"))?;
        log::info!(
            "Finalized staged upload {} as import {handle}",
            self.ticket.file.upload_id
        );
        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use dam_upload_models::UploadIntent;

    use super::*;
    use crate::fakes::{Call, CallLog, FakeAssetService, FakeStagingStore};

    async fn backend(log: &CallLog, store: FakeStagingStore) -> StagedBackend {
        StagedBackend::begin(
            Arc::new(FakeAssetService::new(log.clone())),
            Arc::new(store),
            "file.bin",
            3,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn setup_resolves_endpoint_then_requests_ticket() {
        let log = CallLog::default();
        let _backend = backend(&log, FakeStagingStore::new(log.clone())).await;
        assert_eq!(
            log.calls(),
            vec![
                Call::ResolveEndpoint,
                Call::RequestTicket("file.bin".to_string())
            ]
        );
    }

    #[tokio::test]
    async fn chunk_is_staged_before_it_is_registered() {
        let log = CallLog::default();
        let backend = backend(&log, FakeStagingStore::new(log.clone())).await;

        backend
            .transport_chunk(Chunk {
                index: 2,
                bytes: vec![1, 2, 3],
            })
            .await
            .unwrap();

        let calls = log.calls();
        assert_eq!(
            calls[2],
            Call::StagePart {
                index: 2,
                key: "bucket/staged/file.bin/p2".to_string(),
                chunks: 3,
            }
        );
        let Call::RegisterChunk(query) = &calls[3] else {
            panic!("expected registration after staging, got {calls:?}");
        };
        assert_eq!(query.chunk_number, 2);
        assert_eq!(query.upload_id, "up-1");
        assert_eq!(query.target_id, "tg-1");
        assert_eq!(query.part_key, "staged/file.bin/p2");
    }

    #[tokio::test]
    async fn rejected_part_is_never_registered() {
        let log = CallLog::default();
        let mut store = FakeStagingStore::new(log.clone());
        store.reject_index = Some(1);
        let backend = backend(&log, store).await;

        let err = backend
            .transport_chunk(Chunk {
                index: 1,
                bytes: vec![0],
            })
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::Staging { index: 1, status: 403, .. }));
        assert_eq!(log.count(|c| matches!(c, Call::RegisterChunk(_))), 0);
    }

    #[tokio::test]
    async fn finalize_splits_comma_joined_import_ids() {
        let log = CallLog::default();
        let mut service = FakeAssetService::new(log.clone());
        service.import_ids = "abc,def".to_string();
        let backend = StagedBackend::begin(
            Arc::new(service),
            Arc::new(FakeStagingStore::new(log.clone())),
            "file.bin",
            3,
        )
        .await
        .unwrap();

        let handle = backend
            .finalize(&TransferSummary {
                chunk_count: 3,
                filename: "file.bin".to_string(),
                file_size: 10,
                sha256: String::new(),
                intent: UploadIntent::CreateAsset,
            })
            .await
            .unwrap();

        assert_eq!(handle.ids(), ["abc", "def"]);
        assert_eq!(
            log.calls().last(),
            Some(&Call::FinaliseStaged(FinaliseStagedUploadQuery {
                upload_id: "up-1".to_string(),
                target_id: "tg-1".to_string(),
                key_prefix: "staged/file.bin".to_string(),
                chunks: 3,
            }))
        );
    }
}
