//! Chunk transport strategies.
//!
//! Both strategies implement [`UploadBackend`]: they move individual chunks
//! and, once every chunk has landed, finalize the transfer into an
//! [`ImportHandle`]. The strategy is picked once per upload from
//! [`BackendKind`].

pub mod direct;
pub mod staged;

use std::sync::Arc;

use async_trait::async_trait;
use dam_upload_models::{Chunk, ImportHandle, TransferSummary};
use serde::Deserialize;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::UploadError;
use crate::api::AssetService;
use crate::storage::StagingStore;

pub use direct::DirectBackend;
pub use staged::StagedBackend;

/// Which transport strategy an upload uses.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BackendKind {
    /// Chunks go straight to the asset service.
    Direct,
    /// Chunks go to object storage and are registered with the asset
    /// service.
    #[default]
    Staged,
}

impl BackendKind {
    /// Index of the first chunk. Storage policies number parts from 1.
    #[must_use]
    pub const fn first_chunk_index(self) -> u32 {
        match self {
            Self::Direct => 0,
            Self::Staged => 1,
        }
    }
}

/// Acknowledgement that one chunk was fully transported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkAck {
    pub index: u32,
    pub bytes: usize,
}

/// Moves chunks to the service and finalizes the transfer.
///
/// `transport_chunk` may be called concurrently for different chunks.
/// `finalize` is called exactly once, after every `transport_chunk` call
/// has returned successfully.
#[async_trait]
pub trait UploadBackend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Transports one chunk. The chunk is consumed.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError`] if any request for this chunk fails.
    async fn transport_chunk(&self, chunk: Chunk) -> Result<ChunkAck, UploadError>;

    /// Finalizes the transfer.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError`] if the finalize request fails or its
    /// response carries no import id.
    async fn finalize(&self, summary: &TransferSummary) -> Result<ImportHandle, UploadError>;
}

/// Builds the backend for `kind`, running any per-upload setup.
///
/// # Errors
///
/// Returns [`UploadError`] if staged setup (endpoint or ticket) fails.
pub async fn open_backend(
    kind: BackendKind,
    service: Arc<dyn AssetService>,
    store: Arc<dyn StagingStore>,
    filename: &str,
    chunk_count: u32,
) -> Result<Box<dyn UploadBackend>, UploadError> {
    log::info!("Using {kind} backend for {filename} ({chunk_count} chunks)");
    Ok(match kind {
        BackendKind::Direct => Box::new(DirectBackend::new(service)),
        BackendKind::Staged => {
            Box::new(StagedBackend::begin(service, store, filename, chunk_count).await?)
        }
    })
}
