//! End-to-end upload pipeline.
//!
//! One upload runs these stages in order:
//!
//! 1. open the file as a [`ChunkSource`]
//! 2. set up the configured [`UploadBackend`]
//! 3. transport chunks, up to `max_concurrent_chunks` at once, hashing the
//!    bytes as they are read
//! 4. finalize into an [`ImportHandle`] once every chunk is acknowledged
//! 5. poll for conversion, if enabled for the backend
//! 6. attach the import to an asset
//!
//! The first error aborts the pipeline; in-flight chunk requests are
//! dropped. A [`CancellationToken`] is checked at every suspension point.

use std::future::Future;
use std::pin::pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dam_upload_models::{
    AssetReference, ChunkProgress, ImportHandle, TransferSummary, UploadEvent, UploadRequestSpec,
};
use futures::{Stream, StreamExt as _, TryStreamExt as _};
use tokio_util::sync::CancellationToken;

use crate::UploadError;
use crate::api::{AssetService, HttpAssetService};
use crate::attach::AssetAttacher;
use crate::backend::{UploadBackend, open_backend};
use crate::chunk::ChunkSource;
use crate::config::{DamConfig, UploadConfig};
use crate::credentials::{
    CredentialProvider, OAuthRefresher, PermanentToken, RefreshingCredentials, Token,
};
use crate::poller::ConversionPoller;
use crate::progress::{ProgressCallback, null_progress};
use crate::storage::{HttpStagingStore, StagingStore};

/// Runs `fut` unless `cancel` fires first.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T, UploadError>>,
) -> Result<T, UploadError> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(UploadError::Cancelled),
        result = fut => result,
    }
}

/// State between setup and chunk transport.
struct PreparedUpload {
    backend: Box<dyn UploadBackend>,
    source: ChunkSource,
}

/// Composes chunking, transport, polling and attach.
pub struct UploadOrchestrator {
    service: Arc<dyn AssetService>,
    store: Arc<dyn StagingStore>,
    config: UploadConfig,
    cancel: CancellationToken,
}

impl UploadOrchestrator {
    #[must_use]
    pub fn new(
        service: Arc<dyn AssetService>,
        store: Arc<dyn StagingStore>,
        config: UploadConfig,
    ) -> Self {
        Self {
            service,
            store,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Builds an orchestrator talking HTTP to the configured service.
    ///
    /// # Errors
    ///
    /// * [`UploadError::Config`] if the configuration is out of range
    /// * [`UploadError::Http`] if the HTTP client cannot be built
    /// * [`UploadError::Credentials`] if no credentials are configured
    pub fn from_config(config: &DamConfig) -> Result<Self, UploadError> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .timeout(config.client.request_timeout())
            .build()?;
        let base_url = config.client.base_url.as_str();

        let credentials: Arc<dyn CredentialProvider> =
            match (&config.client.permanent_token, &config.client.oauth) {
                (Some(token), _) => Arc::new(PermanentToken::new(token.clone())),
                (None, Some(oauth)) => {
                    let refresher = OAuthRefresher::new(
                        client.clone(),
                        base_url,
                        oauth.client_id.clone(),
                        oauth.client_secret.clone(),
                    );
                    let token = Token {
                        access_token: oauth.access_token.clone().unwrap_or_default(),
                        refresh_token: oauth.refresh_token.clone(),
                        expires_at: oauth.expires_at.unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
                    };
                    Arc::new(RefreshingCredentials::new(refresher, token))
                }
                (None, None) => {
                    return Err(UploadError::Credentials {
                        message: "no permanent token or OAuth credentials configured".to_string(),
                    });
                }
            };

        Ok(Self::new(
            Arc::new(HttpAssetService::new(client.clone(), base_url, credentials)),
            Arc::new(HttpStagingStore::new(client)),
            config.upload.clone(),
        ))
    }

    /// Replaces the cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that cancels every upload run by this orchestrator.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub const fn config(&self) -> &UploadConfig {
        &self.config
    }

    /// Uploads `spec` and attaches it.
    ///
    /// # Errors
    ///
    /// Returns the first [`UploadError`] from any stage.
    pub async fn upload(&self, spec: &UploadRequestSpec) -> Result<AssetReference, UploadError> {
        self.upload_reporting(spec, null_progress()).await
    }

    /// Like [`Self::upload`], reporting transported bytes to `progress`.
    ///
    /// # Errors
    ///
    /// Returns the first [`UploadError`] from any stage.
    pub async fn upload_reporting(
        &self,
        spec: &UploadRequestSpec,
        progress: Arc<dyn ProgressCallback>,
    ) -> Result<AssetReference, UploadError> {
        let PreparedUpload {
            backend,
            mut source,
        } = self.prepare(spec).await?;

        progress.set_total(source.file_size());
        progress.set_message(format!("Uploading {}", spec.filename()));

        let result = async {
            {
                let mut chunks = pin!(self.transport(backend.as_ref(), &mut source));
                while let Some(event) = cancellable(&self.cancel, chunks.try_next()).await? {
                    progress.chunk_done(&event);
                }
            }
            let summary = self.summarize(spec, &source)?;
            progress.set_message(format!("Finalizing {}", spec.filename()));
            self.complete(spec, backend.as_ref(), &summary).await
        }
        .await;

        match &result {
            Ok(reference) => progress.finish(format!(
                "Uploaded {} as asset {}",
                spec.filename(),
                reference.asset_id
            )),
            Err(_) => progress.finish_and_clear(),
        }
        result
    }

    /// Uploads `spec`, yielding an [`UploadEvent::Chunk`] as each chunk is
    /// acknowledged. After the last chunk the stream finalizes, polls and
    /// attaches, then ends with [`UploadEvent::Attached`]. A failure in any
    /// stage is yielded as the final item instead.
    pub fn upload_with_progress<'a>(
        &'a self,
        spec: &'a UploadRequestSpec,
    ) -> impl Stream<Item = Result<UploadEvent, UploadError>> + 'a {
        async_stream::try_stream! {
            let PreparedUpload { backend, mut source } = self.prepare(spec).await?;
            {
                let mut chunks = pin!(self.transport(backend.as_ref(), &mut source));
                while let Some(event) = cancellable(&self.cancel, chunks.try_next()).await? {
                    yield UploadEvent::Chunk(event);
                }
            }
            let summary = self.summarize(spec, &source)?;
            let reference = self.complete(spec, backend.as_ref(), &summary).await?;
            yield UploadEvent::Attached(reference);
        }
    }

    async fn prepare(&self, spec: &UploadRequestSpec) -> Result<PreparedUpload, UploadError> {
        let kind = self.config.backend;

        let source = cancellable(
            &self.cancel,
            ChunkSource::open(
                spec.file_path(),
                self.config.chunk_size_bytes,
                kind.first_chunk_index(),
            ),
        )
        .await?;

        let backend = cancellable(
            &self.cancel,
            open_backend(
                kind,
                Arc::clone(&self.service),
                Arc::clone(&self.store),
                spec.filename(),
                source.chunk_count(),
            ),
        )
        .await?;

        Ok(PreparedUpload { backend, source })
    }

    /// Describes a fully read `source` for finalize.
    fn summarize(
        &self,
        spec: &UploadRequestSpec,
        source: &ChunkSource,
    ) -> Result<TransferSummary, UploadError> {
        let sha256 = source.sha256().ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("{} was not read to the end", spec.filename()),
            )
        })?;
        Ok(TransferSummary {
            chunk_count: source.chunk_count(),
            filename: spec.filename().to_string(),
            file_size: source.file_size(),
            sha256,
            intent: self.config.intent,
        })
    }

    /// Reads chunks sequentially and transports them concurrently. Yields
    /// in completion order, which may differ from index order.
    fn transport<'a>(
        &self,
        backend: &'a dyn UploadBackend,
        source: &'a mut ChunkSource,
    ) -> impl Stream<Item = Result<ChunkProgress, UploadError>> + 'a {
        let total = source.chunk_count();
        source
            .chunks()
            .map_ok(move |chunk| backend.transport_chunk(chunk))
            .try_buffer_unordered(self.config.max_concurrent_chunks.max(1))
            .enumerate()
            .map(move |(done, ack)| {
                ack.map(|ack| ChunkProgress {
                    index: ack.index,
                    bytes: ack.bytes,
                    completed: u32::try_from(done + 1).unwrap_or(u32::MAX),
                    total,
                })
            })
    }

    /// Finalizes, optionally polls, and attaches.
    async fn complete(
        &self,
        spec: &UploadRequestSpec,
        backend: &dyn UploadBackend,
        summary: &TransferSummary,
    ) -> Result<AssetReference, UploadError> {
        let kind = backend.kind();
        let handle: ImportHandle = cancellable(&self.cancel, backend.finalize(summary)).await?;

        let handle = if self.config.polls(kind) {
            ConversionPoller::new(Arc::clone(&self.service), self.config.poll.into())
                .wait_until_converted(&handle, &self.cancel)
                .await?
        } else {
            log::info!(
                "Conversion polling disabled for {kind} uploads, saving import {handle} immediately"
            );
            handle
        };

        cancellable(
            &self.cancel,
            AssetAttacher::new(Arc::clone(&self.service)).attach(&handle, spec),
        )
        .await
    }
}
