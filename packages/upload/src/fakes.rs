//! In-memory [`AssetService`] and [`StagingStore`] that record every call
//! into a shared, ordered log.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use dam_upload_models::params::{
    FinaliseStagedUploadQuery, FinaliseUploadParams, PollStatusQuery, RegisterChunkQuery,
    RequestUploadQuery, SaveMediaQuery,
};
use dam_upload_models::{
    AssetReference, Chunk, Destination, ImportHandle, MultipartPolicy, PollStatus, StagedFile,
    StagingTicket,
};

use crate::api::AssetService;
use crate::storage::{StagedPart, StagingStore};
use crate::{Stage, UploadError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    UploadChunk { upload_id: String, index: u32, len: usize, sha256: String },
    FinaliseUpload { upload_id: String, params: FinaliseUploadParams },
    ResolveEndpoint,
    RequestTicket(String),
    StagePart { index: u32, key: String, chunks: u32 },
    RegisterChunk(RegisterChunkQuery),
    FinaliseStaged(FinaliseStagedUploadQuery),
    Poll(Vec<String>),
    SaveMedia { import: String, destination: Destination, query: SaveMediaQuery },
}

#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<Call>>>);

impl CallLog {
    pub fn push(&self, call: Call) {
        self.0.lock().unwrap().push(call);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.0.lock().unwrap().iter().filter(|c| pred(c)).count()
    }

    pub fn position(&self, pred: impl Fn(&Call) -> bool) -> Option<usize> {
        self.0.lock().unwrap().iter().position(pred)
    }
}

/// Tracks how many chunk transfers are running at once.
#[derive(Clone, Default)]
pub struct InFlight {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl InFlight {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Yields a few times so concurrently dispatched chunks finish out of
/// order: lower indexes wait longest.
async fn shuffle_delay(index: u32) {
    for _ in 0..(8 - index % 8) {
        tokio::task::yield_now().await;
    }
}

fn fail(stage: Stage) -> UploadError {
    UploadError::Request {
        stage,
        status: 500,
        body: "boom".to_string(),
    }
}

pub fn ticket() -> StagingTicket {
    StagingTicket {
        file: StagedFile {
            upload_id: "up-1".to_string(),
            target_id: "tg-1".to_string(),
        },
        key_prefix: "staged/file.bin".to_string(),
        policy: MultipartPolicy {
            key: "bucket/staged/file.bin".to_string(),
            acl: "private".to_string(),
            content_type: "application/octet-stream".to_string(),
            policy: "cG9saWN5".to_string(),
            signature: "sig".to_string(),
            algorithm: "AWS4-HMAC-SHA256".to_string(),
            credential: "cred".to_string(),
            date: "20240101T000000Z".to_string(),
            success_action_status: "201".to_string(),
        },
    }
}

pub struct FakeAssetService {
    pub log: CallLog,
    pub in_flight: InFlight,
    pub correlation_id: Option<String>,
    pub import_ids: String,
    pub fail_at: Option<Stage>,
    polls: Mutex<VecDeque<PollStatus>>,
}

impl FakeAssetService {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            in_flight: InFlight::default(),
            correlation_id: Some("abc".to_string()),
            import_ids: "abc".to_string(),
            fail_at: None,
            polls: Mutex::new(VecDeque::new()),
        }
    }

    /// Queues poll responses; once exhausted, every poll is pending.
    pub fn with_polls(self, polls: impl IntoIterator<Item = PollStatus>) -> Self {
        *self.polls.lock().unwrap() = polls.into_iter().collect();
        self
    }

    pub fn failing_at(mut self, stage: Stage) -> Self {
        self.fail_at = Some(stage);
        self
    }

    fn check(&self, stage: Stage) -> Result<(), UploadError> {
        if self.fail_at == Some(stage) {
            Err(fail(stage))
        } else {
            Ok(())
        }
    }
}

pub fn done(ids: &[&str]) -> PollStatus {
    PollStatus {
        items_done: ids.iter().map(ToString::to_string).collect(),
        ..PollStatus::default()
    }
}

pub fn failed(ids: &[&str]) -> PollStatus {
    PollStatus {
        items_failed: ids.iter().map(ToString::to_string).collect(),
        ..PollStatus::default()
    }
}

#[async_trait]
impl AssetService for FakeAssetService {
    async fn upload_chunk(
        &self,
        upload_id: &str,
        chunk: Chunk,
        content_sha256: &str,
    ) -> Result<(), UploadError> {
        self.in_flight.enter();
        shuffle_delay(chunk.index).await;
        self.in_flight.exit();
        self.check(Stage::UploadChunk)?;
        self.log.push(Call::UploadChunk {
            upload_id: upload_id.to_string(),
            index: chunk.index,
            len: chunk.len(),
            sha256: content_sha256.to_string(),
        });
        Ok(())
    }

    async fn finalise_upload(
        &self,
        upload_id: &str,
        params: &FinaliseUploadParams,
    ) -> Result<Option<String>, UploadError> {
        self.check(Stage::FinaliseUpload)?;
        self.log.push(Call::FinaliseUpload {
            upload_id: upload_id.to_string(),
            params: params.clone(),
        });
        Ok(self.correlation_id.clone())
    }

    async fn closest_storage_endpoint(&self) -> Result<String, UploadError> {
        self.check(Stage::ResolveEndpoint)?;
        self.log.push(Call::ResolveEndpoint);
        Ok("https://bucket.storage.example.com/".to_string())
    }

    async fn request_staging_ticket(
        &self,
        query: &RequestUploadQuery,
    ) -> Result<StagingTicket, UploadError> {
        self.check(Stage::RequestTicket)?;
        self.log.push(Call::RequestTicket(query.filename.clone()));
        Ok(ticket())
    }

    async fn register_chunk(&self, query: &RegisterChunkQuery) -> Result<(), UploadError> {
        tokio::task::yield_now().await;
        self.check(Stage::RegisterChunk)?;
        self.log.push(Call::RegisterChunk(query.clone()));
        Ok(())
    }

    async fn finalise_staged_upload(
        &self,
        query: &FinaliseStagedUploadQuery,
    ) -> Result<String, UploadError> {
        self.check(Stage::FinaliseStaged)?;
        self.log.push(Call::FinaliseStaged(query.clone()));
        Ok(self.import_ids.clone())
    }

    async fn poll_status(&self, query: &PollStatusQuery) -> Result<PollStatus, UploadError> {
        self.check(Stage::PollStatus)?;
        self.log.push(Call::Poll(query.items.clone()));
        Ok(self.polls.lock().unwrap().pop_front().unwrap_or_default())
    }

    async fn save_media(
        &self,
        import: &ImportHandle,
        destination: &Destination,
        query: &SaveMediaQuery,
    ) -> Result<AssetReference, UploadError> {
        self.check(Stage::SaveMedia)?;
        self.log.push(Call::SaveMedia {
            import: import.joined(),
            destination: destination.clone(),
            query: query.clone(),
        });
        Ok(match destination {
            Destination::NewAsset { .. } => AssetReference {
                asset_id: "asset-1".to_string(),
                name: query.name.clone(),
            },
            Destination::NewVersion { media_id } => AssetReference {
                asset_id: media_id.clone(),
                name: None,
            },
        })
    }
}

pub struct FakeStagingStore {
    pub log: CallLog,
    pub in_flight: InFlight,
    /// Rejects the part with this index.
    pub reject_index: Option<u32>,
}

impl FakeStagingStore {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            in_flight: InFlight::default(),
            reject_index: None,
        }
    }
}

#[async_trait]
impl StagingStore for FakeStagingStore {
    async fn put_part(&self, part: StagedPart<'_>) -> Result<(), UploadError> {
        self.in_flight.enter();
        shuffle_delay(part.chunk.index).await;
        self.in_flight.exit();
        if self.reject_index == Some(part.chunk.index) {
            return Err(UploadError::Staging {
                index: part.chunk.index,
                status: 403,
                body: "policy expired".to_string(),
            });
        }
        self.log.push(Call::StagePart {
            index: part.chunk.index,
            key: part.policy.object_key(part.chunk.index),
            chunks: part.chunk_count,
        });
        Ok(())
    }
}
