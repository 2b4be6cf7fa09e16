#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Data types shared by the asset upload pipeline.
//!
//! Everything here is plain data: what the caller asks to upload
//! ([`UploadRequestSpec`]), what flows between pipeline stages ([`Chunk`],
//! [`StagingTicket`], [`ImportHandle`]), and what comes back
//! ([`ConversionOutcome`], [`AssetReference`], [`ChunkProgress`],
//! [`UploadEvent`]).
//!
//! The [`params`] module holds the explicit wire encoding of every query
//! object the asset service accepts.

pub mod params;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Maximum size of a single chunk (5 MiB).
pub const MAX_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// Errors raised while building an [`UploadRequestSpec`].
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SpecError {
    /// Neither or both of brand id and existing-asset id were given.
    #[error("exactly one of brand id or existing asset id must be set")]
    AmbiguousDestination,

    /// The file path has no final component to derive a filename from.
    #[error("cannot derive a filename from {path}")]
    NoFilename {
        /// The offending path.
        path: String,
    },
}

/// Why a file is being uploaded. Affects server-side processing rules.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UploadIntent {
    #[default]
    CreateAsset,
    GenerateAssetImageCrop,
    GenerateAssetVideoClip,
    UploadAccountLoginLogo,
    UploadAccountLogo,
    UploadBackground,
    UploadBrandImage,
    UploadCustomThumbnail,
    UploadMainUploaderAsset,
    UploadMetapropertyOptionImage,
    UploadNewsImage,
    UploadProfileImage,
    UploadStyleguideChapterImage,
    UploadStyleguidePageImage,
    UploadTransferFile,
    UploadWatermark,
    UploadWorkflowAsset,
}

/// Where the uploaded file ends up once attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// Create a new asset under this brand.
    NewAsset {
        /// Brand the new asset belongs to.
        brand_id: String,
    },
    /// Add a new version to an existing asset.
    NewVersion {
        /// Id of the asset receiving the version.
        media_id: String,
    },
}

impl Destination {
    /// Builds a destination from optional brand / asset ids, enforcing
    /// that exactly one is present.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::AmbiguousDestination`] when both or neither
    /// id is given.
    pub fn from_ids(
        brand_id: Option<String>,
        media_id: Option<String>,
    ) -> Result<Self, SpecError> {
        match (brand_id, media_id) {
            (Some(brand_id), None) => Ok(Self::NewAsset { brand_id }),
            (None, Some(media_id)) => Ok(Self::NewVersion { media_id }),
            _ => Err(SpecError::AmbiguousDestination),
        }
    }
}

/// Metaproperty id mapped to the selected option ids.
pub type MetapropertyAttributes = BTreeMap<String, Vec<String>>;

/// Everything needed to upload one file and attach it to an asset.
///
/// Immutable once built; the destination is either a brand (new asset) or
/// an existing asset (new version), never both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequestSpec {
    file_path: PathBuf,
    filename: String,
    destination: Destination,
    audit: bool,
    metaproperties: MetapropertyAttributes,
}

impl UploadRequestSpec {
    /// Creates a spec whose filename defaults to the last component of
    /// `file_path`.
    ///
    /// # Errors
    ///
    /// Returns [`SpecError::NoFilename`] if `file_path` ends in `..` or is
    /// empty.
    pub fn new(file_path: impl Into<PathBuf>, destination: Destination) -> Result<Self, SpecError> {
        let file_path = file_path.into();
        let filename = file_path
            .file_name()
            .and_then(|name| name.to_str())
            .map(String::from)
            .ok_or_else(|| SpecError::NoFilename {
                path: file_path.display().to_string(),
            })?;

        Ok(Self {
            file_path,
            filename,
            destination,
            audit: false,
            metaproperties: MetapropertyAttributes::new(),
        })
    }

    /// Overrides the filename reported to the asset service.
    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = filename.into();
        self
    }

    /// Sets the audit flag forwarded on save.
    #[must_use]
    pub const fn with_audit(mut self, audit: bool) -> Self {
        self.audit = audit;
        self
    }

    /// Selects `option_id` for `metaproperty_id`. Repeated calls for the
    /// same metaproperty accumulate options.
    #[must_use]
    pub fn with_metaproperty(
        mut self,
        metaproperty_id: impl Into<String>,
        option_id: impl Into<String>,
    ) -> Self {
        self.metaproperties
            .entry(metaproperty_id.into())
            .or_default()
            .push(option_id.into());
        self
    }

    #[must_use]
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    #[must_use]
    pub fn filename(&self) -> &str {
        &self.filename
    }

    #[must_use]
    pub const fn destination(&self) -> &Destination {
        &self.destination
    }

    #[must_use]
    pub const fn audit(&self) -> bool {
        self.audit
    }

    #[must_use]
    pub const fn metaproperties(&self) -> &MetapropertyAttributes {
        &self.metaproperties
    }
}

/// One indexed slice of the file being uploaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position in the upload (0-based for direct, 1-based for staged).
    pub index: u32,
    /// Raw chunk payload.
    pub bytes: Vec<u8>,
}

impl Chunk {
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Signed form fields the storage endpoint requires on every part.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MultipartPolicy {
    /// Object key prefix the policy was signed for.
    pub key: String,
    pub acl: String,
    #[serde(rename = "Content-Type")]
    pub content_type: String,
    #[serde(rename = "Policy")]
    pub policy: String,
    #[serde(rename = "X-Amz-Signature")]
    pub signature: String,
    #[serde(rename = "x-amz-algorithm")]
    pub algorithm: String,
    #[serde(rename = "x-amz-credential")]
    pub credential: String,
    #[serde(rename = "x-amz-date")]
    pub date: String,
    #[serde(deserialize_with = "string_or_number")]
    pub success_action_status: String,
}

impl MultipartPolicy {
    /// Storage object key for part `index`.
    #[must_use]
    pub fn object_key(&self, index: u32) -> String {
        format!("{}/p{index}", self.key)
    }
}

/// Server-side identity of the staged upload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StagedFile {
    #[serde(rename = "uploadid")]
    pub upload_id: String,
    #[serde(rename = "targetid")]
    pub target_id: String,
}

/// Per-upload staging location and credentials. One ticket per file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StagingTicket {
    #[serde(rename = "s3file")]
    pub file: StagedFile,
    /// Key prefix the asset service uses to locate registered parts.
    #[serde(rename = "s3_filename")]
    pub key_prefix: String,
    #[serde(rename = "multipart_params")]
    pub policy: MultipartPolicy,
}

impl StagingTicket {
    /// Key under which part `index` is registered with the asset service.
    #[must_use]
    pub fn part_key(&self, index: u32) -> String {
        format!("{}/p{index}", self.key_prefix)
    }
}

/// Opaque correlation id(s) for a finalized, not-yet-attached upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImportHandle {
    ids: Vec<String>,
}

impl ImportHandle {
    /// Wraps a single id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            ids: vec![id.into()],
        }
    }

    /// Parses a comma-joined id list. Blank entries are dropped; returns
    /// `None` if nothing is left.
    #[must_use]
    pub fn from_comma_joined(raw: &str) -> Option<Self> {
        let ids: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(String::from)
            .collect();
        if ids.is_empty() {
            None
        } else {
            Some(Self { ids })
        }
    }

    #[must_use]
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// The ids joined with commas, as the save endpoint expects them.
    #[must_use]
    pub fn joined(&self) -> String {
        self.ids.join(",")
    }
}

impl std::fmt::Display for ImportHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.joined())
    }
}

/// Poll endpoint response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollStatus {
    #[serde(default)]
    pub items_done: BTreeSet<String>,
    #[serde(default)]
    pub items_failed: BTreeSet<String>,
    /// Rejected items are treated as failed.
    #[serde(default)]
    pub items_rejected: BTreeSet<String>,
}

impl PollStatus {
    /// Classifies `handle` against this response.
    ///
    /// Any id in the failed or rejected set fails the whole handle; the
    /// handle is done only once every id is in the done set.
    #[must_use]
    pub fn outcome_for(&self, handle: &ImportHandle) -> ConversionOutcome {
        let failed = handle
            .ids()
            .iter()
            .any(|id| self.items_failed.contains(id) || self.items_rejected.contains(id));
        if failed {
            return ConversionOutcome::Failed(handle.clone());
        }

        if handle.ids().iter().all(|id| self.items_done.contains(id)) {
            ConversionOutcome::Done(handle.clone())
        } else {
            ConversionOutcome::Pending
        }
    }
}

/// State of server-side conversion for an import handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionOutcome {
    Pending,
    Done(ImportHandle),
    Failed(ImportHandle),
}

/// The asset an upload was attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssetReference {
    pub asset_id: String,
    /// Name of the created asset; `None` for new versions.
    pub name: Option<String>,
}

/// Emitted once per chunk after it has been fully transported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkProgress {
    /// Index of the completed chunk.
    pub index: u32,
    /// Payload size of the completed chunk.
    pub bytes: usize,
    /// Chunks completed so far, including this one.
    pub completed: u32,
    /// Planned chunk count for the whole file.
    pub total: u32,
}

/// Item of a progress-reporting upload stream.
///
/// Every chunk produces one [`UploadEvent::Chunk`]; a successful upload ends
/// with exactly one [`UploadEvent::Attached`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    Chunk(ChunkProgress),
    Attached(AssetReference),
}

/// What a backend needs to finalize a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    pub chunk_count: u32,
    pub filename: String,
    pub file_size: u64,
    /// Lowercase hex SHA-256 of the bytes that were transported.
    pub sha256: String,
    pub intent: UploadIntent,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}
