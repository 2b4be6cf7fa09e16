#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Chunked upload pipeline for a remote digital-asset-management service.
//!
//! A file is split by [`chunk::ChunkSource`], transported through one of two
//! [`backend::UploadBackend`] strategies (direct chunk upload, or staging to
//! object storage followed by registration), finalized into an import
//! handle, optionally polled until server-side conversion completes
//! ([`poller::ConversionPoller`]), and finally attached to a new or existing
//! asset ([`attach::AssetAttacher`]).
//!
//! [`orchestrator::UploadOrchestrator`] composes the stages and is the
//! entry point most callers need.

pub mod api;
pub mod attach;
pub mod backend;
pub mod chunk;
pub mod config;
pub mod credentials;
pub mod hash;
pub mod orchestrator;
pub mod poller;
pub mod progress;
pub mod storage;

#[cfg(test)]
pub(crate) mod fakes;

pub use dam_upload_models as models;

use dam_upload_models::SpecError;
use strum_macros::{AsRefStr, Display};

/// Pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    UploadChunk,
    FinaliseUpload,
    ResolveEndpoint,
    RequestTicket,
    RegisterChunk,
    FinaliseStaged,
    PollStatus,
    SaveMedia,
}

/// Errors that can occur while uploading an asset.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Local file could not be opened or read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The asset service answered with a non-2xx status.
    #[error("{stage} failed with HTTP {status}: {body}")]
    Request {
        /// Stage that issued the request.
        stage: Stage,
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },

    /// The storage endpoint rejected a staged part.
    #[error("staging chunk {index} failed with HTTP {status}: {body}")]
    Staging {
        /// Index of the rejected chunk.
        index: u32,
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },

    /// A response was missing an expected field or header.
    #[error("{stage} returned an unexpected response: {message}")]
    Protocol {
        /// Stage whose response was malformed.
        stage: Stage,
        /// What was missing or undecodable.
        message: String,
    },

    /// Server-side conversion reported the import as failed.
    #[error("conversion failed for import {import_id}")]
    Conversion {
        /// Import id(s), comma-joined.
        import_id: String,
    },

    /// Conversion was still pending after the poll budget ran out.
    #[error("conversion still pending after {attempts} poll attempts")]
    Timeout {
        /// Number of polls issued.
        attempts: u32,
    },

    /// HTTP transport failed before a response was received.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// No bearer credential could be obtained.
    #[error("credential error: {message}")]
    Credentials {
        /// Description of what went wrong.
        message: String,
    },

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] config::ConfigError),

    /// The upload was cancelled.
    #[error("upload cancelled")]
    Cancelled,

    /// The upload request itself is invalid.
    #[error("invalid upload request: {0}")]
    InvalidRequest(#[from] SpecError),
}

impl UploadError {
    /// Builds a [`UploadError::Protocol`] for `stage`.
    #[must_use]
    pub fn protocol(stage: Stage, message: impl Into<String>) -> Self {
        Self::Protocol {
            stage,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_name_the_failing_stage() {
        let err = UploadError::Request {
            stage: Stage::RegisterChunk,
            status: 403,
            body: "denied".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "register_chunk failed with HTTP 403: denied"
        );

        let err = UploadError::protocol(Stage::FinaliseUpload, "missing header");
        assert_eq!(
            err.to_string(),
            "finalise_upload returned an unexpected response: missing header"
        );
    }
}
