//! Progress reporting for uploads.
//!
//! [`ProgressCallback`] decouples progress reporting from any rendering
//! backend. Units are bytes: the total is the file size and each
//! acknowledged chunk advances the position by its length. The CLI renders
//! it with `indicatif`; callers that do not care pass [`null_progress()`].

use std::sync::Arc;

use dam_upload_models::ChunkProgress;

/// Receives progress updates from a running upload.
///
/// Implementations must be `Send + Sync`; chunks are acknowledged from
/// concurrently polled futures.
pub trait ProgressCallback: Send + Sync {
    /// Set the total number of bytes to transfer.
    fn set_total(&self, total: u64);

    /// Advance by `delta` bytes.
    fn inc(&self, delta: u64);

    /// Update the stage description shown next to the indicator.
    fn set_message(&self, msg: String);

    /// Mark the upload complete with a final message.
    fn finish(&self, msg: String);

    /// Remove the indicator without a message (used on failure).
    fn finish_and_clear(&self);

    /// Called once per acknowledged chunk, in completion order.
    fn chunk_done(&self, chunk: &ChunkProgress) {
        self.inc(chunk.bytes as u64);
    }
}

/// Ignores every update.
pub struct NullProgress;

impl ProgressCallback for NullProgress {
    fn set_total(&self, _total: u64) {}
    fn inc(&self, _delta: u64) {}
    fn set_message(&self, _msg: String) {}
    fn finish(&self, _msg: String) {}
    fn finish_and_clear(&self) {}
}

/// Returns a shared [`NullProgress`] instance.
#[must_use]
pub fn null_progress() -> Arc<dyn ProgressCallback> {
    Arc::new(NullProgress)
}
