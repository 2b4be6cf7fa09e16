//! Waits for server-side conversion of an import.
//!
//! The first poll is issued immediately; subsequent polls are spaced by a
//! fixed interval. Only "still pending" responses are retried. A failed
//! import or a transport error ends polling at once.

use std::sync::Arc;
use std::time::Duration;

use dam_upload_models::params::PollStatusQuery;
use dam_upload_models::{ConversionOutcome, ImportHandle};
use tokio_util::sync::CancellationToken;

use crate::UploadError;
use crate::api::AssetService;
use crate::config::PollConfig;

/// Fixed-interval retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollConfig::default().into()
    }
}

impl From<PollConfig> for PollPolicy {
    fn from(config: PollConfig) -> Self {
        Self {
            interval: config.interval(),
            max_attempts: config.max_attempts,
        }
    }
}

pub struct ConversionPoller {
    service: Arc<dyn AssetService>,
    policy: PollPolicy,
}

impl ConversionPoller {
    #[must_use]
    pub fn new(service: Arc<dyn AssetService>, policy: PollPolicy) -> Self {
        Self { service, policy }
    }

    /// Issues a single poll for `handle`.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError`] if the poll request fails.
    pub async fn poll_once(&self, handle: &ImportHandle) -> Result<ConversionOutcome, UploadError> {
        let status = self
            .service
            .poll_status(&PollStatusQuery::from(handle))
            .await?;
        Ok(status.outcome_for(handle))
    }

    /// Polls until `handle` is converted.
    ///
    /// # Errors
    ///
    /// * [`UploadError::Conversion`] if the service reports the import failed
    /// * [`UploadError::Timeout`] if still pending after `max_attempts` polls
    /// * [`UploadError::Cancelled`] if `cancel` fires
    /// * any error from the poll request itself
    pub async fn wait_until_converted(
        &self,
        handle: &ImportHandle,
        cancel: &CancellationToken,
    ) -> Result<ImportHandle, UploadError> {
        let max_attempts = self.policy.max_attempts;

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tokio::select! {
                    () = cancel.cancelled() => return Err(UploadError::Cancelled),
                    () = tokio::time::sleep(self.policy.interval) => {}
                }
            }

            let outcome = tokio::select! {
                () = cancel.cancelled() => return Err(UploadError::Cancelled),
                outcome = self.poll_once(handle) => outcome?,
            };

            match outcome {
                ConversionOutcome::Done(done) => {
                    log::info!("Import {done} converted after {attempt} poll(s)");
                    return Ok(done);
                }
                ConversionOutcome::Failed(failed) => {
                    log::warn!("Import {failed} failed conversion");
                    return Err(UploadError::Conversion {
                        import_id: failed.joined(),
                    });
                }
                ConversionOutcome::Pending => {
                    log::debug!("Import {handle} pending (poll {attempt}/{max_attempts})");
                }
            }
        }

        Err(UploadError::Timeout {
            attempts: max_attempts,
        })
    }
}
