//! Asset service operations used by the upload pipeline.
//!
//! [`AssetService`] is the seam between the pipeline and HTTP. The pipeline
//! only ever talks to the trait; [`HttpAssetService`] is the `reqwest`
//! implementation.
//!
//! Routes, relative to the configured base URL:
//!
//! | Operation | Route |
//! |---|---|
//! | upload chunk | `POST v7/file_cmds/upload/{id}/chunk/{index}` |
//! | finalise upload | `POST v7/file_cmds/upload/{id}/finalise_api` |
//! | storage endpoint | `GET api/upload/endpoint` |
//! | staging ticket | `POST api/upload/` |
//! | register chunk | `POST api/v4/upload/` |
//! | finalise staged | `POST api/v4/upload/{id}/` |
//! | poll status | `GET api/v4/upload/poll/` |
//! | save media | `POST api/v4/media/save/{import}/` or `POST api/v4/media/{media}/save/{import}/` |

use std::sync::Arc;

use async_trait::async_trait;
use dam_upload_models::params::{
    FinaliseStagedUploadQuery, FinaliseUploadParams, PollStatusQuery, RegisterChunkQuery,
    RequestUploadQuery, SaveMediaQuery, ToParams as _,
};
use dam_upload_models::{
    AssetReference, Chunk, Destination, ImportHandle, PollStatus, StagingTicket,
};
use serde::Deserialize;

use crate::credentials::CredentialProvider;
use crate::{Stage, UploadError};

/// Response header carrying the direct-upload correlation id.
pub const CORRELATION_ID_HEADER: &str = "X-API-Correlation-ID";

/// Request header carrying a chunk's SHA-256.
pub const CONTENT_SHA256_HEADER: &str = "Content-SHA256";

/// Remote operations the upload pipeline depends on.
///
/// Implementations report non-2xx responses as [`UploadError::Request`]
/// and never retry.
#[async_trait]
pub trait AssetService: Send + Sync {
    /// Sends one chunk of a direct upload. The payload is moved into the
    /// request body.
    async fn upload_chunk(
        &self,
        upload_id: &str,
        chunk: Chunk,
        content_sha256: &str,
    ) -> Result<(), UploadError>;

    /// Finalizes a direct upload. Returns the correlation id header, if the
    /// server sent one.
    async fn finalise_upload(
        &self,
        upload_id: &str,
        params: &FinaliseUploadParams,
    ) -> Result<Option<String>, UploadError>;

    /// Returns the region-local storage endpoint URL.
    async fn closest_storage_endpoint(&self) -> Result<String, UploadError>;

    /// Requests a signed staging location for one file.
    async fn request_staging_ticket(
        &self,
        query: &RequestUploadQuery,
    ) -> Result<StagingTicket, UploadError>;

    /// Tells the service a staged part exists.
    async fn register_chunk(&self, query: &RegisterChunkQuery) -> Result<(), UploadError>;

    /// Finalizes a staged upload. Returns the raw, possibly comma-joined,
    /// import id list.
    async fn finalise_staged_upload(
        &self,
        query: &FinaliseStagedUploadQuery,
    ) -> Result<String, UploadError>;

    /// Reports conversion state for the queried import ids.
    async fn poll_status(&self, query: &PollStatusQuery) -> Result<PollStatus, UploadError>;

    /// Saves a converted import as a new asset or a new version.
    async fn save_media(
        &self,
        import: &ImportHandle,
        destination: &Destination,
        query: &SaveMediaQuery,
    ) -> Result<AssetReference, UploadError>;
}

/// [`AssetService`] over HTTP.
pub struct HttpAssetService {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<dyn CredentialProvider>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FinaliseStagedResponse {
    #[serde(default)]
    import_id: Option<String>,
}

#[derive(Deserialize)]
struct SaveMediaResponse {
    #[serde(default, alias = "mediaId")]
    mediaid: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl HttpAssetService {
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }

    fn url(&self, route: &str) -> String {
        format!("{}/{route}", self.base_url)
    }

    async fn authorized(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::RequestBuilder, UploadError> {
        let token = self.credentials.bearer_token().await?;
        Ok(request.bearer_auth(token))
    }

    /// Sends `request` with a bearer token and fails on non-2xx.
    async fn send(
        &self,
        stage: Stage,
        request: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, UploadError> {
        let response = self.authorized(request).await?.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        log::warn!("{stage} returned HTTP {status}: {body}");
        Err(UploadError::Request {
            stage,
            status: status.as_u16(),
            body,
        })
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        &self,
        stage: Stage,
        request: reqwest::RequestBuilder,
    ) -> Result<T, UploadError> {
        let text = self.send(stage, request).await?.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| UploadError::protocol(stage, format!("undecodable body: {e}")))
    }
}

#[async_trait]
impl AssetService for HttpAssetService {
    async fn upload_chunk(
        &self,
        upload_id: &str,
        chunk: Chunk,
        content_sha256: &str,
    ) -> Result<(), UploadError> {
        let request = self
            .client
            .post(self.url(&format!(
                "v7/file_cmds/upload/{upload_id}/chunk/{}",
                chunk.index
            )))
            .header(CONTENT_SHA256_HEADER, content_sha256)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(chunk.bytes);
        self.send(Stage::UploadChunk, request).await?;
        Ok(())
    }

    async fn finalise_upload(
        &self,
        upload_id: &str,
        params: &FinaliseUploadParams,
    ) -> Result<Option<String>, UploadError> {
        let request = self
            .client
            .post(self.url(&format!("v7/file_cmds/upload/{upload_id}/finalise_api")))
            .form(&params.to_params());
        let response = self.send(Stage::FinaliseUpload, request).await?;
        Ok(response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(String::from))
    }

    async fn closest_storage_endpoint(&self) -> Result<String, UploadError> {
        let request = self.client.get(self.url("api/upload/endpoint"));
        self.send_json(Stage::ResolveEndpoint, request).await
    }

    async fn request_staging_ticket(
        &self,
        query: &RequestUploadQuery,
    ) -> Result<StagingTicket, UploadError> {
        let request = self
            .client
            .post(self.url("api/upload/"))
            .form(&query.to_params());
        self.send_json(Stage::RequestTicket, request).await
    }

    async fn register_chunk(&self, query: &RegisterChunkQuery) -> Result<(), UploadError> {
        let request = self
            .client
            .post(self.url("api/v4/upload/"))
            .form(&query.to_params());
        self.send(Stage::RegisterChunk, request).await?;
        Ok(())
    }

    async fn finalise_staged_upload(
        &self,
        query: &FinaliseStagedUploadQuery,
    ) -> Result<String, UploadError> {
        let request = self
            .client
            .post(self.url(&format!("api/v4/upload/{}/", query.upload_id)))
            .form(&query.to_params());
        let body: FinaliseStagedResponse = self.send_json(Stage::FinaliseStaged, request).await?;
        body.import_id
            .ok_or_else(|| UploadError::protocol(Stage::FinaliseStaged, "missing importId"))
    }

    async fn poll_status(&self, query: &PollStatusQuery) -> Result<PollStatus, UploadError> {
        let request = self
            .client
            .get(self.url("api/v4/upload/poll/"))
            .query(&query.to_params());
        self.send_json(Stage::PollStatus, request).await
    }

    async fn save_media(
        &self,
        import: &ImportHandle,
        destination: &Destination,
        query: &SaveMediaQuery,
    ) -> Result<AssetReference, UploadError> {
        let route = match destination {
            Destination::NewAsset { .. } => format!("api/v4/media/save/{import}/"),
            Destination::NewVersion { media_id } => {
                format!("api/v4/media/{media_id}/save/{import}/")
            }
        };
        let request = self.client.post(self.url(&route)).form(&query.to_params());
        let body: SaveMediaResponse = self.send_json(Stage::SaveMedia, request).await?;

        let asset_id = match (body.mediaid, destination) {
            (Some(id), _) => id,
            (None, Destination::NewVersion { media_id }) => media_id.clone(),
            (None, Destination::NewAsset { .. }) => {
                return Err(UploadError::protocol(Stage::SaveMedia, "missing mediaid"));
            }
        };

        Ok(AssetReference {
            asset_id,
            name: body.name,
        })
    }
}
