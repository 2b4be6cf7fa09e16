//! Attaches a converted import to the catalog.

use std::sync::Arc;

use dam_upload_models::params::SaveMediaQuery;
use dam_upload_models::{AssetReference, Destination, ImportHandle, UploadRequestSpec};

use crate::UploadError;
use crate::api::AssetService;

pub struct AssetAttacher {
    service: Arc<dyn AssetService>,
}

impl AssetAttacher {
    #[must_use]
    pub fn new(service: Arc<dyn AssetService>) -> Self {
        Self { service }
    }

    /// Saves `import` as a new asset under the spec's brand, or as a new
    /// version of the spec's existing asset. The audit flag and
    /// metaproperty selections are always forwarded.
    ///
    /// # Errors
    ///
    /// Returns [`UploadError::Request`] if the save call is rejected.
    pub async fn attach(
        &self,
        import: &ImportHandle,
        spec: &UploadRequestSpec,
    ) -> Result<AssetReference, UploadError> {
        let query = save_query(spec);
        let reference = self
            .service
            .save_media(import, spec.destination(), &query)
            .await?;

        match spec.destination() {
            Destination::NewAsset { brand_id } => log::info!(
                "Created asset {} in brand {brand_id} from import {import}",
                reference.asset_id
            ),
            Destination::NewVersion { media_id } => {
                log::info!("Added version to asset {media_id} from import {import}");
            }
        }
        Ok(reference)
    }
}

fn save_query(spec: &UploadRequestSpec) -> SaveMediaQuery {
    let (brand_id, name) = match spec.destination() {
        Destination::NewAsset { brand_id } => {
            (Some(brand_id.clone()), Some(spec.filename().to_string()))
        }
        Destination::NewVersion { .. } => (None, None),
    };
    SaveMediaQuery {
        brand_id,
        name,
        audit: spec.audit(),
        metaproperties: spec.metaproperties().clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Stage;
    use crate::fakes::{Call, CallLog, FakeAssetService};

    #[tokio::test]
    async fn new_asset_sends_brand_and_filename() {
        let log = CallLog::default();
        let attacher = AssetAttacher::new(Arc::new(FakeAssetService::new(log.clone())));
        let spec = UploadRequestSpec::new(
            "/tmp/photo.jpg",
            Destination::NewAsset {
                brand_id: "brand-1".to_string(),
            },
        )
        .unwrap()
        .with_audit(true)
        .with_metaproperty("mp", "opt");

        let reference = attacher
            .attach(&ImportHandle::new("abc"), &spec)
            .await
            .unwrap();
        assert_eq!(reference.asset_id, "asset-1");
        assert_eq!(reference.name.as_deref(), Some("photo.jpg"));

        let Call::SaveMedia { import, query, .. } = &log.calls()[0] else {
            panic!("expected save call");
        };
        assert_eq!(import, "abc");
        assert_eq!(query.brand_id.as_deref(), Some("brand-1"));
        assert_eq!(query.name.as_deref(), Some("photo.jpg"));
        assert!(query.audit);
        assert_eq!(query.metaproperties["mp"], vec!["opt"]);
    }

    #[tokio::test]
    async fn new_version_targets_existing_asset() {
        let log = CallLog::default();
        let attacher = AssetAttacher::new(Arc::new(FakeAssetService::new(log.clone())));
        let spec = UploadRequestSpec::new(
            "/tmp/photo.jpg",
            Destination::NewVersion {
                media_id: "media-9".to_string(),
            },
        )
        .unwrap();

        let reference = attacher
            .attach(&ImportHandle::new("abc"), &spec)
            .await
            .unwrap();
        assert_eq!(reference.asset_id, "media-9");

        let Call::SaveMedia {
            destination, query, ..
        } = &log.calls()[0]
        else {
            panic!("expected save call");
        };
        assert_eq!(destination, spec.destination());
        assert!(query.brand_id.is_none());
        assert!(query.name.is_none());
    }

    #[tokio::test]
    async fn rejected_save_is_a_request_error() {
        let service = FakeAssetService::new(CallLog::default()).failing_at(Stage::SaveMedia);
        let attacher = AssetAttacher::new(Arc::new(service));
        let spec = UploadRequestSpec::new(
            "a.jpg",
            Destination::NewAsset {
                brand_id: "b".to_string(),
            },
        )
        .unwrap();

        let err = attacher
            .attach(&ImportHandle::new("abc"), &spec)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            UploadError::Request {
                stage: Stage::SaveMedia,
                status: 500,
                ..
            }
        ));
    }
}
