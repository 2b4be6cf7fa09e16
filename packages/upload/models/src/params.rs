//! Explicit query-parameter encoding for asset service calls.
//!
//! Scalars encode as `name=value`, string lists as a JSON array string,
//! and metaproperty maps as one `name.{metapropertyId}=csv(optionIds)`
//! pair per entry.

use crate::{ImportHandle, MetapropertyAttributes, StagingTicket, UploadIntent};

/// Ordered list of encoded `(name, value)` pairs.
pub type Params = Vec<(String, String)>;

/// Implemented by every query object sent to the asset service.
pub trait ToParams {
    fn to_params(&self) -> Params;
}

/// Accumulates encoded parameters in insertion order.
#[derive(Debug, Default)]
pub struct ParamsBuilder {
    params: Params,
}

impl ParamsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn scalar(mut self, name: &str, value: impl ToString) -> Self {
        self.params.push((name.to_string(), value.to_string()));
        self
    }

    /// Adds `name=value` only when `value` is present.
    #[must_use]
    pub fn optional(self, name: &str, value: Option<impl ToString>) -> Self {
        match value {
            Some(value) => self.scalar(name, value),
            None => self,
        }
    }

    /// Adds `name=["a","b"]`.
    #[must_use]
    pub fn json_list(self, name: &str, values: &[String]) -> Self {
        let encoded = serde_json::to_string(values).unwrap_or_else(|_| "[]".to_string());
        self.scalar(name, encoded)
    }

    /// Adds one `name.{id}=opt1,opt2` pair per metaproperty.
    #[must_use]
    pub fn metaproperties(mut self, name: &str, attributes: &MetapropertyAttributes) -> Self {
        for (id, options) in attributes {
            self.params
                .push((format!("{name}.{id}"), options.join(",")));
        }
        self
    }

    #[must_use]
    pub fn build(self) -> Params {
        self.params
    }
}

/// Form body for the direct-upload finalize call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinaliseUploadParams {
    pub chunks_count: u32,
    pub file_name: String,
    pub file_size: u64,
    pub sha256: String,
    pub intent: UploadIntent,
}

impl ToParams for FinaliseUploadParams {
    fn to_params(&self) -> Params {
        ParamsBuilder::new()
            .scalar("chunksCount", self.chunks_count)
            .scalar("fileName", &self.file_name)
            .scalar("fileSize", self.file_size)
            .scalar("sha256", &self.sha256)
            .scalar("intent", self.intent)
            .build()
    }
}

/// Form body requesting a staging ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestUploadQuery {
    pub filename: String,
}

impl ToParams for RequestUploadQuery {
    fn to_params(&self) -> Params {
        ParamsBuilder::new()
            .scalar("filename", &self.filename)
            .build()
    }
}

/// Form body registering one staged part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterChunkQuery {
    pub chunk_number: u32,
    pub upload_id: String,
    pub target_id: String,
    pub part_key: String,
}

impl RegisterChunkQuery {
    #[must_use]
    pub fn for_part(ticket: &StagingTicket, index: u32) -> Self {
        Self {
            chunk_number: index,
            upload_id: ticket.file.upload_id.clone(),
            target_id: ticket.file.target_id.clone(),
            part_key: ticket.part_key(index),
        }
    }
}

impl ToParams for RegisterChunkQuery {
    fn to_params(&self) -> Params {
        ParamsBuilder::new()
            .scalar("chunkNumber", self.chunk_number)
            .scalar("id", &self.upload_id)
            .scalar("targetid", &self.target_id)
            .scalar("filename", &self.part_key)
            .build()
    }
}

/// Form body finalizing a staged upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinaliseStagedUploadQuery {
    pub upload_id: String,
    pub target_id: String,
    pub key_prefix: String,
    pub chunks: u32,
}

impl FinaliseStagedUploadQuery {
    #[must_use]
    pub fn for_ticket(ticket: &StagingTicket, chunks: u32) -> Self {
        Self {
            upload_id: ticket.file.upload_id.clone(),
            target_id: ticket.file.target_id.clone(),
            key_prefix: ticket.key_prefix.clone(),
            chunks,
        }
    }
}

impl ToParams for FinaliseStagedUploadQuery {
    fn to_params(&self) -> Params {
        ParamsBuilder::new()
            .scalar("id", &self.upload_id)
            .scalar("targetid", &self.target_id)
            .scalar("s3_filename", &self.key_prefix)
            .scalar("chunks", self.chunks)
            .build()
    }
}

/// Poll query for one import handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollStatusQuery {
    pub items: Vec<String>,
}

impl From<&ImportHandle> for PollStatusQuery {
    fn from(handle: &ImportHandle) -> Self {
        Self {
            items: handle.ids().to_vec(),
        }
    }
}

impl ToParams for PollStatusQuery {
    fn to_params(&self) -> Params {
        ParamsBuilder::new().json_list("items", &self.items).build()
    }
}

/// Form body for saving an import as a new asset or a new version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveMediaQuery {
    /// Set only when creating a new asset.
    pub brand_id: Option<String>,
    /// Set only when creating a new asset.
    pub name: Option<String>,
    pub audit: bool,
    pub metaproperties: MetapropertyAttributes,
}

impl ToParams for SaveMediaQuery {
    fn to_params(&self) -> Params {
        ParamsBuilder::new()
            .optional("brandId", self.brand_id.as_deref())
            .optional("name", self.name.as_deref())
            .scalar("audit", self.audit)
            .metaproperties("metaproperty", &self.metaproperties)
            .build()
    }
}
