//! JSON response types for the HTTP API.

use jsonsync_core::ResourceMeta;
use serde::Serialize;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Health status.
    pub status: &'static str,
}

/// One entry of the file listing.
#[derive(Debug, Serialize)]
pub struct FileSummary {
    /// File name, including the `.json` suffix.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Last modification, ISO-8601 UTC with second precision.
    pub updated_at: String,
}

impl From<ResourceMeta> for FileSummary {
    fn from(meta: ResourceMeta) -> Self {
        Self {
            name: meta.name.to_string(),
            size: meta.size,
            updated_at: meta.stamp.to_rfc3339(),
        }
    }
}

/// Response to a successful save.
#[derive(Debug, Serialize)]
pub struct SaveResponse {
    pub status: &'static str,
    pub file: String,
}
