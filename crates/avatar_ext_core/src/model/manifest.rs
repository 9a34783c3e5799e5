//! Typed extension manifest.
//!
//! Instances are only built from an already validated and sanitized tree;
//! see `validation::validate_manifest`.

use serde::{Deserialize, Serialize};

/// Declarative description of one extension and its image assets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Extension identifier, unique across ingested extensions.
    pub key: String,
    pub description: String,
    #[serde(default)]
    pub images: Vec<ImageDescriptor>,
}

/// One declared image: fetched from a URL or matched to a local file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImageDescriptor {
    Url(UrlImage),
    Local(LocalImage),
}

impl ImageDescriptor {
    /// Role of the image within its extension, e.g. `standard`.
    pub fn key(&self) -> &str {
        match self {
            Self::Url(image) => &image.key,
            Self::Local(image) => &image.key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlImage {
    pub key: String,
    pub source_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalImage {
    pub key: String,
    pub file_name: String,
}
