//! User-supplied local file.

use crate::validation::{mime_for_file_name, MAX_FILE_SIZE_BYTES};
use std::io;
use std::path::Path;

const FALLBACK_MIME_TYPE: &str = "application/octet-stream";

/// A local file handed to the import flow.
///
/// `size` is the size the file claims; validation rejects files whose
/// content does not match it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    bytes: Vec<u8>,
}

impl LocalFile {
    /// Creates an in-memory file; `size` is taken from `bytes`.
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            mime_type: mime_type.into(),
            size: bytes.len() as u64,
            bytes,
        }
    }

    /// Reads a file from disk, deriving its MIME type from the extension.
    ///
    /// Files larger than the validation cap are not read; the returned value
    /// keeps the on-disk size and empty content so validation rejects it.
    pub async fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
        let mime_type = mime_for_file_name(&name)
            .unwrap_or(FALLBACK_MIME_TYPE)
            .to_string();

        let size = tokio::fs::metadata(path).await?.len();
        if size > MAX_FILE_SIZE_BYTES {
            return Ok(Self {
                name,
                mime_type,
                size,
                bytes: Vec::new(),
            });
        }

        let bytes = tokio::fs::read(path).await?;
        Ok(Self {
            name,
            mime_type,
            size,
            bytes,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether the claimed size matches the readable content.
    pub fn is_readable(&self) -> bool {
        self.bytes.len() as u64 == self.size
    }
}
