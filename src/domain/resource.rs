//! Resource model consumed by the render dispatcher.
//!
//! A resource is the content item being rendered (a wiki "page"). The
//! dispatcher only needs its path, mime type, a version identifier that
//! changes iff the content changes, and the optional preferred output engine.

use std::sync::Arc;

use bytes::Bytes;
use sha2::{Digest, Sha256};

use super::error::ResourceError;

/// Stable identifier of one revision of a resource's content.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceVersion {
    cache_id: String,
}

impl ResourceVersion {
    pub fn new(cache_id: impl Into<String>) -> Self {
        Self {
            cache_id: cache_id.into(),
        }
    }

    /// Content-addressed version: hex SHA-256 of the bytes.
    pub fn of_content(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self {
            cache_id: hex::encode(hasher.finalize()),
        }
    }

    pub fn cache_id(&self) -> &str {
        &self.cache_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    path: String,
    mime: String,
    version: ResourceVersion,
    output: Option<String>,
    content: Bytes,
}

impl Resource {
    /// Build a resource whose version is derived from its content.
    pub fn new(path: impl Into<String>, mime: impl Into<String>, content: impl Into<Bytes>) -> Self {
        let content = content.into();
        Self {
            path: normalize_path(&path.into()),
            mime: mime.into(),
            version: ResourceVersion::of_content(&content),
            output: None,
            content,
        }
    }

    pub fn with_version(mut self, version: ResourceVersion) -> Self {
        self.version = version;
        self
    }

    /// Declare the engine this resource prefers to be rendered with.
    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        let output = output.into();
        let trimmed = output.trim();
        self.output = (!trimmed.is_empty()).then(|| trimmed.to_string());
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    pub fn version(&self) -> &ResourceVersion {
        &self.version
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn content(&self) -> &Bytes {
        &self.content
    }

    /// Content as text, replacing invalid UTF-8 sequences.
    pub fn text(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.content)
    }

    /// Last path segment, used for download file names.
    pub fn name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Resolves resource paths to resources.
///
/// Implementations must be safe to share across request threads.
pub trait ResourceStore: Send + Sync {
    fn find(&self, path: &str) -> Result<Arc<Resource>, ResourceError>;
}

/// Collapse duplicate separators and strip leading/trailing slashes.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/")
}
