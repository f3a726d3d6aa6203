use thiserror::Error;

/// Failures raised while locating or loading a resource.
///
/// The dispatcher never interprets these; they pass through to the caller
/// unchanged, except on the embedded-resource path which turns them into
/// inline markup.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("resource `{path}` not found")]
    NotFound { path: String },
    #[error("invalid resource path `{path}`: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("failed to read resource `{path}`: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid metadata for resource `{path}`: {message}")]
    Metadata { path: String, message: String },
}

impl ResourceError {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn metadata(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Metadata {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
