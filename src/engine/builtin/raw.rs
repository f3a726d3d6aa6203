//! Pass-through engines: the stored bytes, inline or as an attachment.

use bytes::Bytes;

use crate::context::{CONTENT_DISPOSITION, Context};
use crate::engine::{Engine, EngineSpec, EngineSpecError, RenderError};

/// Serves the content unchanged with the resource's own mime type.
pub struct RawEngine {
    spec: EngineSpec,
}

impl RawEngine {
    pub fn new() -> Result<Self, EngineSpecError> {
        let spec = EngineSpec::builder("raw")
            .priority(900)
            .accepts(".*")
            .description("Unmodified content")
            .build()?;
        Ok(Self { spec })
    }
}

impl Engine for RawEngine {
    fn spec(&self) -> &EngineSpec {
        &self.spec
    }

    fn render(&self, context: &Context) -> Result<Bytes, RenderError> {
        let resource = context.resource().ok_or(RenderError::MissingResource)?;
        Ok(resource.content().clone())
    }
}

/// Serves the content as a file download.
pub struct DownloadEngine {
    spec: EngineSpec,
}

impl DownloadEngine {
    pub fn new() -> Result<Self, EngineSpecError> {
        let spec = EngineSpec::builder("download")
            .priority(999)
            .accepts(".*")
            .mime("application/octet-stream")
            .description("Content as an attachment")
            .build()?;
        Ok(Self { spec })
    }
}

impl Engine for DownloadEngine {
    fn spec(&self) -> &EngineSpec {
        &self.spec
    }

    fn render(&self, context: &Context) -> Result<Bytes, RenderError> {
        let resource = context.resource().ok_or(RenderError::MissingResource)?;
        let filename = resource.name().replace(['"', '\\'], "_");
        context.response().set(
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        );
        Ok(resource.content().clone())
    }
}
