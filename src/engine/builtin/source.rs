use bytes::Bytes;

use crate::context::Context;
use crate::engine::{Engine, EngineSpec, EngineSpecError, RenderError};
use crate::util::html::escape_html;

/// Shows any text resource as escaped, preformatted source.
pub struct SourceEngine {
    spec: EngineSpec,
}

impl SourceEngine {
    pub fn new() -> Result<Self, EngineSpecError> {
        let spec = EngineSpec::builder("source")
            .priority(50)
            .accepts("^text/")
            .mime("text/html; charset=utf-8")
            .layout(true)
            .cacheable(true)
            .description("Escaped source text")
            .build()?;
        Ok(Self { spec })
    }
}

impl Engine for SourceEngine {
    fn spec(&self) -> &EngineSpec {
        &self.spec
    }

    fn render(&self, context: &Context) -> Result<Bytes, RenderError> {
        let resource = context.resource().ok_or(RenderError::MissingResource)?;
        let html = format!(
            "<pre class=\"source\">{}</pre>",
            escape_html(&resource.text())
        );
        Ok(Bytes::from(html))
    }
}
