//! Rendering engines.
//!
//! An engine turns a resource into output bytes. Engines are registered once
//! at startup and shared by every request, so implementations keep no
//! per-invocation state: everything they need arrives through the
//! [`Context`].

pub mod builtin;
pub mod registry;

use std::fmt;

use bytes::Bytes;
use regex::Regex;
use thiserror::Error;

use crate::context::Context;
use crate::domain::Resource;

pub use registry::{EngineNotAvailable, EngineRegistry, RegistryError};

/// Priority assigned when none is declared. Lower values win.
pub const DEFAULT_PRIORITY: i32 = 99;

/// Pluggable rendering strategy.
pub trait Engine: Send + Sync {
    fn spec(&self) -> &EngineSpec;

    fn name(&self) -> &str {
        self.spec().name()
    }

    /// Whether this engine can render `resource`. The default matches the
    /// resource mime type against the declared accept pattern.
    fn accepts(&self, resource: &Resource) -> bool {
        self.spec().accepts_mime(resource.mime())
    }

    /// Produce the artifact for the context's resource.
    fn render(&self, context: &Context) -> Result<Bytes, RenderError>;
}

impl fmt::Debug for dyn Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Engine").field(self.spec()).finish()
    }
}

/// Failure raised by an engine while rendering.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("context has no resource to render")]
    MissingResource,
    #[error("{0}")]
    Failed(String),
}

impl RenderError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

#[derive(Debug, Error)]
pub enum EngineSpecError {
    #[error("engine name must not be empty")]
    EmptyName,
    #[error("invalid accept pattern `{pattern}` for engine `{engine}`: {source}")]
    InvalidPattern {
        engine: String,
        pattern: String,
        #[source]
        source: Box<regex::Error>,
    },
}

/// Declared engine metadata. Immutable once built.
#[derive(Clone)]
pub struct EngineSpec {
    name: String,
    priority: i32,
    accepts: Regex,
    mime: Option<String>,
    layout: bool,
    hidden: bool,
    cacheable: bool,
    description: String,
    plugin: String,
}

impl EngineSpec {
    pub fn builder(name: impl Into<String>) -> EngineSpecBuilder {
        EngineSpecBuilder {
            name: name.into(),
            priority: DEFAULT_PRIORITY,
            accepts: String::new(),
            mime: None,
            layout: false,
            hidden: false,
            cacheable: false,
            description: None,
            plugin: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn accept_pattern(&self) -> &str {
        self.accepts.as_str()
    }

    /// Unanchored match: `text/` accepts `text/plain` and `application/text/x`.
    pub fn accepts_mime(&self, mime: &str) -> bool {
        self.accepts.is_match(mime)
    }

    pub fn mime(&self) -> Option<&str> {
        self.mime.as_deref()
    }

    /// Output is meant to be wrapped in the page layout.
    pub fn layout(&self) -> bool {
        self.layout
    }

    /// Left out of the "view as" menu unless currently selected.
    pub fn hidden(&self) -> bool {
        self.hidden
    }

    pub fn cacheable(&self) -> bool {
        self.cacheable
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }
}

impl fmt::Debug for EngineSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineSpec")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("accepts", &self.accepts.as_str())
            .field("mime", &self.mime)
            .field("layout", &self.layout)
            .field("hidden", &self.hidden)
            .field("cacheable", &self.cacheable)
            .field("plugin", &self.plugin)
            .finish()
    }
}

pub struct EngineSpecBuilder {
    name: String,
    priority: i32,
    accepts: String,
    mime: Option<String>,
    layout: bool,
    hidden: bool,
    cacheable: bool,
    description: Option<String>,
    plugin: Option<String>,
}

impl EngineSpecBuilder {
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Regular expression matched against resource mime types. An empty
    /// pattern accepts everything.
    pub fn accepts(mut self, pattern: impl Into<String>) -> Self {
        self.accepts = pattern.into();
        self
    }

    pub fn mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    pub fn layout(mut self, layout: bool) -> Self {
        self.layout = layout;
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = cacheable;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Owning plugin. Also supplies the description when none was given.
    pub fn plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    pub fn build(self) -> Result<EngineSpec, EngineSpecError> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(EngineSpecError::EmptyName);
        }

        let accepts =
            Regex::new(&self.accepts).map_err(|source| EngineSpecError::InvalidPattern {
                engine: name.clone(),
                pattern: self.accepts.clone(),
                source: Box::new(source),
            })?;

        let plugin = self.plugin.unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string());
        let description = self
            .description
            .unwrap_or_else(|| format!("{name} engine ({plugin})"));

        Ok(EngineSpec {
            name,
            priority: self.priority,
            accepts,
            mime: self.mime,
            layout: self.layout,
            hidden: self.hidden,
            cacheable: self.cacheable,
            description,
            plugin,
        })
    }
}

type RenderFn = dyn Fn(&Context) -> Result<Bytes, RenderError> + Send + Sync;

/// Engine backed by a closure, for engines too small to deserve a type.
pub struct FnEngine {
    spec: EngineSpec,
    render: Box<RenderFn>,
}

impl FnEngine {
    pub fn new<F>(spec: EngineSpec, render: F) -> Self
    where
        F: Fn(&Context) -> Result<Bytes, RenderError> + Send + Sync + 'static,
    {
        Self {
            spec,
            render: Box::new(render),
        }
    }
}

impl Engine for FnEngine {
    fn spec(&self) -> &EngineSpec {
        &self.spec
    }

    fn render(&self, context: &Context) -> Result<Bytes, RenderError> {
        (self.render)(context)
    }
}
