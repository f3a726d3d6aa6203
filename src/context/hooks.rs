//! Extension points invoked around context construction and rendering.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use super::Context;

type InitializedHook = Arc<dyn Fn(&Context) + Send + Sync>;
type RenderedHook = Arc<dyn Fn(&Context, &str, &mut Bytes) + Send + Sync>;

/// Ordered callback lists, invoked synchronously in registration order.
///
/// A context tree shares one `Hooks` value; children inherit it from their
/// parent.
#[derive(Clone, Default)]
pub struct Hooks {
    initialized: Vec<InitializedHook>,
    rendered: Vec<RenderedHook>,
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called after every context construction, including subcontexts.
    pub fn on_initialized<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Context) + Send + Sync + 'static,
    {
        self.initialized.push(Arc::new(hook));
        self
    }

    /// Called once an engine produced an artifact, before it is cached.
    /// Receives the engine name and may rewrite the artifact.
    pub fn on_rendered<F>(mut self, hook: F) -> Self
    where
        F: Fn(&Context, &str, &mut Bytes) + Send + Sync + 'static,
    {
        self.rendered.push(Arc::new(hook));
        self
    }

    pub(crate) fn fire_initialized(&self, context: &Context) {
        for hook in &self.initialized {
            hook(context);
        }
    }

    pub(crate) fn fire_rendered(&self, context: &Context, engine: &str, artifact: &mut Bytes) {
        for hook in &self.rendered {
            hook(context, engine, artifact);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.initialized.is_empty() && self.rendered.is_empty()
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("initialized", &self.initialized.len())
            .field("rendered", &self.rendered.len())
            .finish()
    }
}
