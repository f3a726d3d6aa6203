//! Execution context handed to engines.
//!
//! A context holds the resource being rendered, request parameters, private
//! scratch values and the response metadata map. Engines that render other
//! resources derive a subcontext, which inherits parameters and scratch
//! values by copy and shares the response map by reference, so headers set
//! deep inside a nested render still reach the outermost caller.

mod hooks;
mod response;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};

use serde_json::Value;
use uuid::Uuid;

use crate::cache::RequestScope;
use crate::cache::lock::mutex_lock;
use crate::domain::Resource;

pub use hooks::Hooks;
pub use response::{CONTENT_DISPOSITION, CONTENT_TYPE, ResponseMeta};

const SOURCE: &str = "context";

/// Key/value bag used for parameters and private scratch values.
pub type Vars = BTreeMap<String, Value>;

/// Renders an embedded resource on behalf of an engine.
///
/// Implementations must never fail: problems are reported as inline markup.
pub trait Includer: Send + Sync {
    fn include(&self, parent: &Context, path: &str) -> String;
}

/// State scoped to one inbound request, shared by every render it triggers.
#[derive(Debug)]
pub struct RequestState {
    id: Uuid,
    query: Vec<(String, String)>,
    no_cache: bool,
    locale: Option<String>,
    scope: RequestScope,
}

impl RequestState {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            query: Vec::new(),
            no_cache: false,
            locale: None,
            scope: RequestScope::new(),
        }
    }

    /// Raw query pairs as received; canonicalised when building cache keys.
    pub fn with_query(mut self, query: Vec<(String, String)>) -> Self {
        self.query = query;
        self
    }

    /// Force recomputation of every cached value touched by this request.
    pub fn with_no_cache(mut self, no_cache: bool) -> Self {
        self.no_cache = no_cache;
        self
    }

    pub fn with_locale(mut self, locale: Option<String>) -> Self {
        self.locale = locale.filter(|value| !value.trim().is_empty());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    pub fn no_cache(&self) -> bool {
        self.no_cache
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    pub fn scope(&self) -> &RequestScope {
        &self.scope
    }
}

impl Default for RequestState {
    fn default() -> Self {
        Self::new()
    }
}

/// Request-scoped state for one engine invocation.
///
/// Cheap to clone: clones refer to the same context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    resource: Option<Arc<Resource>>,
    parent: Option<Context>,
    private: Mutex<Vars>,
    params: Vars,
    request: Option<Arc<RequestState>>,
    response: ResponseMeta,
    hooks: Arc<Hooks>,
    includer: Option<Arc<dyn Includer>>,
    depth: usize,
}

impl Context {
    /// Start building a top-level context.
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// Start building a context derived from this one.
    pub fn subcontext(&self) -> ContextBuilder {
        ContextBuilder {
            parent: Some(self.clone()),
            ..ContextBuilder::default()
        }
    }

    pub fn resource(&self) -> Option<&Arc<Resource>> {
        self.inner.resource.as_ref()
    }

    pub fn parent(&self) -> Option<&Context> {
        self.inner.parent.as_ref()
    }

    pub fn params(&self) -> &Vars {
        &self.inner.params
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.inner.params.get(key)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.param(key).and_then(Value::as_str)
    }

    /// Truthy check used for flags such as `included`.
    pub fn param_flag(&self, key: &str) -> bool {
        match self.param(key) {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::String(value)) => matches!(value.as_str(), "1" | "true" | "yes" | "on"),
            Some(Value::Number(number)) => number.as_i64().is_some_and(|n| n != 0),
            _ => false,
        }
    }

    pub fn private(&self, key: &str) -> Option<Value> {
        mutex_lock(&self.inner.private, SOURCE, "private")
            .get(key)
            .cloned()
    }

    /// Write a scratch value into this context's own copy.
    pub fn set_private(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        mutex_lock(&self.inner.private, SOURCE, "set_private").insert(key.into(), value.into())
    }

    pub fn private_snapshot(&self) -> Vars {
        mutex_lock(&self.inner.private, SOURCE, "private_snapshot").clone()
    }

    pub fn response(&self) -> &ResponseMeta {
        &self.inner.response
    }

    pub fn request(&self) -> Option<&Arc<RequestState>> {
        self.inner.request.as_ref()
    }

    pub fn hooks(&self) -> &Arc<Hooks> {
        &self.inner.hooks
    }

    pub fn includer(&self) -> Option<&Arc<dyn Includer>> {
        self.inner.includer.as_ref()
    }

    /// Render `path` through the inherited includer. `None` when the context
    /// was built without one.
    pub fn include(&self, path: &str) -> Option<String> {
        self.includer()
            .map(|includer| includer.include(self, path))
    }

    /// Number of ancestors; top-level contexts have depth 0.
    pub fn depth(&self) -> usize {
        self.inner.depth
    }

    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors {
            next: self.parent(),
        }
    }

    /// True when this context or one of its ancestors renders `path`.
    pub fn is_rendering(&self, path: &str) -> bool {
        std::iter::once(self)
            .chain(self.ancestors())
            .filter_map(Context::resource)
            .any(|resource| resource.path() == path)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("resource", &self.resource().map(|r| r.path().to_string()))
            .field("depth", &self.inner.depth)
            .field("params", &self.inner.params)
            .field("has_request", &self.inner.request.is_some())
            .finish_non_exhaustive()
    }
}

pub struct Ancestors<'a> {
    next: Option<&'a Context>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a Context;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.parent();
        Some(current)
    }
}

/// Collects overrides for a new context.
///
/// With a parent, unset fields are inherited: parameters and scratch values
/// are merged over copies of the parent's, and the response map is always the
/// parent's. Without a parent a fresh response map is allocated unless one is
/// supplied.
#[derive(Default)]
pub struct ContextBuilder {
    resource: Option<Arc<Resource>>,
    parent: Option<Context>,
    params: Vars,
    private: Vars,
    request: Option<Arc<RequestState>>,
    response: Option<ResponseMeta>,
    hooks: Option<Arc<Hooks>>,
    includer: Option<Arc<dyn Includer>>,
}

impl ContextBuilder {
    pub fn resource(mut self, resource: Arc<Resource>) -> Self {
        self.resource = Some(resource);
        self
    }

    pub fn parent(mut self, parent: &Context) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn params(mut self, params: Vars) -> Self {
        self.params.extend(params);
        self
    }

    pub fn private(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.private.insert(key.into(), value.into());
        self
    }

    pub fn request(mut self, request: Arc<RequestState>) -> Self {
        self.request = Some(request);
        self
    }

    /// Response map for a top-level context. Ignored when a parent is set.
    pub fn response(mut self, response: ResponseMeta) -> Self {
        self.response = Some(response);
        self
    }

    pub fn hooks(mut self, hooks: Arc<Hooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    pub fn includer(mut self, includer: Arc<dyn Includer>) -> Self {
        self.includer = Some(includer);
        self
    }

    pub fn build(self) -> Context {
        let ContextBuilder {
            resource,
            parent,
            params,
            private,
            request,
            response,
            hooks,
            includer,
        } = self;

        let context = match parent {
            Some(parent) => {
                let mut merged_params = parent.params().clone();
                merged_params.extend(params);
                let mut merged_private = parent.private_snapshot();
                merged_private.extend(private);

                ContextInner {
                    resource: resource.or_else(|| parent.resource().cloned()),
                    private: Mutex::new(merged_private),
                    params: merged_params,
                    request: request.or_else(|| parent.request().cloned()),
                    response: parent.response().clone(),
                    hooks: hooks.unwrap_or_else(|| Arc::clone(parent.hooks())),
                    includer: includer.or_else(|| parent.includer().cloned()),
                    depth: parent.depth() + 1,
                    parent: Some(parent),
                }
            }
            None => ContextInner {
                resource,
                parent: None,
                private: Mutex::new(private),
                params,
                request,
                response: response.unwrap_or_default(),
                hooks: hooks.unwrap_or_default(),
                includer,
                depth: 0,
            },
        };

        let context = Context {
            inner: Arc::new(context),
        };
        context.hooks().fire_initialized(&context);
        context
    }
}
