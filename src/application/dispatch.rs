//! Cached dispatch: resolve an engine, build the cache key, render on miss.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use metrics::histogram;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::application::error::DispatchError;
use crate::cache::{CacheConfig, CacheFlags, CacheStatus, MemoCache, render_key};
use crate::context::{CONTENT_TYPE, Context, Hooks, Includer, RequestState, Vars};
use crate::domain::{Resource, ResourceStore};
use crate::engine::{Engine, EngineRegistry};

use super::menu::MenuEntry;

const METRIC_RENDER_MS: &str = "folio_render_ms";

/// Value stored per render key.
#[derive(Debug, Clone)]
pub struct CachedRender {
    pub engine: String,
    pub layout: bool,
    pub response: BTreeMap<String, String>,
    pub artifact: Bytes,
}

/// Result of [`Dispatcher::render`].
#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub engine: String,
    /// The caller should wrap `artifact` in the page layout.
    pub layout: bool,
    /// Response headers to merge into the outgoing response.
    pub response: BTreeMap<String, String>,
    pub artifact: Bytes,
    pub cache_status: CacheStatus,
}

impl RenderOutcome {
    pub fn content_type(&self) -> Option<&str> {
        self.response.get(CONTENT_TYPE).map(String::as_str)
    }
}

/// Per-call render options.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    engine: Option<String>,
    params: Vars,
    request: Option<Arc<RequestState>>,
    deferred: bool,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            engine: None,
            params: Vars::new(),
            request: None,
            deferred: true,
        }
    }
}

impl RenderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pin the render to one engine name. Blank names are ignored.
    pub fn engine(mut self, engine: impl Into<String>) -> Self {
        let engine = engine.into();
        self.engine = (!engine.trim().is_empty()).then_some(engine);
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

    /// Request the render belongs to. A fresh request is used when unset.
    pub fn request(mut self, request: Arc<RequestState>) -> Self {
        self.request = Some(request);
        self
    }

    /// Reuse values already produced earlier in the same request. On by
    /// default.
    pub fn deferred(mut self, deferred: bool) -> Self {
        self.deferred = deferred;
        self
    }
}

/// Renders resources through the engine registry behind the render caches.
///
/// Cheap to clone; clones share registry, store and caches.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

pub(super) struct DispatcherInner {
    pub(super) registry: Arc<EngineRegistry>,
    pub(super) store: Arc<dyn ResourceStore>,
    pub(super) renders: MemoCache<CachedRender>,
    pub(super) includes: MemoCache<String>,
    pub(super) menus: MemoCache<Arc<[MenuEntry]>>,
    pub(super) hooks: Arc<Hooks>,
    pub(super) max_include_depth: usize,
    pub(super) base_path: String,
}

pub struct DispatcherBuilder {
    registry: Arc<EngineRegistry>,
    store: Arc<dyn ResourceStore>,
    cache: CacheConfig,
    hooks: Hooks,
    base_path: String,
}

impl DispatcherBuilder {
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn hooks(mut self, hooks: Hooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// URL prefix for generated links, e.g. `/wiki`.
    pub fn base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into().trim_end_matches('/').to_string();
        self
    }

    pub fn build(self) -> Dispatcher {
        let cache = self.cache;
        Dispatcher {
            inner: Arc::new(DispatcherInner {
                registry: self.registry,
                store: self.store,
                renders: MemoCache::new("render", cache.render_limit_non_zero(), cache.enabled),
                includes: MemoCache::new("include", cache.include_limit_non_zero(), cache.enabled),
                menus: MemoCache::new("menu", cache.menu_limit_non_zero(), cache.enabled),
                hooks: Arc::new(self.hooks),
                max_include_depth: cache.max_include_depth,
                base_path: self.base_path,
            }),
        }
    }
}

impl Dispatcher {
    pub fn builder(registry: Arc<EngineRegistry>, store: Arc<dyn ResourceStore>) -> DispatcherBuilder {
        DispatcherBuilder {
            registry,
            store,
            cache: CacheConfig::default(),
            hooks: Hooks::default(),
            base_path: String::new(),
        }
    }

    pub(super) fn inner(&self) -> &DispatcherInner {
        &self.inner
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.inner.registry
    }

    pub fn store(&self) -> &Arc<dyn ResourceStore> {
        &self.inner.store
    }

    pub fn base_path(&self) -> &str {
        &self.inner.base_path
    }

    /// Number of full renders currently cached.
    pub fn cached_renders(&self) -> usize {
        self.inner.renders.len()
    }

    /// Look up `path` in the resource store and render it.
    pub fn render_path(
        &self,
        path: &str,
        options: RenderOptions,
    ) -> Result<RenderOutcome, DispatchError> {
        let resource = self.inner.store.find(path)?;
        self.render(resource, options)
    }

    /// Render `resource`, computing at most once per cache key.
    ///
    /// The engine is the one named in `options`, else the resource's
    /// preferred output, else the best accepting engine. A named engine that
    /// cannot render the resource is an error, never silently replaced.
    #[instrument(skip_all, fields(path = %resource.path()))]
    pub fn render(
        &self,
        resource: Arc<Resource>,
        options: RenderOptions,
    ) -> Result<RenderOutcome, DispatchError> {
        let RenderOptions {
            engine: requested,
            params,
            request,
            deferred,
        } = options;
        let request = request.unwrap_or_default();

        let requested = requested.as_deref().or(resource.output());
        let engine = self.inner.registry.find_exact(&resource, requested, false)?;

        let params = effective_params(&request, params);
        let key_params: Vec<(String, String)> = params
            .iter()
            .map(|(name, value)| (name.clone(), param_text(value)))
            .collect();
        let key = render_key(&resource, engine.name(), request.locale(), &key_params);

        let flags = CacheFlags {
            bypass: request.no_cache(),
            deferred,
            nested: false,
        };

        let (cached, cache_status) = self.inner.renders.fetch_or_compute(
            &key,
            flags,
            Some(request.scope()),
            |control| {
                if !engine.spec().cacheable() {
                    control.disable();
                }
                self.execute(&engine, &resource, params, &request)
            },
        )?;

        debug!(
            op = "render",
            engine = %cached.engine,
            cache = cache_status.as_str(),
            %key,
            "render dispatched"
        );

        Ok(RenderOutcome {
            engine: cached.engine,
            layout: cached.layout,
            response: cached.response,
            artifact: cached.artifact,
            cache_status,
        })
    }

    fn execute(
        &self,
        engine: &Arc<dyn Engine>,
        resource: &Arc<Resource>,
        params: Vars,
        request: &Arc<RequestState>,
    ) -> Result<CachedRender, DispatchError> {
        let started = Instant::now();
        let spec = engine.spec();

        let context = Context::builder()
            .resource(Arc::clone(resource))
            .params(params)
            .request(Arc::clone(request))
            .hooks(Arc::clone(&self.inner.hooks))
            .includer(Arc::new(self.clone()))
            .build();

        let mut artifact = engine.render(&context).map_err(|err| {
            warn!(
                op = "render",
                result = "error",
                engine = spec.name(),
                path = resource.path(),
                error = %err,
                "engine failed"
            );
            DispatchError::engine(spec.name(), resource.path(), err)
        })?;
        self.inner
            .hooks
            .fire_rendered(&context, spec.name(), &mut artifact);

        let response = context.response();
        if let Some(mime) = spec.mime() {
            response.set_default(CONTENT_TYPE, mime);
        }
        if !spec.layout() {
            response.set_default(CONTENT_TYPE, resource.mime());
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        histogram!(METRIC_RENDER_MS, "engine" => spec.name().to_string()).record(elapsed_ms);
        debug!(
            op = "render",
            result = "ok",
            engine = spec.name(),
            path = resource.path(),
            bytes = artifact.len(),
            elapsed_ms,
            "engine finished"
        );

        Ok(CachedRender {
            engine: spec.name().to_string(),
            layout: spec.layout(),
            response: response.snapshot(),
            artifact,
        })
    }
}

impl Includer for Dispatcher {
    fn include(&self, parent: &Context, path: &str) -> String {
        Dispatcher::include(self, parent, path)
    }
}

/// Parameters the engine sees: query pairs (the last of a repeated name
/// wins), overridden by explicit render params. The render key is built from
/// the same map.
fn effective_params(request: &RequestState, params: Vars) -> Vars {
    let mut merged: Vars = request
        .query()
        .iter()
        .map(|(name, value)| (name.clone(), Value::String(value.clone())))
        .collect();
    merged.extend(params);
    merged
}

fn param_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::cache::parse_query;
    use crate::engine::{EngineSpec, FnEngine, RenderError};
    use crate::infra::memory_store::MemoryResourceStore;

    fn counting_engine(
        name: &str,
        priority: i32,
        cacheable: bool,
        calls: Arc<AtomicUsize>,
    ) -> Arc<dyn Engine> {
        let spec = EngineSpec::builder(name)
            .priority(priority)
            .accepts("^text/")
            .mime("text/html")
            .layout(true)
            .cacheable(cacheable)
            .build()
            .expect("valid spec");
        let label = name.to_string();
        Arc::new(FnEngine::new(spec, move |ctx| {
            let count = calls.fetch_add(1, Ordering::SeqCst) + 1;
            let path = ctx.resource().map(|r| r.path().to_string()).unwrap_or_default();
            Ok(Bytes::from(format!("{label}:{path}:{count}")))
        }))
    }

    fn dispatcher(engines: Vec<Arc<dyn Engine>>) -> Dispatcher {
        let mut registry = EngineRegistry::new();
        registry.register_all(engines);
        let store = MemoryResourceStore::new();
        store.insert(Resource::new("Home", "text/markdown", "# Home"));
        store.insert(Resource::new("Notes", "text/plain", "notes").with_output("plain"));
        Dispatcher::builder(Arc::new(registry), Arc::new(store)).build()
    }

    fn text(outcome: &RenderOutcome) -> &str {
        std::str::from_utf8(&outcome.artifact).expect("utf-8")
    }

    #[test]
    fn non_cacheable_renders_skip_the_request_scope() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher(vec![counting_engine("html", 1, false, Arc::clone(&calls))]);
        let request = Arc::new(RequestState::new().with_no_cache(true));

        let first = dispatcher
            .render_path("Home", RenderOptions::new().request(Arc::clone(&request)))
            .expect("first render");
        let second = dispatcher
            .render_path("Home", RenderOptions::new().request(Arc::clone(&request)))
            .expect("second render");

        assert_eq!(text(&first), "html:Home:1");
        assert_eq!(text(&second), "html:Home:2");
        assert_eq!(second.cache_status, CacheStatus::Bypass);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn cacheable_deferred_render_is_reused_within_a_request_under_no_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher(vec![counting_engine("html", 1, true, Arc::clone(&calls))]);
        let request = Arc::new(RequestState::new().with_no_cache(true));

        let first = dispatcher
            .render_path("Home", RenderOptions::new().request(Arc::clone(&request)))
            .expect("first render");
        let second = dispatcher
            .render_path("Home", RenderOptions::new().request(Arc::clone(&request)))
            .expect("second render");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(first.cache_status, CacheStatus::Bypass);
        assert_eq!(second.cache_status, CacheStatus::Deferred);
        assert_eq!(text(&first), text(&second));
    }

    #[test]
    fn cacheable_renders_hit_across_requests() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher(vec![counting_engine("html", 1, true, Arc::clone(&calls))]);

        let first = dispatcher.render_path("Home", RenderOptions::new()).expect("render");
        let second = dispatcher.render_path("Home", RenderOptions::new()).expect("render");

        assert_eq!(first.cache_status, CacheStatus::Miss);
        assert_eq!(second.cache_status, CacheStatus::Hit);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.cached_renders(), 1);
    }

    #[test]
    fn non_cacheable_engines_recompute_every_time() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher(vec![counting_engine("html", 1, false, Arc::clone(&calls))]);

        let first = dispatcher.render_path("Home", RenderOptions::new()).expect("render");
        let second = dispatcher.render_path("Home", RenderOptions::new()).expect("render");

        assert_eq!(text(&first), "html:Home:1");
        assert_eq!(text(&second), "html:Home:2");
        assert_eq!(first.engine, "html");
        assert!(first.layout);
        assert_eq!(dispatcher.cached_renders(), 0);
    }

    #[test]
    fn query_order_does_not_split_the_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher(vec![counting_engine("html", 1, true, Arc::clone(&calls))]);

        for raw in ["a=1&b=2", "b=2&a=1", "b=2&output=html&a=1"] {
            let request = Arc::new(RequestState::new().with_query(parse_query(raw)));
            dispatcher
                .render_path("Home", RenderOptions::new().request(request))
                .expect("render");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let request = Arc::new(RequestState::new().with_query(parse_query("a=2&b=2")));
        dispatcher
            .render_path("Home", RenderOptions::new().request(request))
            .expect("render");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn explicit_engine_must_accept_the_resource() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher(vec![counting_engine("html", 1, true, calls)]);

        let err = dispatcher
            .render_path("Home", RenderOptions::new().engine("pdf"))
            .expect_err("pdf is unknown");
        match err {
            DispatchError::EngineNotAvailable(inner) => {
                assert_eq!(inner.engine.as_deref(), Some("pdf"));
                assert_eq!(inner.path, "Home");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn preferred_output_attribute_is_strict() {
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher(vec![counting_engine("html", 1, true, calls)]);

        let err = dispatcher
            .render_path("Notes", RenderOptions::new())
            .expect_err("resource prefers an unregistered engine");
        assert!(matches!(
            err,
            DispatchError::EngineNotAvailable(ref inner) if inner.engine.as_deref() == Some("plain")
        ));

        let outcome = dispatcher
            .render_path("Notes", RenderOptions::new().engine("html"))
            .expect("explicit engine wins over the attribute");
        assert_eq!(outcome.engine, "html");
    }

    #[test]
    fn missing_resource_passes_through() {
        let dispatcher = dispatcher(Vec::new());
        let err = dispatcher
            .render_path("Nope", RenderOptions::new())
            .expect_err("missing");
        assert!(err.is_not_found());
    }

    #[test]
    fn content_type_defaults_follow_engine_then_resource() {
        let raw_spec = EngineSpec::builder("raw")
            .priority(5)
            .accepts(".*")
            .build()
            .expect("valid spec");
        let raw: Arc<dyn Engine> = Arc::new(FnEngine::new(raw_spec, |ctx| {
            Ok(ctx.resource().map(|r| r.content().clone()).unwrap_or_default())
        }));
        let calls = Arc::new(AtomicUsize::new(0));
        let dispatcher = dispatcher(vec![counting_engine("html", 1, true, calls), raw]);

        let html = dispatcher.render_path("Home", RenderOptions::new()).expect("html");
        assert_eq!(html.content_type(), Some("text/html"));

        let raw = dispatcher
            .render_path("Home", RenderOptions::new().engine("raw"))
            .expect("raw");
        assert_eq!(raw.content_type(), Some("text/markdown"));
        assert!(!raw.layout);
    }

    #[test]
    fn engine_headers_survive_the_cache() {
        let spec = EngineSpec::builder("svg")
            .accepts("^text/")
            .cacheable(true)
            .layout(true)
            .build()
            .expect("valid spec");
        let svg: Arc<dyn Engine> = Arc::new(FnEngine::new(spec, |ctx| {
            ctx.response().set("Content-Type", "image/svg+xml");
            ctx.response().set("X-Engine", "svg");
            Ok(Bytes::from_static(b"<svg/>"))
        }));
        let dispatcher = dispatcher(vec![svg]);

        dispatcher.render_path("Home", RenderOptions::new()).expect("miss");
        let hit = dispatcher.render_path("Home", RenderOptions::new()).expect("hit");

        assert_eq!(hit.cache_status, CacheStatus::Hit);
        assert_eq!(hit.content_type(), Some("image/svg+xml"));
        assert_eq!(hit.response.get("x-engine").map(String::as_str), Some("svg"));
    }

    #[test]
    fn engine_failures_are_reported_and_not_cached() {
        let spec = EngineSpec::builder("broken")
            .accepts(".*")
            .cacheable(true)
            .build()
            .expect("valid spec");
        let broken: Arc<dyn Engine> =
            Arc::new(FnEngine::new(spec, |_| Err(RenderError::failed("boom"))));
        let dispatcher = dispatcher(vec![broken]);

        let err = dispatcher
            .render_path("Home", RenderOptions::new())
            .expect_err("engine fails");
        assert!(matches!(err, DispatchError::Engine { ref engine, .. } if engine == "broken"));
        assert_eq!(dispatcher.cached_renders(), 0);
    }

    #[test]
    fn rendered_hooks_may_rewrite_artifacts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = EngineRegistry::new();
        registry.register(counting_engine("html", 1, true, calls));
        let store = MemoryResourceStore::new();
        store.insert(Resource::new("Home", "text/markdown", "# Home"));

        let hooks = Hooks::new().on_rendered(|_, engine, artifact| {
            let mut rewritten = artifact.to_vec();
            rewritten.extend_from_slice(format!("|{engine}").as_bytes());
            *artifact = Bytes::from(rewritten);
        });
        let dispatcher = Dispatcher::builder(Arc::new(registry), Arc::new(store))
            .hooks(hooks)
            .build();

        let outcome = dispatcher.render_path("Home", RenderOptions::new()).expect("render");
        assert_eq!(text(&outcome), "html:Home:1|html");
    }

    #[test]
    fn params_reach_the_engine_and_the_key() {
        let spec = EngineSpec::builder("echo")
            .accepts(".*")
            .cacheable(true)
            .layout(true)
            .build()
            .expect("valid spec");
        let echo: Arc<dyn Engine> = Arc::new(FnEngine::new(spec, |ctx| {
            let mode = ctx.param_str("mode").unwrap_or("none").to_string();
            Ok(Bytes::from(mode))
        }));
        let dispatcher = dispatcher(vec![echo]);

        let light = dispatcher
            .render_path("Home", RenderOptions::new().param("mode", "light"))
            .expect("light");
        let dark = dispatcher
            .render_path("Home", RenderOptions::new().param("mode", "dark"))
            .expect("dark");

        assert_eq!(text(&light), "light");
        assert_eq!(text(&dark), "dark");
    }

    fn echo_t() -> Arc<dyn Engine> {
        let spec = EngineSpec::builder("echo")
            .accepts(".*")
            .cacheable(true)
            .layout(true)
            .build()
            .expect("valid spec");
        Arc::new(FnEngine::new(spec, |ctx| {
            Ok(Bytes::from(ctx.param_str("t").unwrap_or("none").to_string()))
        }))
    }

    #[test]
    fn repeated_query_names_key_on_the_value_the_engine_sees() {
        let dispatcher = dispatcher(vec![echo_t()]);
        let render = |raw: &str| {
            let request = Arc::new(RequestState::new().with_query(parse_query(raw)));
            dispatcher
                .render_path("Home", RenderOptions::new().request(request))
                .expect("render")
        };

        let first = render("t=a&t=b");
        let second = render("t=b&t=a");

        assert_eq!(text(&first), "b");
        assert_eq!(text(&second), "a");
        assert_eq!(second.cache_status, CacheStatus::Miss);
    }

    #[test]
    fn explicit_params_override_the_query_in_the_key() {
        let dispatcher = dispatcher(vec![echo_t()]);
        let render = |raw: &str, value: &str| {
            let request = Arc::new(RequestState::new().with_query(parse_query(raw)));
            dispatcher
                .render_path("Home", RenderOptions::new().request(request).param("t", value))
                .expect("render")
        };

        let first = render("t=1", "2");
        let second = render("t=2", "1");
        let third = render("t=3", "1");

        assert_eq!(text(&first), "2");
        assert_eq!(text(&second), "1");
        assert_eq!(second.cache_status, CacheStatus::Miss);
        assert_eq!(third.cache_status, CacheStatus::Hit);
    }
}
