//! Embedded resources.
//!
//! [`Dispatcher::include`] renders another resource into the output of the
//! current one. It never fails: a missing resource becomes a "create page"
//! link and every other problem becomes an inline error span.

use std::convert::Infallible;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::cache::{CacheFlags, include_key};
use crate::context::Context;
use crate::domain::resource::normalize_path;
use crate::util::html::{escape_html, resource_href};

use super::dispatch::Dispatcher;

/// Parameter set on contexts that render an embedded resource.
pub const INCLUDED_PARAM: &str = "included";

/// Private flag raised on a context when an include below it hit the
/// recursion or depth guard.
const GUARDED_PRIVATE: &str = "include_guarded";

impl Dispatcher {
    /// Render `path` for embedding inside `parent`'s output.
    pub fn include(&self, parent: &Context, path: &str) -> String {
        let path = normalize_path(path);
        let inner = self.inner();

        let resource = match inner.store.find(&path) {
            Ok(resource) => resource,
            Err(err) if err.is_not_found() => {
                debug!(op = "include", result = "missing", path = %path, "offering page creation");
                return create_link(&inner.base_path, &path);
            }
            Err(err) => return error_span(&err.to_string()),
        };

        if parent.is_rendering(resource.path()) {
            warn!(op = "include", result = "recursive", path = %path, "recursive include");
            parent.set_private(GUARDED_PRIVATE, true);
            return error_span(&format!("Recursive include of {}", resource.path()));
        }
        if parent.depth() >= inner.max_include_depth {
            warn!(
                op = "include",
                result = "too_deep",
                path = %path,
                depth = parent.depth(),
                "include depth limit reached"
            );
            parent.set_private(GUARDED_PRIVATE, true);
            return error_span(&format!(
                "Include of {} exceeds the nesting limit of {}",
                resource.path(),
                inner.max_include_depth
            ));
        }

        let engine = match inner.registry.find_exact(&resource, resource.output(), true) {
            Ok(engine) => engine,
            Err(err) => return error_span(&err.to_string()),
        };

        let request = parent.request();
        let key = include_key(
            &resource,
            engine.name(),
            request.and_then(|request| request.locale()),
        );
        let flags = CacheFlags {
            bypass: request.is_some_and(|request| request.no_cache()),
            deferred: true,
            nested: parent.param_flag(INCLUDED_PARAM),
        };

        let outcome = inner.includes.fetch_or_compute(
            &key,
            flags,
            request.map(|request| request.scope()),
            |control| -> Result<String, Infallible> {
                if !engine.spec().cacheable() {
                    control.disable();
                }

                let child = parent
                    .subcontext()
                    .resource(Arc::clone(&resource))
                    .param(INCLUDED_PARAM, true)
                    .private(GUARDED_PRIVATE, false)
                    .includer(Arc::new(self.clone()))
                    .build();

                let fragment = match engine.render(&child) {
                    Ok(mut artifact) => {
                        inner.hooks.fire_rendered(&child, engine.name(), &mut artifact);
                        String::from_utf8_lossy(&artifact).into_owned()
                    }
                    Err(err) => {
                        warn!(
                            op = "include",
                            result = "error",
                            engine = engine.name(),
                            path = resource.path(),
                            error = %err,
                            "embedded render failed"
                        );
                        control.disable();
                        error_span(&format!(
                            "Engine {} failed to render {}: {err}",
                            engine.name(),
                            resource.path()
                        ))
                    }
                };

                // Guard spans depend on the ancestor chain, not on the resource.
                if child.private(GUARDED_PRIVATE) == Some(Value::Bool(true)) {
                    debug!(op = "include", path = resource.path(), "guarded fragment not cached");
                    control.disable();
                    parent.set_private(GUARDED_PRIVATE, true);
                }
                Ok(fragment)
            },
        );

        match outcome {
            Ok((fragment, _)) => fragment,
            Err(never) => match never {},
        }
    }
}

fn create_link(base_path: &str, path: &str) -> String {
    let href = resource_href(&format!("{base_path}/new"), path);
    format!(
        r#"<a href="{}">Create page {}</a>"#,
        escape_html(&href),
        escape_html(path)
    )
}

fn error_span(message: &str) -> String {
    format!(r#"<span class="error">{}</span>"#, escape_html(message))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bytes::Bytes;

    use super::*;
    use crate::context::RequestState;
    use crate::domain::Resource;
    use crate::engine::{Engine, EngineRegistry, EngineSpec, FnEngine, RenderError};
    use crate::infra::memory_store::MemoryResourceStore;

    /// Renders the resource text, expanding `@Path` lines through the includer.
    fn expanding_engine(calls: Arc<AtomicUsize>) -> Arc<dyn Engine> {
        let spec = EngineSpec::builder("html")
            .accepts("^text/")
            .layout(true)
            .cacheable(true)
            .build()
            .expect("valid spec");
        Arc::new(FnEngine::new(spec, move |ctx| {
            calls.fetch_add(1, Ordering::SeqCst);
            let resource = ctx.resource().ok_or(RenderError::MissingResource)?;
            let mut out = String::new();
            for line in resource.text().lines() {
                match line.strip_prefix('@') {
                    Some(path) => out.push_str(&ctx.include(path).unwrap_or_default()),
                    None => out.push_str(line),
                }
            }
            Ok(Bytes::from(out))
        }))
    }

    fn setup(pages: &[(&str, &str)]) -> (Dispatcher, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = EngineRegistry::new();
        registry.register(expanding_engine(Arc::clone(&calls)));
        let store = MemoryResourceStore::new();
        for (path, text) in pages {
            store.insert(Resource::new(*path, "text/plain", text.to_string()));
        }
        let dispatcher = Dispatcher::builder(Arc::new(registry), Arc::new(store))
            .base_path("/wiki/")
            .build();
        (dispatcher, calls)
    }

    fn root(dispatcher: &Dispatcher, path: &str) -> Context {
        let resource = dispatcher.store().find(path).expect("root resource");
        Context::builder()
            .resource(resource)
            .request(Arc::new(RequestState::new()))
            .build()
    }

    #[test]
    fn missing_resource_offers_creation() {
        let (dispatcher, _) = setup(&[("Home", "home")]);
        let html = dispatcher.include(&root(&dispatcher, "Home"), "Ghost <Page>");
        assert_eq!(
            html,
            r#"<a href="/wiki/new/Ghost%20%3CPage%3E">Create page Ghost &lt;Page&gt;</a>"#
        );
    }

    #[test]
    fn embeds_rendered_fragment() {
        let (dispatcher, _) = setup(&[("Home", "home"), ("Footer", "footer")]);
        let html = dispatcher.include(&root(&dispatcher, "Home"), "Footer");
        assert_eq!(html, "footer");
    }

    #[test]
    fn self_include_is_reported_inline() {
        let (dispatcher, _) = setup(&[("Home", "home"), ("Loop", "a\n@Loop")]);
        let html = dispatcher.include(&root(&dispatcher, "Home"), "Loop");
        assert!(html.starts_with('a'));
        assert!(html.contains(r#"<span class="error">Recursive include of Loop</span>"#));
    }

    #[test]
    fn mutual_recursion_stops() {
        let (dispatcher, _) = setup(&[("Home", "home"), ("A", "a\n@B"), ("B", "b\n@A")]);
        let html = dispatcher.include(&root(&dispatcher, "Home"), "A");
        assert_eq!(
            html,
            r#"ab<span class="error">Recursive include of A</span>"#
        );
    }

    #[test]
    fn depth_limit_is_enforced() {
        let (dispatcher, _) = setup(&[("Home", "home"), ("L", "x")]);
        let mut context = root(&dispatcher, "Home");
        for _ in 0..8 {
            context = context.subcontext().build();
        }
        let html = dispatcher.include(&context, "L");
        assert!(html.contains("nesting limit of 8"));
    }

    #[test]
    fn fragments_are_cached_per_version() {
        let (dispatcher, calls) = setup(&[("Home", "home"), ("Footer", "footer")]);

        dispatcher.include(&root(&dispatcher, "Home"), "Footer");
        dispatcher.include(&root(&dispatcher, "Home"), "Footer");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn guarded_fragments_do_not_leak_into_other_pages() {
        let pages = [
            ("Home", "home\n@A"),
            ("Other", "other\n@B"),
            ("A", "a\n@B"),
            ("B", "b\n@A"),
        ];
        let expected = r#"ba<span class="error">Recursive include of B</span>"#;

        let (dispatcher, _) = setup(&pages);
        dispatcher.include(&root(&dispatcher, "Home"), "A");
        let after_home = dispatcher.include(&root(&dispatcher, "Other"), "B");

        let (fresh, _) = setup(&pages);
        let alone = fresh.include(&root(&fresh, "Other"), "B");

        assert_eq!(alone, expected);
        assert_eq!(after_home, expected);
    }

    #[test]
    fn clean_fragments_stay_cached_beside_guarded_ones() {
        let (dispatcher, calls) = setup(&[
            ("Home", "home"),
            ("Wrap", "w\n@Footer\n@Wrap"),
            ("Footer", "footer"),
        ]);

        let first = dispatcher.include(&root(&dispatcher, "Home"), "Wrap");
        let second = dispatcher.include(&root(&dispatcher, "Home"), "Wrap");

        assert_eq!(first, second);
        // Wrap renders twice, Footer once.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn preferred_output_selects_the_embedding_engine() {
        let calls = Arc::new(AtomicUsize::new(0));
        let shout_spec = EngineSpec::builder("shout")
            .priority(500)
            .accepts("^text/")
            .layout(true)
            .cacheable(true)
            .build()
            .expect("valid spec");
        let shout: Arc<dyn Engine> = Arc::new(FnEngine::new(shout_spec, |ctx| {
            let resource = ctx.resource().ok_or(RenderError::MissingResource)?;
            Ok(Bytes::from(resource.text().to_uppercase()))
        }));
        let mut registry = EngineRegistry::new();
        registry.register(expanding_engine(Arc::clone(&calls)));
        registry.register(shout);

        let store = MemoryResourceStore::new();
        store.insert(Resource::new("Home", "text/plain", "home"));
        store.insert(Resource::new("Plain", "text/plain", "quiet"));
        store.insert(Resource::new("Loud", "text/plain", "quiet").with_output("shout"));
        store.insert(Resource::new("Odd", "text/plain", "x").with_output("pdf"));
        let dispatcher = Dispatcher::builder(Arc::new(registry), Arc::new(store)).build();

        let home = root(&dispatcher, "Home");
        assert_eq!(dispatcher.include(&home, "Plain"), "quiet");
        assert_eq!(dispatcher.include(&home, "Loud"), "QUIET");
        assert!(dispatcher.include(&home, "Odd").contains("pdf"));
    }

    #[test]
    fn no_engine_is_an_inline_error() {
        let (dispatcher, _) = setup(&[("Home", "home")]);
        let ctx = Context::builder().build();
        let store = MemoryResourceStore::new();
        store.insert(Resource::new("Logo", "image/png", vec![0u8]));
        let other = Dispatcher::builder(Arc::clone(dispatcher.registry()), Arc::new(store)).build();

        let html = other.include(&ctx, "Logo");
        assert!(html.starts_with(r#"<span class="error">engine (any) is not available"#));
    }
}
