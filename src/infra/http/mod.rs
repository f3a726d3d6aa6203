//! HTTP surface: every GET path is rendered through the dispatcher.
//!
//! Query parameters steer the render: `output` pins the engine, `no_cache`
//! recomputes instead of reusing cached output and `lang` selects the
//! locale. Remaining parameters reach the engine and its cache key.

mod middleware;

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    extract::{Path, RawQuery, State},
    http::{HeaderName, HeaderValue, StatusCode},
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::{
    application::{
        Dispatcher, RenderOptions, RenderOutcome,
        error::{DispatchError, HttpError},
        menu_html,
    },
    cache::parse_query,
    config::ServerSettings,
    context::RequestState,
    util::html::escape_html,
};

use super::error::InfraError;

pub use middleware::RequestContext;
use middleware::{log_responses, set_request_context};

/// Resource rendered for `/`.
pub const HOME_PATH: &str = "Home";
/// Response header reporting how the render cache served the request.
pub const CACHE_STATUS_HEADER: &str = "x-folio-cache";

const OUTPUT_PARAM: &str = "output";
const NO_CACHE_PARAM: &str = "no_cache";
const LOCALE_PARAM: &str = "lang";

#[derive(Clone)]
pub struct HttpState {
    pub dispatcher: Dispatcher,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(show_home))
        .route("/{*path}", get(show_resource))
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
        .with_state(state)
}

/// Serve `router` until ctrl-c, then drain for at most the configured grace period.
pub async fn serve(settings: &ServerSettings, router: Router) -> Result<(), InfraError> {
    let listener = tokio::net::TcpListener::bind(settings.addr).await?;
    info!(target = "folio::http", addr = %settings.addr, "listening");

    let draining = Arc::new(Notify::new());
    let notify = Arc::clone(&draining);
    let server = axum::serve(listener, router.into_make_service()).with_graceful_shutdown(
        async move {
            shutdown_signal().await;
            notify.notify_one();
        },
    );

    let grace = settings.graceful_shutdown;
    tokio::select! {
        result = server.into_future() => result?,
        _ = drain_deadline(&draining, grace) => {
            warn!(
                target = "folio::http",
                grace_secs = grace.as_secs(),
                "graceful shutdown timed out; dropping open connections"
            );
        }
    }

    info!(target = "folio::http", "server stopped");
    Ok(())
}

async fn drain_deadline(draining: &Notify, grace: Duration) {
    draining.notified().await;
    tokio::time::sleep(grace).await;
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(target = "folio::http", error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!(target = "folio::http", "shutdown requested");
}

async fn show_home(State(state): State<HttpState>, RawQuery(query): RawQuery) -> Response {
    render_response(state, HOME_PATH.to_string(), query).await
}

async fn show_resource(
    State(state): State<HttpState>,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
) -> Response {
    render_response(state, path, query).await
}

async fn render_response(state: HttpState, path: String, query: Option<String>) -> Response {
    let pairs = query.as_deref().map(parse_query).unwrap_or_default();
    let output = query_value(&pairs, OUTPUT_PARAM).map(str::to_string);
    let no_cache = query_value(&pairs, NO_CACHE_PARAM).is_some_and(is_truthy);
    let locale = query_value(&pairs, LOCALE_PARAM)
        .filter(|value| !value.is_empty())
        .map(str::to_string);

    let request = Arc::new(
        RequestState::new()
            .with_query(pairs)
            .with_no_cache(no_cache)
            .with_locale(locale),
    );

    let dispatcher = state.dispatcher;
    let rendered = tokio::task::spawn_blocking(move || render_page(&dispatcher, &path, output, request))
        .await
        .map_err(|err| DispatchError::worker(err.to_string()))
        .and_then(|result| result);

    match rendered {
        Ok(page) => page.into_response(),
        Err(err) => HttpError::from(err).into_response(),
    }
}

struct RenderedPage {
    path: String,
    outcome: RenderOutcome,
    menu: Option<String>,
}

fn render_page(
    dispatcher: &Dispatcher,
    path: &str,
    output: Option<String>,
    request: Arc<RequestState>,
) -> Result<RenderedPage, DispatchError> {
    let resource = dispatcher.store().find(path)?;

    let mut options = RenderOptions::new().request(Arc::clone(&request));
    if let Some(output) = output {
        options = options.engine(output);
    }
    let outcome = dispatcher.render(Arc::clone(&resource), options)?;

    let menu = outcome.layout.then(|| {
        let entries = dispatcher.menu(&resource, Some(&outcome.engine), Some(&request));
        menu_html(&entries)
    });

    Ok(RenderedPage {
        path: resource.path().to_string(),
        outcome,
        menu,
    })
}

impl IntoResponse for RenderedPage {
    fn into_response(self) -> Response {
        let RenderedPage {
            path,
            outcome,
            menu,
        } = self;

        let body = match menu {
            Some(menu) => Body::from(layout(&path, &menu, &outcome.artifact)),
            None => Body::from(outcome.artifact.clone()),
        };

        let mut response = Response::new(body);
        *response.status_mut() = StatusCode::OK;

        let headers = response.headers_mut();
        for (name, value) in &outcome.response {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(
                    target = "folio::http",
                    engine = %outcome.engine,
                    header = %name,
                    "dropping invalid response header"
                ),
            }
        }
        headers.insert(
            HeaderName::from_static(CACHE_STATUS_HEADER),
            HeaderValue::from_static(outcome.cache_status.as_str()),
        );

        response
    }
}

fn layout(path: &str, menu: &str, artifact: &[u8]) -> String {
    format!(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>{title}</title></head>\
         <body><nav>{menu}</nav><main>{content}</main></body></html>\n",
        title = escape_html(path),
        content = String::from_utf8_lossy(artifact),
    )
}

fn query_value<'a>(pairs: &'a [(String, String)], key: &str) -> Option<&'a str> {
    pairs
        .iter()
        .rev()
        .find(|(name, _)| name == key)
        .map(|(_, value)| value.as_str())
}

fn is_truthy(value: &str) -> bool {
    !matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}
