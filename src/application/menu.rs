//! "View as" menu: the alternative outputs offered for a resource.

use std::convert::Infallible;
use std::sync::Arc;

use serde::Serialize;
use url::form_urlencoded;

use crate::cache::{CacheFlags, menu_key};
use crate::context::RequestState;
use crate::domain::Resource;
use crate::util::html::{escape_html, resource_href, titlecase};

use super::dispatch::Dispatcher;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuEntry {
    pub name: String,
    pub label: String,
    pub href: String,
    pub selected: bool,
    /// Output is not wrapped in the layout, e.g. a raw file or a download.
    pub download: bool,
}

impl Dispatcher {
    /// Engines that can render `resource`: layout engines first, then
    /// downloads, each group sorted by label. Hidden engines are left out
    /// unless `selected`.
    pub fn menu(
        &self,
        resource: &Resource,
        selected: Option<&str>,
        request: Option<&RequestState>,
    ) -> Arc<[MenuEntry]> {
        let inner = self.inner();
        let key = menu_key(resource, selected, request.and_then(RequestState::locale));
        let flags = CacheFlags {
            bypass: request.is_some_and(RequestState::no_cache),
            deferred: true,
            nested: false,
        };

        let outcome = inner.menus.fetch_or_compute(
            &key,
            flags,
            request.map(RequestState::scope),
            |_| -> Result<Arc<[MenuEntry]>, Infallible> {
                let mut entries: Vec<_> = inner
                    .registry
                    .find_all(resource)
                    .into_iter()
                    .filter(|engine| !engine.spec().hidden() || Some(engine.name()) == selected)
                    .map(|engine| MenuEntry {
                        name: engine.name().to_string(),
                        label: titlecase(engine.name()),
                        href: output_href(&inner.base_path, resource.path(), engine.name()),
                        selected: Some(engine.name()) == selected,
                        download: !engine.spec().layout(),
                    })
                    .collect();
                entries.sort_by(|a, b| {
                    a.download
                        .cmp(&b.download)
                        .then_with(|| a.label.cmp(&b.label))
                });
                Ok(entries.into())
            },
        );

        match outcome {
            Ok((entries, _)) => entries,
            Err(never) => match never {},
        }
    }
}

fn output_href(base_path: &str, path: &str, engine: &str) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("output", engine)
        .finish();
    format!("{}?{query}", resource_href(base_path, path))
}

/// Render menu entries as an HTML list.
pub fn menu_html(entries: &[MenuEntry]) -> String {
    let mut html = String::from("<ul class=\"view-as\">");
    for entry in entries {
        let class = match (entry.selected, entry.download) {
            (_, true) => " class=\"download\"",
            (true, false) => " class=\"selected\"",
            (false, false) => "",
        };
        html.push_str(&format!(
            "<li{class}><a href=\"{}\">{}</a></li>",
            escape_html(&entry.href),
            escape_html(&entry.label)
        ));
    }
    html.push_str("</ul>");
    html
}
