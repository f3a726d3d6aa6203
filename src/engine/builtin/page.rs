//! Markdown page engine.
//!
//! Source lines of the form `{{include Some/Page}}` are replaced by the
//! embedded resource's rendering, obtained through the context's includer.
//! Everything else goes through comrak and is sanitized with ammonia.

use std::collections::HashSet;

use ammonia::Builder as AmmoniaBuilder;
use bytes::Bytes;
use comrak::{Options, markdown_to_html};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::context::Context;
use crate::engine::{Engine, EngineSpec, EngineSpecError, RenderError};

static INCLUDE_DIRECTIVE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*\{\{\s*include\s+([^\s}]+)\s*\}\}\s*$")
        .expect("include directive pattern must be valid")
});

pub struct PageEngine {
    spec: EngineSpec,
    options: Options<'static>,
    sanitizer: AmmoniaBuilder<'static>,
}

impl PageEngine {
    pub fn new() -> Result<Self, EngineSpecError> {
        let spec = EngineSpec::builder("page")
            .priority(1)
            .accepts("^text/(x-)?markdown")
            .mime("text/html; charset=utf-8")
            .layout(true)
            .cacheable(true)
            .description("Markdown rendered to HTML")
            .build()?;

        Ok(Self {
            spec,
            options: markdown_options(),
            sanitizer: sanitizer(),
        })
    }

    fn markdown(&self, source: &str) -> String {
        let html = markdown_to_html(source, &self.options);
        self.sanitizer.clean(&html).to_string()
    }
}

impl Engine for PageEngine {
    fn spec(&self) -> &EngineSpec {
        &self.spec
    }

    fn render(&self, context: &Context) -> Result<Bytes, RenderError> {
        let resource = context.resource().ok_or(RenderError::MissingResource)?;
        let text = resource.text();

        let mut html = String::new();
        let mut pending = String::new();
        for line in text.lines() {
            let embedded = INCLUDE_DIRECTIVE
                .captures(line)
                .and_then(|captures| captures.get(1))
                .and_then(|path| context.include(path.as_str()));

            match embedded {
                Some(fragment) => {
                    html.push_str(&self.markdown(&pending));
                    pending.clear();
                    html.push_str(&fragment);
                }
                None => {
                    pending.push_str(line);
                    pending.push('\n');
                }
            }
        }
        html.push_str(&self.markdown(&pending));

        Ok(Bytes::from(html))
    }
}

fn markdown_options() -> Options<'static> {
    let mut options = Options::default();

    let ext = &mut options.extension;
    ext.strikethrough = true;
    ext.tagfilter = false;
    ext.table = true;
    ext.autolink = true;
    ext.tasklist = true;
    ext.superscript = true;
    ext.footnotes = true;
    ext.description_lists = true;
    ext.front_matter_delimiter = Some("---".to_string());
    ext.alerts = true;
    ext.underline = true;
    ext.subscript = true;

    let render = &mut options.render;
    render.github_pre_lang = true;
    render.tasklist_classes = true;
    render.r#unsafe = true;
    render.escaped_char_spans = true;

    options
}

fn sanitizer() -> AmmoniaBuilder<'static> {
    let mut builder = AmmoniaBuilder::default();

    let tags: HashSet<&'static str> = HashSet::from([
        "a",
        "abbr",
        "blockquote",
        "br",
        "code",
        "dd",
        "del",
        "div",
        "dl",
        "dt",
        "em",
        "h1",
        "h2",
        "h3",
        "h4",
        "h5",
        "h6",
        "hr",
        "i",
        "img",
        "input",
        "ins",
        "kbd",
        "li",
        "ol",
        "p",
        "pre",
        "s",
        "section",
        "span",
        "strong",
        "sub",
        "sup",
        "table",
        "tbody",
        "td",
        "th",
        "thead",
        "tr",
        "u",
        "ul",
    ]);
    builder.tags(tags);

    let generic: HashSet<&'static str> =
        HashSet::from(["class", "id", "title", "lang", "dir", "role", "aria-label"]);
    builder.generic_attributes(generic);

    builder.add_tag_attributes("img", &["title", "width", "height", "alt", "loading"]);
    builder.add_tag_attributes("code", &["data-language"]);
    builder.add_tag_attributes("pre", &["lang", "data-language"]);
    builder.add_tag_attributes("th", &["align", "colspan", "rowspan", "scope"]);
    builder.add_tag_attributes("td", &["align", "colspan", "rowspan"]);
    builder.add_tag_attributes("input", &["type", "checked", "disabled"]);

    builder.add_url_schemes(["http", "https", "mailto", "tel"].iter().copied());

    builder
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::context::Includer;
    use crate::domain::Resource;

    struct EchoIncluder;

    impl Includer for EchoIncluder {
        fn include(&self, _parent: &Context, path: &str) -> String {
            format!("<aside>{path}</aside>")
        }
    }

    fn render(source: &str, includer: Option<Arc<dyn Includer>>) -> String {
        let engine = PageEngine::new().expect("page engine");
        let mut builder = Context::builder().resource(Arc::new(Resource::new(
            "Home",
            "text/markdown",
            source.to_string(),
        )));
        if let Some(includer) = includer {
            builder = builder.includer(includer);
        }
        let bytes = engine.render(&builder.build()).expect("render");
        String::from_utf8(bytes.to_vec()).expect("utf-8")
    }

    #[test]
    fn renders_markdown() {
        let html = render("# Title\n\nSome *text*.", None);
        assert!(html.contains("<h1>Title</h1>"));
        assert!(html.contains("<em>text</em>"));
    }

    #[test]
    fn strips_scripts() {
        let html = render("<script>alert(1)</script>\n\nok", None);
        assert!(!html.contains("<script"));
        assert!(html.contains("ok"));
    }

    #[test]
    fn expands_include_directives_in_place() {
        let html = render(
            "before\n\n{{include Shared/Footer}}\n\nafter",
            Some(Arc::new(EchoIncluder)),
        );
        let before = html.find("before").expect("before");
        let aside = html.find("<aside>Shared/Footer</aside>").expect("fragment");
        let after = html.find("after").expect("after");
        assert!(before < aside && aside < after);
    }

    #[test]
    fn leaves_directives_alone_without_an_includer() {
        let html = render("{{include Other}}", None);
        assert!(html.contains("{{include Other}}"));
    }

    #[test]
    fn accepts_markdown_only() {
        let engine = PageEngine::new().expect("page engine");
        assert!(engine.accepts(&Resource::new("a", "text/markdown", "")));
        assert!(engine.accepts(&Resource::new("a", "text/x-markdown", "")));
        assert!(!engine.accepts(&Resource::new("a", "text/plain", "")));
    }
}
