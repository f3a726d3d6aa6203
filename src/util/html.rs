//! Minimal HTML escaping for markup assembled outside the markdown pipeline.

use url::Url;

/// Escape text for use in element content and double-quoted attributes.
pub fn escape_html(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Absolute href of a resource under `base_path`, every path segment
/// percent-encoded.
pub fn resource_href(base_path: &str, path: &str) -> String {
    let mut url = Url::parse("http://localhost/").expect("static base url");
    if let Ok(mut segments) = url.path_segments_mut() {
        segments
            .clear()
            .extend(base_path.split('/').filter(|segment| !segment.is_empty()))
            .extend(path.split('/'));
    }
    url.path().to_string()
}

/// Capitalize every whitespace-, dash- or underscore-separated word.
pub fn titlecase(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut boundary = true;
    for ch in value.chars() {
        if ch == '_' || ch == '-' || ch.is_whitespace() {
            out.push(' ');
            boundary = true;
        } else if boundary {
            out.extend(ch.to_uppercase());
            boundary = false;
        } else {
            out.push(ch);
        }
    }
    out
}
