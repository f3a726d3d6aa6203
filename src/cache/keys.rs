//! Cache key definitions.
//!
//! Keys are content-addressed: a SHA-256 digest over length-prefixed
//! components, so a key changes whenever the resource path, its content
//! version, the engine, the locale or the effective query parameters change.

use std::fmt;

use sha2::{Digest, Sha256};
use url::form_urlencoded;

use crate::domain::Resource;

/// Query parameters that select behavior instead of content and therefore
/// never contribute to a key.
pub const RESERVED_QUERY_KEYS: &[&str] = &["output", "no_cache", "version"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyKind {
    /// Full render of a resource.
    Render,
    /// Fragment produced by embedding a resource into another.
    Include,
    /// "View as" menu for a resource.
    Menu,
}

impl KeyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            KeyKind::Render => "render",
            KeyKind::Include => "include",
            KeyKind::Menu => "menu",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    kind: KeyKind,
    digest: String,
}

impl CacheKey {
    pub fn builder(kind: KeyKind) -> CacheKeyBuilder {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_str().as_bytes());
        CacheKeyBuilder { kind, hasher }
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.digest)
    }
}

pub struct CacheKeyBuilder {
    kind: KeyKind,
    hasher: Sha256,
}

impl CacheKeyBuilder {
    pub fn part(mut self, value: &str) -> Self {
        self.hasher.update((value.len() as u64).to_le_bytes());
        self.hasher.update(value.as_bytes());
        self
    }

    /// Absent and empty components hash differently.
    pub fn optional(mut self, value: Option<&str>) -> Self {
        match value {
            Some(value) => {
                self.hasher.update([1u8]);
                self.part(value)
            }
            None => {
                self.hasher.update([0u8]);
                self
            }
        }
    }

    pub fn finish(self) -> CacheKey {
        CacheKey {
            kind: self.kind,
            digest: hex::encode(self.hasher.finalize()),
        }
    }
}

/// Key of a full render.
pub fn render_key(
    resource: &Resource,
    engine: &str,
    locale: Option<&str>,
    query: &[(String, String)],
) -> CacheKey {
    CacheKey::builder(KeyKind::Render)
        .part(resource.path())
        .part(resource.version().cache_id())
        .part(engine)
        .optional(locale)
        .part(&canonical_query(query))
        .finish()
}

/// Key of an embedded-resource fragment.
pub fn include_key(resource: &Resource, engine: &str, locale: Option<&str>) -> CacheKey {
    CacheKey::builder(KeyKind::Include)
        .part(resource.path())
        .part(resource.version().cache_id())
        .part(engine)
        .optional(locale)
        .finish()
}

/// Key of a "view as" menu.
pub fn menu_key(resource: &Resource, selected: Option<&str>, locale: Option<&str>) -> CacheKey {
    CacheKey::builder(KeyKind::Menu)
        .part(resource.path())
        .part(resource.version().cache_id())
        .optional(selected)
        .optional(locale)
        .finish()
}

/// Decode a raw query string into pairs (`+` is a space, percent escapes are
/// resolved).
pub fn parse_query(raw: &str) -> Vec<(String, String)> {
    form_urlencoded::parse(raw.trim_start_matches('?').as_bytes())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect()
}

/// Canonical encoding of the decoded pairs: reserved keys dropped, pairs
/// sorted by key then value, re-encoded as `application/x-www-form-urlencoded`.
pub fn canonical_query(pairs: &[(String, String)]) -> String {
    let mut filtered: Vec<(&str, &str)> = pairs
        .iter()
        .filter(|(key, _)| !key.is_empty() && !RESERVED_QUERY_KEYS.contains(&key.as_str()))
        .map(|(key, value)| (key.as_str(), value.as_str()))
        .collect();
    filtered.sort_unstable();

    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(filtered)
        .finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ResourceVersion;

    fn pairs(raw: &str) -> Vec<(String, String)> {
        parse_query(raw)
    }

    fn resource() -> Resource {
        Resource::new("docs/intro", "text/markdown", "# Intro")
    }

    #[test]
    fn parameter_order_does_not_change_the_key() {
        let a = render_key(&resource(), "page", None, &pairs("b=2&a=1"));
        let b = render_key(&resource(), "page", None, &pairs("a=1&b=2"));
        assert_eq!(a, b);
    }

    #[test]
    fn percent_encoding_is_normalized() {
        assert_eq!(
            canonical_query(&pairs("q=hello%20world")),
            canonical_query(&pairs("q=hello+world"))
        );
        assert_eq!(
            canonical_query(&pairs("%71=x")),
            canonical_query(&pairs("q=x"))
        );
    }

    #[test]
    fn reserved_parameters_are_ignored() {
        let plain = canonical_query(&pairs("a=1"));
        let with_reserved = canonical_query(&pairs("output=raw&a=1&no_cache=1"));
        assert_eq!(plain, with_reserved);
    }

    #[test]
    fn repeated_keys_sort_by_value() {
        assert_eq!(canonical_query(&pairs("t=b&t=a")), "t=a&t=b");
    }

    #[test]
    fn any_component_change_changes_the_key() {
        let base = render_key(&resource(), "page", None, &pairs("a=1"));

        let other_value = render_key(&resource(), "page", None, &pairs("a=2"));
        let other_engine = render_key(&resource(), "source", None, &pairs("a=1"));
        let other_locale = render_key(&resource(), "page", Some("de"), &pairs("a=1"));
        let bumped = resource().with_version(ResourceVersion::new("next"));
        let other_version = render_key(&bumped, "page", None, &pairs("a=1"));

        for key in [other_value, other_engine, other_locale, other_version] {
            assert_ne!(base, key);
        }
    }

    #[test]
    fn include_keys_follow_the_engine() {
        let page = include_key(&resource(), "page", None);
        assert_eq!(page, include_key(&resource(), "page", None));
        assert_ne!(page, include_key(&resource(), "source", None));
        assert_ne!(page, include_key(&resource(), "page", Some("de")));
    }

    #[test]
    fn components_are_length_prefixed() {
        let a = CacheKey::builder(KeyKind::Render).part("ab").part("c").finish();
        let b = CacheKey::builder(KeyKind::Render).part("a").part("bc").finish();
        assert_ne!(a, b);
    }

    #[test]
    fn kinds_never_collide() {
        let render = CacheKey::builder(KeyKind::Render).part("x").finish();
        let menu = CacheKey::builder(KeyKind::Menu).part("x").finish();
        assert_ne!(render.digest(), menu.digest());
        assert!(render.to_string().starts_with("render:"));
    }
}
