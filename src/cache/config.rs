//! Render cache configuration.
//!
//! Controls the process-wide memo caches via the `[cache]` table of `folio.toml`.

use std::num::NonZeroUsize;

use serde::Deserialize;

// Default values for cache configuration
const DEFAULT_RENDER_LIMIT: usize = 500;
const DEFAULT_INCLUDE_LIMIT: usize = 500;
const DEFAULT_MENU_LIMIT: usize = 200;
const DEFAULT_MAX_INCLUDE_DEPTH: usize = 8;

/// Cache configuration from `folio.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// When false every lookup recomputes.
    pub enabled: bool,
    /// Maximum rendered resources kept in memory.
    pub render_limit: usize,
    /// Maximum embedded-resource fragments kept in memory.
    pub include_limit: usize,
    /// Maximum "view as" menus kept in memory.
    pub menu_limit: usize,
    /// Deepest nesting of embedded resources before an inline error is produced.
    pub max_include_depth: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            render_limit: DEFAULT_RENDER_LIMIT,
            include_limit: DEFAULT_INCLUDE_LIMIT,
            menu_limit: DEFAULT_MENU_LIMIT,
            max_include_depth: DEFAULT_MAX_INCLUDE_DEPTH,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            enabled: settings.enabled,
            render_limit: settings.render_limit.get(),
            include_limit: settings.include_limit.get(),
            menu_limit: settings.menu_limit.get(),
            max_include_depth: settings.max_include_depth,
        }
    }
}

impl CacheConfig {
    /// Returns the render limit as NonZeroUsize, clamping to 1 if zero.
    pub fn render_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.render_limit).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the include limit as NonZeroUsize, clamping to 1 if zero.
    pub fn include_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.include_limit).unwrap_or(NonZeroUsize::MIN)
    }

    /// Returns the menu limit as NonZeroUsize, clamping to 1 if zero.
    pub fn menu_limit_non_zero(&self) -> NonZeroUsize {
        NonZeroUsize::new(self.menu_limit).unwrap_or(NonZeroUsize::MIN)
    }
}
