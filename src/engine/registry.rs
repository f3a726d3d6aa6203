//! Engine registry and selection.
//!
//! Engines are grouped by name. Several engines may share a name and compete
//! on acceptance, e.g. two `html` engines for different source formats.
//! Selection has two tiers:
//!
//! - [`EngineRegistry::find_all`] picks the best variant per name, used to
//!   offer alternative outputs;
//! - [`EngineRegistry::find_exact`] picks the single best engine for an
//!   actual render.
//!
//! Lower priority wins; equal priorities fall back to registration order.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::{debug, info};

use super::Engine;
use crate::domain::Resource;

static GLOBAL: OnceCell<Arc<EngineRegistry>> = OnceCell::new();

/// No registered engine satisfies a selection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("engine {} is not available for `{path}` of type {mime}", describe(.engine))]
pub struct EngineNotAvailable {
    pub engine: Option<String>,
    pub path: String,
    pub mime: String,
}

impl EngineNotAvailable {
    pub fn new(engine: Option<&str>, resource: &Resource) -> Self {
        Self {
            engine: engine.map(str::to_string),
            path: resource.path().to_string(),
            mime: resource.mime().to_string(),
        }
    }
}

fn describe(engine: &Option<String>) -> String {
    match engine {
        Some(name) => format!("`{name}`"),
        None => "(any)".to_string(),
    }
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("the process-wide engine registry is already installed")]
    AlreadyInstalled,
}

struct Registered {
    engine: Arc<dyn Engine>,
    sequence: u64,
}

impl Registered {
    fn rank(&self) -> (i32, u64) {
        (self.engine.spec().priority(), self.sequence)
    }
}

/// Engines grouped by name, in the order names were first registered.
#[derive(Default)]
pub struct EngineRegistry {
    groups: Vec<(String, Vec<Registered>)>,
    index: HashMap<String, usize>,
    next_sequence: u64,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `engine` to its name group.
    pub fn register(&mut self, engine: Arc<dyn Engine>) {
        let name = engine.name().to_string();
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        debug!(
            target = "folio::engine::registry",
            engine = %name,
            priority = engine.spec().priority(),
            accepts = engine.spec().accept_pattern(),
            "engine registered"
        );

        let slot = match self.index.get(&name) {
            Some(slot) => *slot,
            None => {
                self.groups.push((name.clone(), Vec::new()));
                self.index.insert(name, self.groups.len() - 1);
                self.groups.len() - 1
            }
        };
        self.groups[slot].1.push(Registered { engine, sequence });
    }

    pub fn register_all<I>(&mut self, engines: I)
    where
        I: IntoIterator<Item = Arc<dyn Engine>>,
    {
        for engine in engines {
            self.register(engine);
        }
    }

    /// Best accepting engine of every name group. Groups without an
    /// accepting engine are omitted.
    pub fn find_all(&self, resource: &Resource) -> Vec<Arc<dyn Engine>> {
        self.groups
            .iter()
            .filter_map(|(_, group)| best(group.iter(), resource, false))
            .collect()
    }

    /// Best engine for `resource`, optionally restricted to the group `name`
    /// and to layout-capable engines.
    pub fn find_exact(
        &self,
        resource: &Resource,
        name: Option<&str>,
        require_layout: bool,
    ) -> Result<Arc<dyn Engine>, EngineNotAvailable> {
        let found = match name {
            Some(name) => self
                .group(name)
                .and_then(|group| best(group.iter(), resource, require_layout)),
            None => best(
                self.groups.iter().flat_map(|(_, group)| group.iter()),
                resource,
                require_layout,
            ),
        };

        found.ok_or_else(|| EngineNotAvailable::new(name, resource))
    }

    /// Non-failing counterpart of [`find_exact`](Self::find_exact).
    pub fn find(
        &self,
        resource: &Resource,
        name: Option<&str>,
        require_layout: bool,
    ) -> Option<Arc<dyn Engine>> {
        self.find_exact(resource, name, require_layout).ok()
    }

    /// Engines registered under `name`, in registration order.
    pub fn get(&self, name: &str) -> Vec<Arc<dyn Engine>> {
        self.group(name)
            .map(|group| group.iter().map(|entry| Arc::clone(&entry.engine)).collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(name, _)| name.as_str())
    }

    /// Total number of registered engines.
    pub fn len(&self) -> usize {
        self.groups.iter().map(|(_, group)| group.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    fn group(&self, name: &str) -> Option<&[Registered]> {
        self.index
            .get(name)
            .map(|slot| self.groups[*slot].1.as_slice())
    }
}

fn best<'a>(
    candidates: impl Iterator<Item = &'a Registered>,
    resource: &Resource,
    require_layout: bool,
) -> Option<Arc<dyn Engine>> {
    candidates
        .filter(|entry| entry.engine.accepts(resource))
        .filter(|entry| !require_layout || entry.engine.spec().layout())
        .min_by_key(|entry| entry.rank())
        .map(|entry| Arc::clone(&entry.engine))
}

/// Install the process-wide registry. Registration must be complete: the
/// registry is read-only from here on.
pub fn install(registry: EngineRegistry) -> Result<Arc<EngineRegistry>, RegistryError> {
    let registry = Arc::new(registry);
    GLOBAL
        .set(Arc::clone(&registry))
        .map_err(|_| RegistryError::AlreadyInstalled)?;
    info!(
        target = "folio::engine::registry",
        engines = registry.len(),
        groups = registry.groups.len(),
        "engine registry installed"
    );
    Ok(registry)
}

/// The installed process-wide registry, if any.
pub fn global() -> Option<Arc<EngineRegistry>> {
    GLOBAL.get().cloned()
}
