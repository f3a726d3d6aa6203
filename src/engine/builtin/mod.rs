//! Engines shipped with folio.

mod page;
mod raw;
mod source;

use std::sync::Arc;

use super::{Engine, EngineRegistry, EngineSpecError};

pub use page::PageEngine;
pub use raw::{DownloadEngine, RawEngine};
pub use source::SourceEngine;

/// Register every built-in engine.
pub fn register_builtin(registry: &mut EngineRegistry) -> Result<(), EngineSpecError> {
    let engines: [Arc<dyn Engine>; 4] = [
        Arc::new(PageEngine::new()?),
        Arc::new(SourceEngine::new()?),
        Arc::new(RawEngine::new()?),
        Arc::new(DownloadEngine::new()?),
    ];
    registry.register_all(engines);
    Ok(())
}

/// A registry holding only the built-in engines.
pub fn builtin_registry() -> Result<EngineRegistry, EngineSpecError> {
    let mut registry = EngineRegistry::new();
    register_builtin(&mut registry)?;
    Ok(registry)
}
