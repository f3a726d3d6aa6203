//! Folio renders content resources through pluggable engines.
//!
//! Engines register with an [`engine::EngineRegistry`] and are chosen per
//! resource by mime type and priority. The [`application::Dispatcher`] runs the
//! chosen engine inside a [`context::Context`] and memoizes the output under a
//! content-addressed key, so a resource is rendered again only when its
//! content, the engine, the locale or the request parameters change.

pub mod application;
pub mod cache;
pub mod config;
pub mod context;
pub mod domain;
pub mod engine;
pub mod infra;
pub mod util;
