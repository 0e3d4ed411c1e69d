//! Service catalog for explicit dependency injection.
//!
//! The [`ServiceCatalog`] holds the per-source-kind collaborators (fetchers,
//! row sources, type transforms, DDL builders and value-handler registries).
//! It is constructed once at startup and passed to the reconciler and the
//! pipeline; there is no global registry.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::config::SourceConfig;
use crate::error::{MigrateError, Result};
use crate::pipeline::handlers::HandlerRegistry;
use crate::source::DumpSource;
use crate::typemap::{GenericDdl, GenericTransform};

use super::traits::{DdlBuilder, RowSource, SourceFetcher, TypeTransform};

/// Key used for services that apply to every source kind.
const ANY_KIND: &str = "*";

/// Registry of collaborators keyed by source kind.
///
/// # Example
///
/// ```rust,ignore
/// let mut catalog = ServiceCatalog::with_builtins();
/// catalog.open_source(&config.source)?;
/// let transform = catalog.require_transform(&config.source.kind)?;
/// ```
#[derive(Default)]
pub struct ServiceCatalog {
    fetchers: HashMap<String, Arc<dyn SourceFetcher>>,
    row_sources: HashMap<String, Arc<dyn RowSource>>,
    transforms: HashMap<String, Arc<dyn TypeTransform>>,
    ddl_builders: HashMap<String, Arc<dyn DdlBuilder>>,
    handlers: HashMap<String, Arc<HandlerRegistry>>,
}

impl ServiceCatalog {
    /// Create a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog with the generic transform, DDL builder and value
    /// handlers registered for every source kind.
    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        catalog.register_transform(ANY_KIND, Arc::new(GenericTransform::new()));
        catalog.register_ddl(ANY_KIND, Arc::new(GenericDdl::new()));
        catalog.register_handlers(ANY_KIND, Arc::new(HandlerRegistry::with_defaults()));
        catalog
    }

    /// Register one value acting as both fetcher and row source.
    pub fn register_source<S>(&mut self, kind: impl Into<String>, source: Arc<S>)
    where
        S: SourceFetcher + RowSource + 'static,
    {
        let kind = kind.into();
        self.fetchers.insert(kind.clone(), source.clone());
        self.row_sources.insert(kind, source);
    }

    pub fn register_fetcher(&mut self, kind: impl Into<String>, fetcher: Arc<dyn SourceFetcher>) {
        self.fetchers.insert(kind.into(), fetcher);
    }

    pub fn register_row_source(&mut self, kind: impl Into<String>, source: Arc<dyn RowSource>) {
        self.row_sources.insert(kind.into(), source);
    }

    pub fn register_transform(
        &mut self,
        kind: impl Into<String>,
        transform: Arc<dyn TypeTransform>,
    ) {
        self.transforms.insert(kind.into(), transform);
    }

    pub fn register_ddl(&mut self, kind: impl Into<String>, ddl: Arc<dyn DdlBuilder>) {
        self.ddl_builders.insert(kind.into(), ddl);
    }

    pub fn register_handlers(&mut self, kind: impl Into<String>, handlers: Arc<HandlerRegistry>) {
        self.handlers.insert(kind.into(), handlers);
    }

    /// Open the source described by `config` unless one is already registered.
    ///
    /// Only file-based dump sources can be opened from configuration; other
    /// kinds must be registered explicitly.
    pub fn open_source(&mut self, config: &SourceConfig) -> Result<()> {
        if self.fetchers.contains_key(&config.kind) && self.row_sources.contains_key(&config.kind)
        {
            return Ok(());
        }
        match config.kind.as_str() {
            "dump" => {
                let path = config.path.as_ref().ok_or_else(|| {
                    MigrateError::Config("source.path is required for dump sources".into())
                })?;
                debug!("Opening dump source {}", path.display());
                let source = Arc::new(DumpSource::load(path)?);
                self.register_source("dump", source);
                Ok(())
            }
            other => Err(MigrateError::Config(format!(
                "No source registered for kind '{}'",
                other
            ))),
        }
    }

    pub fn get_fetcher(&self, kind: &str) -> Option<Arc<dyn SourceFetcher>> {
        self.fetchers.get(kind).cloned()
    }

    pub fn require_fetcher(&self, kind: &str) -> Result<Arc<dyn SourceFetcher>> {
        self.get_fetcher(kind)
            .ok_or_else(|| MigrateError::Config(format!("No fetcher registered for '{}'", kind)))
    }

    pub fn get_row_source(&self, kind: &str) -> Option<Arc<dyn RowSource>> {
        self.row_sources.get(kind).cloned()
    }

    pub fn require_row_source(&self, kind: &str) -> Result<Arc<dyn RowSource>> {
        self.get_row_source(kind).ok_or_else(|| {
            MigrateError::Config(format!("No row source registered for '{}'", kind))
        })
    }

    /// Transform for a source kind, falling back to the kind-independent one.
    pub fn get_transform(&self, kind: &str) -> Option<Arc<dyn TypeTransform>> {
        self.transforms
            .get(kind)
            .or_else(|| self.transforms.get(ANY_KIND))
            .cloned()
    }

    pub fn require_transform(&self, kind: &str) -> Result<Arc<dyn TypeTransform>> {
        self.get_transform(kind).ok_or_else(|| {
            MigrateError::Config(format!("No type transform registered for '{}'", kind))
        })
    }

    pub fn require_ddl(&self, kind: &str) -> Result<Arc<dyn DdlBuilder>> {
        self.ddl_builders
            .get(kind)
            .or_else(|| self.ddl_builders.get(ANY_KIND))
            .cloned()
            .ok_or_else(|| {
                MigrateError::Config(format!("No DDL builder registered for '{}'", kind))
            })
    }

    pub fn require_handlers(&self, kind: &str) -> Result<Arc<HandlerRegistry>> {
        self.handlers
            .get(kind)
            .or_else(|| self.handlers.get(ANY_KIND))
            .cloned()
            .ok_or_else(|| {
                MigrateError::Config(format!("No value handlers registered for '{}'", kind))
            })
    }

    /// Registered source kinds, sorted.
    pub fn source_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.fetchers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}
