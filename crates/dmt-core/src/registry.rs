//! Extension registry
//!
//! Extensions are listed in an explicit registration table of [`Plugin`]s.
//! The first lookup builds a [`Catalog`] from that table:
//!
//! ```text
//! Plugins ──▶ compose (parser × byte source, formatter × target)
//!         ──▶ drop disabled ──▶ reject duplicates ──▶ extract settings
//!         ──▶ sort by name ──▶ Catalog { entries, manifests, failures }
//! ```
//!
//! The catalog is published as an immutable snapshot. Readers clone the
//! `Arc` and never see a partially built catalog; rebuilds are serialized.

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::config::Config;
use crate::connectors::builtin_plugins;
use crate::error::{Error, Result};
use crate::extension::{
    ByteSource, ByteTarget, DataSink, DataSource, Extension, RecordFormatter, RecordParser,
};
use crate::manifest::{CombinedManifest, Direction, ExtensionManifest, ExtensionManifestItem};
use crate::pipeline::{ComposableSink, ComposableSource, DEFAULT_PIPE_CAPACITY};
use crate::settings::extract;

/// One row of the registration table
#[derive(Clone)]
pub enum Plugin {
    /// Direct record source
    Source(Arc<dyn DataSource>),
    /// Direct record sink
    Sink(Arc<dyn DataSink>),
    /// Byte source, paired with every parser
    ByteSource(Arc<dyn ByteSource>),
    /// Record parser, paired with every byte source
    Parser(Arc<dyn RecordParser>),
    /// Record formatter, paired with every byte target
    Formatter(Arc<dyn RecordFormatter>),
    /// Byte target, paired with every formatter
    Target(Arc<dyn ByteTarget>),
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (kind, name) = match self {
            Plugin::Source(ext) => ("Source", ext.name()),
            Plugin::Sink(ext) => ("Sink", ext.name()),
            Plugin::ByteSource(ext) => ("ByteSource", ext.name()),
            Plugin::Parser(ext) => ("Parser", ext.name()),
            Plugin::Formatter(ext) => ("Formatter", ext.name()),
            Plugin::Target(ext) => ("Target", ext.name()),
        };
        write!(f, "{}({})", kind, name)
    }
}

/// A resolved extension and its manifest item
pub struct Entry<T: ?Sized> {
    /// The implementation
    pub extension: Arc<T>,
    /// Its published description
    pub item: ExtensionManifestItem,
}

/// Resolved source extension
pub type SourceEntry = Entry<dyn DataSource>;
/// Resolved sink extension
pub type SinkEntry = Entry<dyn DataSink>;

impl<T: ?Sized> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            extension: self.extension.clone(),
            item: self.item.clone(),
        }
    }
}

impl<T: ?Sized> fmt::Debug for Entry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry").field("item", &self.item).finish()
    }
}

impl<T: Extension + ?Sized> Entry<T> {
    fn describe(extension: Arc<T>, direction: Direction) -> Result<Self> {
        let name = extension.name().to_string();
        let settings = extract(&name, extension.settings())?;
        let item = ExtensionManifestItem {
            name,
            direction,
            version: extension.version(),
            module_ref: extension.module_ref(),
            settings,
        };
        Ok(Self { extension, item })
    }
}

impl SourceEntry {
    /// Extract the manifest item of a source
    pub fn new(extension: Arc<dyn DataSource>) -> Result<Self> {
        Self::describe(extension, Direction::Source)
    }
}

impl SinkEntry {
    /// Extract the manifest item of a sink
    pub fn new(extension: Arc<dyn DataSink>) -> Result<Self> {
        Self::describe(extension, Direction::Sink)
    }
}

/// An extension that could not be loaded
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryFailure {
    /// Extension name
    pub name: String,
    /// Direction it was registered for
    pub direction: Direction,
    /// Why it was excluded
    pub message: String,
}

/// Immutable result of one discovery pass
#[derive(Debug)]
pub struct Catalog {
    sources: Vec<SourceEntry>,
    sinks: Vec<SinkEntry>,
    source_manifest: ExtensionManifest,
    sink_manifest: ExtensionManifest,
    failures: Vec<DiscoveryFailure>,
}

impl Catalog {
    /// Look up a source by name (case-insensitive)
    pub fn source(&self, name: &str) -> Result<&SourceEntry> {
        find(&self.sources, name).ok_or_else(|| Error::UnknownExtension {
            direction: Direction::Source,
            name: name.to_string(),
        })
    }

    /// Look up a sink by name (case-insensitive)
    pub fn sink(&self, name: &str) -> Result<&SinkEntry> {
        find(&self.sinks, name).ok_or_else(|| Error::UnknownExtension {
            direction: Direction::Sink,
            name: name.to_string(),
        })
    }

    /// Manifest for one direction
    pub fn manifest(&self, direction: Direction) -> &ExtensionManifest {
        match direction {
            Direction::Source => &self.source_manifest,
            Direction::Sink => &self.sink_manifest,
        }
    }

    /// Extensions excluded during discovery
    pub fn failures(&self) -> &[DiscoveryFailure] {
        &self.failures
    }
}

fn find<'a, T: ?Sized>(entries: &'a [Entry<T>], name: &str) -> Option<&'a Entry<T>> {
    entries
        .iter()
        .find(|entry| entry.item.name.eq_ignore_ascii_case(name))
}

/// Process-wide catalog of extensions
///
/// Cheap to share behind an `Arc`; every accessor works on the current
/// snapshot.
pub struct ExtensionRegistry {
    app_version: String,
    plugins: Vec<Plugin>,
    disabled: Vec<String>,
    pipe_capacity: usize,
    snapshot: RwLock<Option<Arc<Catalog>>>,
    build_lock: Mutex<()>,
}

impl ExtensionRegistry {
    /// Empty registry reporting `app_version` in its manifests
    pub fn new(app_version: impl Into<String>) -> Self {
        Self {
            app_version: app_version.into(),
            plugins: Vec::new(),
            disabled: Vec::new(),
            pipe_capacity: DEFAULT_PIPE_CAPACITY,
            snapshot: RwLock::new(None),
            build_lock: Mutex::new(()),
        }
    }

    /// Registry with every built-in connector
    pub fn builtin() -> Self {
        builtin_plugins()
            .into_iter()
            .fold(Self::new(env!("CARGO_PKG_VERSION")), Self::with_plugin)
    }

    /// Built-in registry shaped by `config`
    pub fn from_config(config: &Config) -> Self {
        Self::builtin()
            .with_disabled(config.extensions().disabled.clone())
            .with_pipe_capacity(config.runtime().pipe_capacity)
    }

    /// Builder-style [`ExtensionRegistry::register`]
    pub fn with_plugin(mut self, plugin: Plugin) -> Self {
        self.register(plugin);
        self
    }

    /// Skip extensions with these names when building the catalog
    pub fn with_disabled(mut self, names: Vec<String>) -> Self {
        self.disabled = names;
        self.invalidate();
        self
    }

    /// Pipe buffer size for composite sinks
    pub fn with_pipe_capacity(mut self, capacity: usize) -> Self {
        self.pipe_capacity = capacity;
        self.invalidate();
        self
    }

    /// Add a row to the registration table
    ///
    /// Conflicts are detected when the catalog is built, not here.
    pub fn register(&mut self, plugin: Plugin) {
        tracing::trace!(plugin = ?plugin, "registering plugin");
        self.plugins.push(plugin);
        self.invalidate();
    }

    /// Current snapshot, built on first access
    pub fn catalog(&self) -> Arc<Catalog> {
        if let Some(catalog) = self.snapshot.read().as_ref() {
            return catalog.clone();
        }

        let _guard = self.build_lock.lock();
        // Another caller may have finished building while we waited
        if let Some(catalog) = self.snapshot.read().as_ref() {
            return catalog.clone();
        }
        self.publish()
    }

    /// Rebuild the catalog and publish it atomically
    pub fn reload(&self) -> Arc<Catalog> {
        let _guard = self.build_lock.lock();
        self.publish()
    }

    /// Drop the current snapshot; the next access rebuilds it
    pub fn invalidate(&self) {
        *self.snapshot.write() = None;
    }

    /// Sorted manifest items for one direction
    pub fn discover(&self, direction: Direction) -> Vec<ExtensionManifestItem> {
        self.catalog().manifest(direction).extensions.clone()
    }

    /// Manifest for one direction
    pub fn manifest(&self, direction: Direction) -> ExtensionManifest {
        self.catalog().manifest(direction).clone()
    }

    /// Both manifests side by side
    pub fn combined(&self) -> CombinedManifest {
        let catalog = self.catalog();
        crate::manifest::combine(
            catalog.manifest(Direction::Source),
            catalog.manifest(Direction::Sink),
        )
    }

    /// Resolve a source by name
    pub fn source(&self, name: &str) -> Result<SourceEntry> {
        self.catalog().source(name).cloned()
    }

    /// Resolve a sink by name
    pub fn sink(&self, name: &str) -> Result<SinkEntry> {
        self.catalog().sink(name).cloned()
    }

    /// Extensions excluded from the current snapshot
    pub fn failures(&self) -> Vec<DiscoveryFailure> {
        self.catalog().failures().to_vec()
    }

    fn publish(&self) -> Arc<Catalog> {
        let catalog = Arc::new(self.build());
        *self.snapshot.write() = Some(catalog.clone());
        catalog
    }

    fn build(&self) -> Catalog {
        let mut sources: Vec<Arc<dyn DataSource>> = Vec::new();
        let mut sinks: Vec<Arc<dyn DataSink>> = Vec::new();
        let mut byte_sources = Vec::new();
        let mut parsers = Vec::new();
        let mut formatters = Vec::new();
        let mut targets = Vec::new();

        for plugin in &self.plugins {
            match plugin {
                Plugin::Source(ext) => sources.push(ext.clone()),
                Plugin::Sink(ext) => sinks.push(ext.clone()),
                Plugin::ByteSource(ext) => byte_sources.push(ext.clone()),
                Plugin::Parser(ext) => parsers.push(ext.clone()),
                Plugin::Formatter(ext) => formatters.push(ext.clone()),
                Plugin::Target(ext) => targets.push(ext.clone()),
            }
        }

        for parser in &parsers {
            for byte_source in &byte_sources {
                sources.push(Arc::new(ComposableSource::new(
                    parser.clone(),
                    byte_source.clone(),
                )));
            }
        }
        for formatter in &formatters {
            for target in &targets {
                sinks.push(Arc::new(
                    ComposableSink::new(formatter.clone(), target.clone())
                        .with_pipe_capacity(self.pipe_capacity),
                ));
            }
        }

        let mut failures = Vec::new();
        let sources = self.resolve(Direction::Source, sources, &mut failures);
        let sinks = self.resolve(Direction::Sink, sinks, &mut failures);

        let source_manifest = ExtensionManifest {
            app_version: self.app_version.clone(),
            extensions: sources.iter().map(|entry| entry.item.clone()).collect(),
        };
        let sink_manifest = ExtensionManifest {
            app_version: self.app_version.clone(),
            extensions: sinks.iter().map(|entry| entry.item.clone()).collect(),
        };

        tracing::info!(
            sources = sources.len(),
            sinks = sinks.len(),
            failures = failures.len(),
            "extension catalog built"
        );

        Catalog {
            sources,
            sinks,
            source_manifest,
            sink_manifest,
            failures,
        }
    }

    fn resolve<T: Extension + ?Sized>(
        &self,
        direction: Direction,
        candidates: Vec<Arc<T>>,
        failures: &mut Vec<DiscoveryFailure>,
    ) -> Vec<Entry<T>> {
        let mut entries: Vec<Entry<T>> = Vec::with_capacity(candidates.len());

        for extension in candidates {
            let name = extension.name().to_string();
            if self.is_disabled(&name) {
                tracing::debug!(%direction, name = %name, "extension disabled");
                continue;
            }

            let described = if find(&entries, &name).is_some() {
                Err(Error::DuplicateExtension {
                    direction,
                    name: name.clone(),
                })
            } else {
                Entry::describe(extension, direction)
            };

            match described {
                Ok(entry) => entries.push(entry),
                Err(err) => {
                    tracing::warn!(%direction, name = %name, "extension excluded: {}", err);
                    failures.push(DiscoveryFailure {
                        name,
                        direction,
                        message: err.to_string(),
                    });
                }
            }
        }

        entries.sort_by(|a, b| by_name(&a.item.name, &b.item.name));
        entries
    }

    fn is_disabled(&self, name: &str) -> bool {
        self.disabled
            .iter()
            .any(|disabled| disabled.eq_ignore_ascii_case(name))
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("app_version", &self.app_version)
            .field("plugins", &self.plugins)
            .field("disabled", &self.disabled)
            .finish()
    }
}

/// Case-insensitive, then exact
fn by_name(a: &str, b: &str) -> Ordering {
    a.to_ascii_lowercase()
        .cmp(&b.to_ascii_lowercase())
        .then_with(|| a.cmp(b))
}
