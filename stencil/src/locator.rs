//! Template lookup
//!
//! `extends` and `include` name other templates; a [`Locator`] turns those names
//! into source text.

use std::collections::HashMap;

use camino::{Utf8Path, Utf8PathBuf};
use tracing::trace;

use crate::error::LocatorError;

/// Resolves template names to source text.
pub trait Locator: Send + Sync {
    /// The source of the template called `name`.
    fn resolve(&self, name: &str) -> Result<String, LocatorError>;
}

impl<F> Locator for F
where
    F: Fn(&str) -> Result<String, LocatorError> + Send + Sync,
{
    fn resolve(&self, name: &str) -> Result<String, LocatorError> {
        self(name)
    }
}

/// Templates held in memory, keyed by name
#[derive(Debug, Clone, Default)]
pub struct InMemoryLoader {
    templates: HashMap<String, String>,
}

impl InMemoryLoader {
    /// An empty loader
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a template
    pub fn add(&mut self, name: impl Into<String>, source: impl Into<String>) -> &mut Self {
        self.templates.insert(name.into(), source.into());
        self
    }

    /// Builder-style [`InMemoryLoader::add`]
    pub fn with(mut self, name: impl Into<String>, source: impl Into<String>) -> Self {
        self.add(name, source);
        self
    }
}

impl Locator for InMemoryLoader {
    fn resolve(&self, name: &str) -> Result<String, LocatorError> {
        self.templates
            .get(name)
            .cloned()
            .ok_or_else(|| LocatorError::NotFound {
                name: name.to_owned(),
            })
    }
}

/// Reads templates from a directory. Absolute names bypass the directory.
#[derive(Debug, Clone)]
pub struct FileLocator {
    root: Utf8PathBuf,
}

impl FileLocator {
    /// Read templates below `root`.
    pub fn new(root: impl Into<Utf8PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory that relative names resolve against
    pub fn root(&self) -> &Utf8Path {
        &self.root
    }
}

impl Locator for FileLocator {
    fn resolve(&self, name: &str) -> Result<String, LocatorError> {
        let name_path = Utf8Path::new(name);
        let path = if name_path.is_absolute() {
            name_path.to_owned()
        } else {
            self.root.join(name_path)
        };
        trace!(%path, "reading template");
        std::fs::read_to_string(&path).map_err(|err| LocatorError::io(name, err))
    }
}
