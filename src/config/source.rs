//! Versioned configuration sources.
//!
//! A [`ConfigSource`] yields its text content and an opaque
//! [`SourceVersion`]. Callers compare versions to decide whether a cached
//! parse is still current, without depending on a particular filesystem API.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use super::validation::ConfigError;

/// Opaque change token for a configuration source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceVersion {
    /// File modification time.
    Modified(SystemTime),
    /// Monotonic revision counter (in-memory sources).
    Revision(u64),
}

/// A readable, versioned configuration source.
pub trait ConfigSource: Send + Sync + 'static {
    /// Human-readable location, used in logs and errors.
    fn describe(&self) -> String;

    /// Current version of the source.
    ///
    /// # Errors
    /// Returns [`ConfigError::Missing`] if the source does not exist.
    fn version(&self) -> Result<SourceVersion, ConfigError>;

    /// Read the full content of the source.
    fn read_to_string(&self) -> Result<String, ConfigError>;
}

/// A configuration file on disk, versioned by modification time.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn missing(&self) -> ConfigError {
        ConfigError::Missing(self.describe())
    }
}

impl ConfigSource for FileSource {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    fn version(&self) -> Result<SourceVersion, ConfigError> {
        match std::fs::metadata(&self.path) {
            Ok(meta) => Ok(SourceVersion::Modified(meta.modified()?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(self.missing()),
            Err(e) => Err(e.into()),
        }
    }

    fn read_to_string(&self) -> Result<String, ConfigError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(self.missing()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    content: Option<String>,
    revision: u64,
    reads: usize,
}

/// In-memory configuration source.
///
/// Clones share state, so a test can keep a handle and edit the content
/// after handing the source to a registry. Every [`MemorySource::set`] bumps
/// the revision.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    name: String,
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        let source = Self {
            name: name.into(),
            state: Arc::default(),
        };
        source.set(content);
        source
    }

    /// Replace the content and bump the revision.
    pub fn set(&self, content: impl Into<String>) {
        let mut state = self.lock();
        state.content = Some(content.into());
        state.revision += 1;
    }

    /// Make the source disappear.
    pub fn remove(&self) {
        self.lock().content = None;
    }

    /// Number of times the content has been read.
    pub fn reads(&self) -> usize {
        self.lock().reads
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ConfigSource for MemorySource {
    fn describe(&self) -> String {
        format!("memory:{}", self.name)
    }

    fn version(&self) -> Result<SourceVersion, ConfigError> {
        let state = self.lock();
        match state.content {
            Some(_) => Ok(SourceVersion::Revision(state.revision)),
            None => Err(ConfigError::Missing(self.describe())),
        }
    }

    fn read_to_string(&self) -> Result<String, ConfigError> {
        let mut state = self.lock();
        state.reads += 1;
        state
            .content
            .clone()
            .ok_or_else(|| ConfigError::Missing(self.describe()))
    }
}
