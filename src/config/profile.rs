//! Device model profiles (register maps).

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::source::{ConfigSource, FileSource};
use super::validation::ConfigError;
use crate::storage::READ_DURATION_FIELD;

/// Parameter name to input register address, for one device model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterMap(BTreeMap<String, u16>);

impl ParameterMap {
    /// Parse a model definition document.
    ///
    /// # Errors
    /// Returns `ConfigError` if the document is not a mapping of names to
    /// register addresses (0-65535), defines no parameters, or uses the
    /// reserved [`READ_DURATION_FIELD`] name.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let map: Self = serde_yaml::from_str(content)?;
        if map.is_empty() {
            return Err(ConfigError::ValidationError(
                "model defines no parameters".to_string(),
            ));
        }
        if map.0.contains_key(READ_DURATION_FIELD) {
            return Err(ConfigError::ValidationError(format!(
                "parameter name '{READ_DURATION_FIELD}' is reserved for the read duration"
            )));
        }
        Ok(map)
    }

    /// Parameters in read order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u16)> {
        self.0.iter().map(|(name, register)| (name.as_str(), *register))
    }

    pub fn get(&self, parameter: &str) -> Option<u16> {
        self.0.get(parameter).copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, u16)> for ParameterMap {
    fn from_iter<I: IntoIterator<Item = (K, u16)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// Lazily loaded, process-lifetime cache of model register maps.
///
/// Model files are read on first reference and never invalidated.
#[derive(Debug)]
pub struct ProfileStore {
    base_dir: PathBuf,
    cache: HashMap<String, Arc<ParameterMap>>,
}

impl ProfileStore {
    /// Create a store resolving relative model paths against `base_dir`.
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            cache: HashMap::new(),
        }
    }

    /// Register map for `model_ref`, loading it on first use.
    ///
    /// # Errors
    /// Returns `ConfigError` if the model file is absent or malformed.
    pub fn get_parameter_map(&mut self, model_ref: &str) -> Result<Arc<ParameterMap>, ConfigError> {
        if let Some(map) = self.cache.get(model_ref) {
            return Ok(Arc::clone(map));
        }

        let source = FileSource::new(self.resolve(model_ref));
        let map = ParameterMap::parse(&source.read_to_string()?).map_err(|e| {
            ConfigError::ValidationError(format!("model '{}': {}", source.describe(), e))
        })?;
        tracing::debug!(model = %source.describe(), parameters = map.len(), "Model loaded");

        let map = Arc::new(map);
        self.cache.insert(model_ref.to_string(), Arc::clone(&map));
        Ok(map)
    }

    /// Number of distinct models loaded so far.
    pub fn cached_models(&self) -> usize {
        self.cache.len()
    }

    fn resolve(&self, model_ref: &str) -> PathBuf {
        let path = Path::new(model_ref);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_parameter_map() {
        let map = ParameterMap::parse("power: 100\nvoltage: 102\n").unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.get("power"), Some(100));
        assert_eq!(map.get("voltage"), Some(102));
        assert_eq!(map.get("current"), None);
    }

    #[test]
    fn test_parse_parameter_map_invalid() {
        assert!(ParameterMap::parse("power: -1\n").is_err());
        assert!(ParameterMap::parse("power: 70000\n").is_err());
        assert!(ParameterMap::parse("power: high\n").is_err());
        assert!(ParameterMap::parse("{}\n").is_err());
        assert!(ParameterMap::parse("- 1\n- 2\n").is_err());
    }

    #[test]
    fn test_parse_parameter_map_reserved_name() {
        let err = ParameterMap::parse("\"Time to read\": 100\npower: 102\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(ref msg) if msg.contains("reserved")));
        assert!(ParameterMap::parse("time to read: 100\n").is_ok());
    }

    #[test]
    fn test_get_parameter_map_is_cached() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("modelX.yml"), "power: 100\nvoltage: 102\n").unwrap();

        let mut store = ProfileStore::new(dir.path());
        let first = store.get_parameter_map("modelX.yml").unwrap();
        let second = store.get_parameter_map("modelX.yml").unwrap();

        assert_eq!(first, second);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.cached_models(), 1);
    }

    #[test]
    fn test_cached_map_survives_file_change() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("modelX.yml");
        std::fs::write(&path, "power: 100\n").unwrap();

        let mut store = ProfileStore::new(dir.path());
        let first = store.get_parameter_map("modelX.yml").unwrap();
        std::fs::write(&path, "power: 200\n").unwrap();
        let second = store.get_parameter_map("modelX.yml").unwrap();

        assert_eq!(second.get("power"), Some(100));
        assert_eq!(first, second);
    }

    #[test]
    fn test_absolute_model_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("abs.yml");
        std::fs::write(&path, "energy: 342\n").unwrap();

        let mut store = ProfileStore::new("/does/not/matter");
        let map = store.get_parameter_map(path.to_str().unwrap()).unwrap();
        assert_eq!(map.get("energy"), Some(342));
    }

    #[test]
    fn test_missing_model() {
        let dir = tempdir().unwrap();
        let mut store = ProfileStore::new(dir.path());
        assert!(matches!(
            store.get_parameter_map("missing.yml"),
            Err(ConfigError::Missing(_))
        ));
        assert_eq!(store.cached_models(), 0);
    }

    #[test]
    fn test_malformed_model() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("bad.yml"), "power: [1, 2]\n").unwrap();

        let mut store = ProfileStore::new(dir.path());
        let err = store.get_parameter_map("bad.yml").unwrap_err();
        assert!(err.to_string().contains("bad.yml"));
    }
}
