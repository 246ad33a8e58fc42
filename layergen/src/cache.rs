//! A per-process snapshot of the resolved registry, so that several generation steps in one run
//! don't each parse the registry document again.

use crate::{config::RegistryConfig, registry::Registry, Error};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    env,
    error::Error as StdError,
    fmt::{Display, Error as FmtError, Formatter},
    fs::{self, File},
    io::{self, BufReader, BufWriter},
    path::{Path, PathBuf},
    process,
    time::SystemTime,
};

/// The cache file. It's removed when the cache is dropped.
#[derive(Debug)]
pub struct RegistryCache {
    path: PathBuf,
}

#[derive(Serialize, Deserialize)]
struct CacheEntry {
    source: PathBuf,
    modified: Option<SystemTime>,
    config: RegistryConfig,
    registry: Registry,
}

impl RegistryCache {
    /// Creates a cache in the temporary directory, named after the current process.
    pub fn new() -> Self {
        Self::at(env::temp_dir().join(format!("layergen-{}.json", process::id())))
    }

    #[inline]
    pub fn at(path: PathBuf) -> Self {
        RegistryCache { path }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the registry loaded from `source`, reusing the cached snapshot when it was built
    /// from the same unmodified file with the same configuration.
    ///
    /// Failing to read or write the cache only costs time, so those failures are logged and
    /// otherwise ignored.
    pub fn load_or_build(&self, source: &Path, config: &RegistryConfig) -> Result<Registry, Error> {
        let modified = modification_time(source);

        match self.load() {
            Ok(Some(entry))
                if entry.source == source
                    && entry.modified == modified
                    && entry.config == *config =>
            {
                info!("using cached registry for {}", source.display());
                return Ok(entry.registry);
            }
            Ok(Some(entry)) => debug!(
                "cached registry was built from {}, invalidating",
                entry.source.display(),
            ),
            Ok(None) => (),
            Err(err) => warn!("ignoring unreadable registry cache: {}", err),
        }

        let registry = Registry::load(source, config)?;
        let entry = CacheEntry {
            source: source.to_owned(),
            modified,
            config: config.clone(),
            registry,
        };

        if let Err(err) = self.store(&entry) {
            warn!("failed to write the registry cache: {}", err);
        }

        Ok(entry.registry)
    }

    /// Deletes the cache file, if there is one.
    pub fn clear(&self) -> Result<(), CacheError> {
        match fs::remove_file(&self.path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }

    fn load(&self) -> Result<Option<CacheEntry>, CacheError> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        Ok(Some(serde_json::from_reader(BufReader::new(file))?))
    }

    fn store(&self, entry: &CacheEntry) -> Result<(), CacheError> {
        let file = File::create(&self.path)?;
        serde_json::to_writer(BufWriter::new(file), entry)?;

        Ok(())
    }
}

impl Default for RegistryCache {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RegistryCache {
    fn drop(&mut self) {
        if let Err(err) = self.clear() {
            warn!("failed to remove {}: {}", self.path.display(), err);
        }
    }
}

fn modification_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|metadata| metadata.modified()).ok()
}

/// Error that can happen when reading or writing the cache file.
#[derive(Debug)]
pub enum CacheError {
    Io(io::Error),
    Serde(serde_json::Error),
}

impl StdError for CacheError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Serde(err) => Some(err),
        }
    }
}

impl Display for CacheError {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        match self {
            Self::Io(_) => write!(f, "failed to access the cache file"),
            Self::Serde(_) => write!(f, "failed to (de)serialize the cached registry"),
        }
    }
}

impl From<io::Error> for CacheError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<registry>
    <types>
        <type category="handle"><type>VK_DEFINE_HANDLE</type>(<name>VkInstance</name>)</type>
    </types>
</registry>
"#;

    fn cache(name: &str) -> RegistryCache {
        RegistryCache::at(env::temp_dir().join(format!(
            "layergen-test-{}-{}.json",
            name,
            process::id(),
        )))
    }

    fn write_registry(name: &str) -> PathBuf {
        write_registry_with(name, REGISTRY)
    }

    fn write_registry_with(name: &str, content: &str) -> PathBuf {
        let path = env::temp_dir().join(format!("layergen-test-{}-{}.xml", name, process::id()));
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn reuses_and_removes_the_snapshot() {
        let source = write_registry("reuse");
        let cache = cache("reuse");
        let config = RegistryConfig::default();

        let first = cache.load_or_build(&source, &config).unwrap();
        assert!(cache.path().exists());
        assert!(first.handles.contains_key("VkInstance"));

        let second = cache.load_or_build(&source, &config).unwrap();
        assert_eq!(first, second);

        let path = cache.path().to_owned();
        drop(cache);
        assert!(!path.exists());
        fs::remove_file(source).unwrap();
    }

    #[test]
    fn config_change_invalidates() {
        let source = write_registry("config");
        let cache = cache("config");

        cache
            .load_or_build(&source, &RegistryConfig::default())
            .unwrap();

        let config = RegistryConfig::default().with_state_tracking("vkFoo", "track();");
        cache.load_or_build(&source, &config).unwrap();

        let entry = cache.load().unwrap().unwrap();
        assert_eq!(entry.config, config);
        fs::remove_file(source).unwrap();
    }

    #[test]
    fn source_change_invalidates() {
        let vk = write_registry("source-vk");
        let video = write_registry_with(
            "source-video",
            &REGISTRY.replace("VkInstance", "VkVideoSessionKHR"),
        );
        let cache = cache("source");
        let config = RegistryConfig::default();

        let first = cache.load_or_build(&vk, &config).unwrap();
        let second = cache.load_or_build(&video, &config).unwrap();

        assert!(first.handles.contains_key("VkInstance"));
        assert!(second.handles.contains_key("VkVideoSessionKHR"));
        assert!(!second.handles.contains_key("VkInstance"));

        let entry = cache.load().unwrap().unwrap();
        assert_eq!(entry.source, video);
        assert_eq!(entry.registry, second);

        fs::remove_file(vk).unwrap();
        fs::remove_file(video).unwrap();
    }

    #[test]
    fn missing_source_is_an_error() {
        let cache = cache("missing");
        let source = env::temp_dir().join("layergen-test-does-not-exist.xml");

        assert!(matches!(
            cache.load_or_build(&source, &RegistryConfig::default()),
            Err(Error::Registry(_)),
        ));
    }
}
