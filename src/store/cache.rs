//! File-backed result cache.
//!
//! Every entry is one file in the cache directory, named by its key.
//! Binary payloads are framed (see [`super::format`]); structured-text
//! sidecars are pretty-printed JSON stored under `<key>.json` so that they
//! can be browsed without this crate.
//!
//! The cache assumes a single writer process. Concurrent writers to the
//! same key are not coordinated.

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::format::{CompressionType, decode_payload, encode_payload};

/// Suffix of sidecars holding the originating configuration.
pub const ARGS_SUFFIX: &str = "_args";
/// Suffix of sidecars holding derived scores.
pub const SCORES_SUFFIX: &str = "_scores";
/// Suffix of payloads holding predictions and probabilities.
pub const PROBA_SUFFIX: &str = "_proba";
/// Prefix of dataset fingerprints.
pub const DATA_PREFIX: &str = "data_";

const TEXT_EXTENSION: &str = ".json";

/// Kind of artifact stored under a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactRole {
    Classifier,
    Projection,
    ClassifierProjection,
}

impl ArtifactRole {
    /// Tag placed between dataset and configuration fingerprint.
    pub fn tag(self) -> &'static str {
        match self {
            ArtifactRole::Classifier => "__clf_",
            ArtifactRole::Projection => "__proj_",
            ArtifactRole::ClassifierProjection => "__clf_proj_",
        }
    }

    /// Role of a key. `__clf_proj_` is checked before `__clf_`, which is
    /// its prefix.
    pub fn of_key(key: &str) -> Option<Self> {
        [
            ArtifactRole::ClassifierProjection,
            ArtifactRole::Projection,
            ArtifactRole::Classifier,
        ]
        .into_iter()
        .find(|role| key.contains(role.tag()))
    }
}

/// `<data_fp><role tag><config_fp>`
pub fn artifact_key(data_fingerprint: &str, role: ArtifactRole, config_fingerprint: &str) -> String {
    format!("{data_fingerprint}{}{config_fingerprint}", role.tag())
}

/// Key of the `_args` sidecar.
pub fn args_key(key: &str) -> String {
    format!("{key}{ARGS_SUFFIX}")
}

/// Key of the `_scores` sidecar.
pub fn scores_key(key: &str) -> String {
    format!("{key}{SCORES_SUFFIX}")
}

/// Key of the `_proba` payload.
pub fn proba_key(key: &str) -> String {
    format!("{key}{PROBA_SUFFIX}")
}

/// Cache errors.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache entry not found: {0}")]
    NotFound(String),
    #[error("Invalid cache key \"{0}\"")]
    InvalidKey(String),
    #[error("Cache I/O error for {key}: {source}")]
    Io { key: String, source: io::Error },
    #[error("Cache entry {key} is not valid JSON: {source}")]
    Json {
        key: String,
        source: serde_json::Error,
    },
}

impl CacheError {
    fn io(key: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            CacheError::NotFound(key.to_string())
        } else {
            CacheError::Io {
                key: key.to_string(),
                source,
            }
        }
    }

    fn json(key: &str, source: serde_json::Error) -> Self {
        CacheError::Json {
            key: key.to_string(),
            source,
        }
    }
}

/// Outcome of a partial-failure tolerant bulk read.
#[derive(Debug)]
pub struct BatchRead<T> {
    /// Values of the keys that could be read, in request order.
    pub results: Vec<T>,
    pub ok_keys: Vec<String>,
    pub failed_keys: Vec<String>,
}

/// Outcome of a bulk deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeleteSummary {
    pub deleted: usize,
    pub errors: usize,
}

/// An `_args` sidecar found while browsing the cache.
#[derive(Debug, Clone, Serialize)]
pub struct CacheListing {
    /// Sidecar file name.
    pub file: String,
    pub args: Value,
    /// Scores sidecar, for classifiers only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scores: Option<Value>,
}

/// Everything that has been computed so far, grouped by role.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CacheContent {
    pub datasets: Vec<CacheListing>,
    pub classifiers: Vec<CacheListing>,
    pub projections: Vec<CacheListing>,
    pub classifier_projections: Vec<CacheListing>,
}

/// Handle to a cache directory.
///
/// Opened once by the driver and passed by reference to everything that
/// reads or writes results.
#[derive(Debug, Clone)]
pub struct ResultCache {
    root: PathBuf,
    compression: CompressionType,
}

impl ResultCache {
    /// Open (and create if needed) a cache directory.
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, CacheError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| CacheError::io(&root.display().to_string(), e))?;
        Ok(Self {
            root,
            compression: CompressionType::None,
        })
    }

    /// Set compression for newly written payloads.
    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Cache directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path(&self, key: &str) -> Result<PathBuf, CacheError> {
        if key.is_empty() || key == "." || key == ".." || key.contains(['/', '\\']) {
            return Err(CacheError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    /// Check whether an entry exists.
    pub fn exists(&self, key: &str) -> bool {
        self.path(key).is_ok_and(|p| p.is_file())
    }

    /// Store a binary payload.
    pub fn write(&self, key: &str, payload: &[u8]) -> Result<(), CacheError> {
        let path = self.path(key)?;
        debug!("Writing to cache: \"{key}\"");
        fs::create_dir_all(&self.root).map_err(|e| CacheError::io(key, e))?;
        fs::write(path, encode_payload(payload, self.compression)).map_err(|e| CacheError::io(key, e))
    }

    /// Load a binary payload.
    pub fn read(&self, key: &str) -> Result<Vec<u8>, CacheError> {
        let path = self.path(key)?;
        debug!("Loading from cache: \"{key}\"");
        let bytes = fs::read(path).map_err(|e| CacheError::io(key, e))?;
        decode_payload(&bytes).map_err(|e| CacheError::io(key, e))
    }

    /// Load several payloads; a bad entry does not abort the batch.
    pub fn read_many<I, S>(&self, keys: I) -> BatchRead<Vec<u8>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.collect_many(keys, |key| self.read(key))
    }

    /// Store a serializable value as a binary payload.
    pub fn write_object<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let bytes = serde_json::to_vec(value).map_err(|e| CacheError::json(key, e))?;
        self.write(key, &bytes)
    }

    /// Load a value stored with [`ResultCache::write_object`].
    pub fn read_object<T: DeserializeOwned>(&self, key: &str) -> Result<T, CacheError> {
        let bytes = self.read(key)?;
        serde_json::from_slice(&bytes).map_err(|e| CacheError::json(key, e))
    }

    /// Load several values; a bad entry does not abort the batch.
    pub fn read_objects<T, I, S>(&self, keys: I) -> BatchRead<T>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.collect_many(keys, |key| self.read_object(key))
    }

    fn collect_many<T, I, S, F>(&self, keys: I, mut read: F) -> BatchRead<T>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
        F: FnMut(&str) -> Result<T, CacheError>,
    {
        let mut batch = BatchRead {
            results: Vec::new(),
            ok_keys: Vec::new(),
            failed_keys: Vec::new(),
        };
        for key in keys {
            let key = key.as_ref();
            match read(key) {
                Ok(value) => {
                    batch.results.push(value);
                    batch.ok_keys.push(key.to_string());
                }
                Err(e) => {
                    warn!("Loading {key} failed: {e}");
                    batch.failed_keys.push(key.to_string());
                }
            }
        }
        batch
    }

    /// Store human-browsable structured text under `<key>.json`.
    pub fn write_text<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), CacheError> {
        let file = format!("{key}{TEXT_EXTENSION}");
        let path = self.path(&file)?;
        debug!("Writing to cache (json): \"{file}\"");
        let text = serde_json::to_string_pretty(value).map_err(|e| CacheError::json(key, e))?;
        fs::create_dir_all(&self.root).map_err(|e| CacheError::io(key, e))?;
        fs::write(path, text).map_err(|e| CacheError::io(key, e))
    }

    /// Load structured text stored with [`ResultCache::write_text`].
    pub fn read_text<T: DeserializeOwned>(&self, key: &str) -> Result<T, CacheError> {
        let file = format!("{key}{TEXT_EXTENSION}");
        let path = self.path(&file)?;
        let text = fs::read_to_string(path).map_err(|e| CacheError::io(&file, e))?;
        serde_json::from_str(&text).map_err(|e| CacheError::json(&file, e))
    }

    /// All entry names (sidecars keep their `.json` extension).
    pub fn list_keys(&self) -> Result<BTreeSet<String>, CacheError> {
        let root = self.root.display().to_string();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeSet::new()),
            Err(e) => return Err(CacheError::io(&root, e)),
        };

        let mut keys = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::io(&root, e))?;
            if entry.path().is_file()
                && let Some(name) = entry.file_name().to_str()
            {
                keys.insert(name.to_string());
            }
        }
        Ok(keys)
    }

    /// Delete every entry whose name starts with `prefix`.
    pub fn delete_by_prefix(&self, prefix: &str) -> Result<DeleteSummary, CacheError> {
        let summary = self.delete_where(|name| name.starts_with(prefix))?;
        info!(
            "Removed from cache all files starting with {prefix}: {} files, {} errors",
            summary.deleted, summary.errors
        );
        Ok(summary)
    }

    /// Delete every entry whose name contains `pattern`.
    pub fn delete_matching(&self, pattern: &str) -> Result<DeleteSummary, CacheError> {
        let summary = self.delete_where(|name| name.contains(pattern))?;
        info!(
            "Removed from cache all files containing {pattern}: {} files, {} errors",
            summary.deleted, summary.errors
        );
        Ok(summary)
    }

    /// Delete all classifier-projection artifacts.
    pub fn delete_classifier_projections(&self) -> Result<DeleteSummary, CacheError> {
        self.delete_matching(ArtifactRole::ClassifierProjection.tag())
    }

    fn delete_where<F: Fn(&str) -> bool>(&self, predicate: F) -> Result<DeleteSummary, CacheError> {
        let mut summary = DeleteSummary::default();
        for name in self.list_keys()? {
            if !predicate(&name) {
                continue;
            }
            match fs::remove_file(self.root.join(&name)) {
                Ok(()) => summary.deleted += 1,
                Err(e) => {
                    warn!("Cannot remove from cache: {name}: {e}");
                    summary.errors += 1;
                }
            }
        }
        Ok(summary)
    }

    /// Delete the whole cache directory. The handle stays usable.
    pub fn clear(&self) -> Result<(), CacheError> {
        info!("Clearing cache {}", self.root.display());
        let root = self.root.display().to_string();
        match fs::remove_dir_all(&self.root) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(CacheError::io(&root, e)),
        }
        fs::create_dir_all(&self.root).map_err(|e| CacheError::io(&root, e))
    }

    /// Browse all `_args` sidecars, grouped by role.
    ///
    /// Entries with missing or unreadable companions are logged and skipped.
    pub fn content(&self) -> Result<CacheContent, CacheError> {
        let suffix = format!("{ARGS_SUFFIX}{TEXT_EXTENSION}");
        let mut content = CacheContent::default();

        for file in self.list_keys()? {
            let Some(key) = file.strip_suffix(&suffix) else {
                continue;
            };

            let args: Value = match self.read_text(&args_key(key)) {
                Ok(args) => args,
                Err(e) => {
                    warn!("Some related files may be missing for {file}: {e}");
                    continue;
                }
            };

            let mut listing = CacheListing {
                file: file.clone(),
                args,
                scores: None,
            };

            match ArtifactRole::of_key(key) {
                Some(ArtifactRole::ClassifierProjection) => {
                    content.classifier_projections.push(listing)
                }
                Some(ArtifactRole::Projection) => content.projections.push(listing),
                Some(ArtifactRole::Classifier) => match self.read_text(&scores_key(key)) {
                    Ok(scores) => {
                        listing.scores = Some(scores);
                        content.classifiers.push(listing);
                    }
                    Err(e) => warn!("Some related files may be missing for {file}: {e}"),
                },
                None if key.starts_with(DATA_PREFIX) => content.datasets.push(listing),
                None => debug!("Ignoring unrelated sidecar {file}"),
            }
        }
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn open() -> (tempfile::TempDir, ResultCache) {
        let dir = tempdir().unwrap();
        let cache = ResultCache::open(dir.path().join("cache")).unwrap();
        (dir, cache)
    }

    #[test]
    fn test_write_read_exists() {
        let (_dir, cache) = open();
        assert!(!cache.exists("a"));
        cache.write("a", b"payload").unwrap();
        assert!(cache.exists("a"));
        assert_eq!(cache.read("a").unwrap(), b"payload");
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let (_dir, cache) = open();
        assert!(matches!(cache.read("missing"), Err(CacheError::NotFound(_))));
    }

    #[test]
    fn test_invalid_keys() {
        let (_dir, cache) = open();
        for key in ["", "..", "a/b", "a\\b"] {
            assert!(matches!(
                cache.write(key, b"x"),
                Err(CacheError::InvalidKey(_))
            ));
            assert!(!cache.exists(key));
        }
    }

    #[test]
    fn test_read_many_tolerates_bad_entries() {
        let (_dir, cache) = open();
        cache.write("good1", b"1").unwrap();
        cache.write("good2", b"2").unwrap();
        fs::write(cache.root().join("corrupt"), b"garbage").unwrap();

        let batch = cache.read_many(["good1", "missing", "corrupt", "good2"]);
        assert_eq!(batch.results, vec![b"1".to_vec(), b"2".to_vec()]);
        assert_eq!(batch.ok_keys, vec!["good1", "good2"]);
        assert_eq!(batch.failed_keys, vec!["missing", "corrupt"]);
    }

    #[test]
    fn test_objects_and_text() {
        let (_dir, cache) = open();
        cache.write_object("obj", &json!({"accuracy": 0.75})).unwrap();
        let value: Value = cache.read_object("obj").unwrap();
        assert_eq!(value["accuracy"], json!(0.75));

        cache.write_text("obj_args", &json!({"method": "naive"})).unwrap();
        assert!(cache.root().join("obj_args.json").is_file());
        let args: Value = cache.read_text("obj_args").unwrap();
        assert_eq!(args["method"], json!("naive"));
    }

    #[test]
    fn test_delete_by_prefix() {
        let (_dir, cache) = open();
        cache.write("data_x__clf_1", b"").unwrap();
        cache.write_text("data_x__clf_1_args", &json!({})).unwrap();
        cache.write("data_x__proj_2", b"").unwrap();
        cache.write("data_y__clf_3", b"").unwrap();

        let summary = cache.delete_by_prefix("data_x__clf_1").unwrap();
        assert_eq!(summary, DeleteSummary { deleted: 2, errors: 0 });

        let keys = cache.list_keys().unwrap();
        assert_eq!(
            keys.into_iter().collect::<Vec<_>>(),
            vec!["data_x__proj_2", "data_y__clf_3"]
        );
    }

    #[test]
    fn test_delete_classifier_projections() {
        let (_dir, cache) = open();
        cache.write("data_x__clf_proj_1", b"").unwrap();
        cache.write("data_y__clf_proj_2", b"").unwrap();
        cache.write("data_x__clf_3", b"").unwrap();

        let summary = cache.delete_classifier_projections().unwrap();
        assert_eq!(summary.deleted, 2);
        assert!(cache.exists("data_x__clf_3"));
    }

    #[test]
    fn test_clear_keeps_handle_usable() {
        let (_dir, cache) = open();
        cache.write("a", b"1").unwrap();
        cache.clear().unwrap();
        assert!(cache.list_keys().unwrap().is_empty());
        cache.write("b", b"2").unwrap();
        assert!(cache.exists("b"));
    }

    #[test]
    fn test_role_of_key() {
        let clf = artifact_key("data_d", ArtifactRole::Classifier, "c");
        let proj = artifact_key("data_d", ArtifactRole::Projection, "p");
        let clf_proj = artifact_key("data_d", ArtifactRole::ClassifierProjection, "cp");

        assert_eq!(clf, "data_d__clf_c");
        assert_eq!(ArtifactRole::of_key(&clf), Some(ArtifactRole::Classifier));
        assert_eq!(ArtifactRole::of_key(&proj), Some(ArtifactRole::Projection));
        assert_eq!(
            ArtifactRole::of_key(&clf_proj),
            Some(ArtifactRole::ClassifierProjection)
        );
        assert_eq!(ArtifactRole::of_key("data_d"), None);
    }

    #[test]
    fn test_content_groups_by_role() {
        let (_dir, cache) = open();
        let clf = artifact_key("data_d", ArtifactRole::Classifier, "c");
        let proj = artifact_key("data_d", ArtifactRole::Projection, "p");
        let orphan = artifact_key("data_d", ArtifactRole::Classifier, "orphan");

        cache.write_text("data_d_args", &json!({"dataset": "iris"})).unwrap();
        cache.write_text(&args_key(&clf), &json!({"method": "naive"})).unwrap();
        cache.write_text(&scores_key(&clf), &json!({"accuracy": 1.0})).unwrap();
        cache.write_text(&args_key(&proj), &json!({"method": "pca"})).unwrap();
        // Missing scores sidecar
        cache.write_text(&args_key(&orphan), &json!({"method": "naive"})).unwrap();

        let content = cache.content().unwrap();
        assert_eq!(content.datasets.len(), 1);
        assert_eq!(content.classifiers.len(), 1);
        assert_eq!(content.classifiers[0].scores, Some(json!({"accuracy": 1.0})));
        assert_eq!(content.projections.len(), 1);
        assert!(content.classifier_projections.is_empty());
    }
}
