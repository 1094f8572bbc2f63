use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::resource::Resource;

pub const CONFIG_ENV: &str = "CLASSPATH_SCAN_CONFIG";

pub type PathPredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Invoked with the matched resource, an open stream over its bytes and the
/// resource length.
pub type FileMatchCallback =
    Arc<dyn Fn(&Resource, &mut dyn Read, u64) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScanSettings {
    pub threads: usize,
    pub min_chunk_size: usize,
    pub follow_manifest_class_path: bool,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
            min_chunk_size: 32,
            follow_manifest_class_path: true,
        }
    }
}

impl ScanSettings {
    /// Loads settings from `explicit`, then `$CLASSPATH_SCAN_CONFIG`, then the
    /// per-user config file. Missing files fall back to defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        if let Ok(p) = std::env::var(CONFIG_ENV) {
            return Self::from_file(Path::new(&p));
        }
        match default_config_path() {
            Some(path) if path.exists() => Self::from_file(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let settings: ScanSettings = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(settings.normalized())
    }

    pub fn normalized(mut self) -> Self {
        self.threads = self.threads.max(1);
        self.min_chunk_size = self.min_chunk_size.max(1);
        self
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("classpath-scan").join("config.json"))
}

/// Identity of a registered file-match processor: its registration index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessorId(pub usize);

#[derive(Clone)]
pub struct FileMatchProcessor {
    pub id: ProcessorId,
    pub description: String,
    predicate: PathPredicate,
    callback: FileMatchCallback,
}

impl FileMatchProcessor {
    pub fn matches(&self, relative_path: &str) -> bool {
        (self.predicate)(relative_path)
    }

    pub fn process(&self, resource: &Resource, input: &mut dyn Read, len: u64) -> anyhow::Result<()> {
        (self.callback)(resource, input, len)
    }
}

impl fmt::Debug for FileMatchProcessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileMatchProcessor")
            .field("id", &self.id)
            .field("description", &self.description)
            .finish()
    }
}

/// What to look for while traversing classpath elements.
#[derive(Clone)]
pub struct ScanSpec {
    pub settings: ScanSettings,
    class_predicate: PathPredicate,
    processors: Vec<FileMatchProcessor>,
}

impl Default for ScanSpec {
    fn default() -> Self {
        Self::new(ScanSettings::default())
    }
}

impl ScanSpec {
    pub fn new(settings: ScanSettings) -> Self {
        Self {
            settings: settings.normalized(),
            class_predicate: Arc::new(|p: &str| p.ends_with(".class")),
            processors: Vec::new(),
        }
    }

    pub fn with_class_predicate(
        mut self,
        predicate: impl Fn(&str) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.class_predicate = Arc::new(predicate);
        self
    }

    pub fn is_class_definition(&self, relative_path: &str) -> bool {
        (self.class_predicate)(relative_path)
    }

    pub fn processors(&self) -> &[FileMatchProcessor] {
        &self.processors
    }

    pub fn processor(&self, id: ProcessorId) -> Option<&FileMatchProcessor> {
        self.processors.get(id.0)
    }

    pub fn match_path_predicate(
        &mut self,
        description: impl Into<String>,
        predicate: impl Fn(&str) -> bool + Send + Sync + 'static,
        callback: impl Fn(&Resource, &mut dyn Read, u64) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> ProcessorId {
        let id = ProcessorId(self.processors.len());
        self.processors.push(FileMatchProcessor {
            id,
            description: description.into(),
            predicate: Arc::new(predicate),
            callback: Arc::new(callback),
        });
        id
    }

    pub fn match_filename_extension(
        &mut self,
        extension: &str,
        callback: impl Fn(&Resource, &mut dyn Read, u64) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> ProcessorId {
        let suffix = format!(".{}", extension.trim_start_matches('.'));
        self.match_path_predicate(
            format!("extension {suffix}"),
            move |p| p.ends_with(&suffix),
            callback,
        )
    }

    pub fn match_filename_path(
        &mut self,
        relative_path: &str,
        callback: impl Fn(&Resource, &mut dyn Read, u64) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> ProcessorId {
        let wanted = crate::resource::normalize_relative_path(relative_path);
        self.match_path_predicate(format!("path {wanted}"), move |p| p == wanted, callback)
    }

    pub fn match_path_prefix(
        &mut self,
        prefix: &str,
        callback: impl Fn(&Resource, &mut dyn Read, u64) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> ProcessorId {
        let prefix = prefix.trim_start_matches('/').to_string();
        self.match_path_predicate(
            format!("prefix {prefix}"),
            move |p| p.starts_with(&prefix),
            callback,
        )
    }
}

impl fmt::Debug for ScanSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScanSpec")
            .field("settings", &self.settings)
            .field("processors", &self.processors)
            .finish()
    }
}

/// One location on the ordered classpath.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClasspathEntry {
    pub path: PathBuf,
    pub scan_files: bool,
}

impl ClasspathEntry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: expand_home(path.into()),
            scan_files: true,
        }
    }

    pub fn without_scanning(path: impl Into<PathBuf>) -> Self {
        Self {
            scan_files: false,
            ..Self::new(path)
        }
    }
}

/// Splits a classpath string on the platform separator.
pub fn parse_classpath(classpath: &str) -> Vec<ClasspathEntry> {
    std::env::split_paths(classpath)
        .filter(|p| !p.as_os_str().is_empty())
        .map(ClasspathEntry::new)
        .collect()
}

fn expand_home(path: PathBuf) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path;
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!(
            "classpath_scan_test_{}_{}_{}",
            std::process::id(),
            nanos,
            name
        ))
    }

    #[test]
    fn settings_file_fills_missing_fields_with_defaults() -> Result<()> {
        let path = temp_path("settings.json");
        std::fs::write(&path, r#"{ "threads": 0, "follow_manifest_class_path": false }"#)?;

        let settings = ScanSettings::load(Some(&path))?;
        assert_eq!(settings.threads, 1);
        assert_eq!(settings.min_chunk_size, 32);
        assert!(!settings.follow_manifest_class_path);

        std::fs::remove_file(path)?;
        Ok(())
    }

    #[test]
    fn malformed_settings_file_is_an_error() {
        let path = temp_path("broken.json");
        std::fs::write(&path, "{ threads: ").unwrap();
        assert!(ScanSettings::from_file(&path).is_err());
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn processors_keep_registration_order() {
        let mut spec = ScanSpec::default();
        let a = spec.match_filename_extension("properties", |_, _, _| Ok(()));
        let b = spec.match_filename_path("/META-INF/services/x.Y", |_, _, _| Ok(()));
        let c = spec.match_path_prefix("static/", |_, _, _| Ok(()));

        assert_eq!((a, b, c), (ProcessorId(0), ProcessorId(1), ProcessorId(2)));
        assert!(spec.processors()[0].matches("a/b.properties"));
        assert!(spec.processors()[1].matches("META-INF/services/x.Y"));
        assert!(spec.processors()[2].matches("static/index.html"));
        assert!(!spec.processors()[2].matches("templates/index.html"));
    }

    #[test]
    fn default_class_predicate_matches_class_files() {
        let spec = ScanSpec::default();
        assert!(spec.is_class_definition("pkg/Foo.class"));
        assert!(!spec.is_class_definition("pkg/Foo.java"));

        let custom = ScanSpec::default().with_class_predicate(|p| p.starts_with("only/"));
        assert!(!custom.is_class_definition("pkg/Foo.class"));
    }

    #[test]
    fn parse_classpath_skips_empty_segments() {
        let joined = std::env::join_paths(["/a/classes", "", "/b/lib.jar"]).unwrap();
        let entries = parse_classpath(joined.to_str().unwrap());
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, PathBuf::from("/a/classes"));
        assert!(entries[1].scan_files);
    }

    #[test]
    fn tilde_expands_to_home() {
        if let Some(home) = dirs::home_dir() {
            let entry = ClasspathEntry::new("~/lib/a.jar");
            assert_eq!(entry.path, home.join("lib/a.jar"));
        }
        assert!(!ClasspathEntry::without_scanning("/x").scan_files);
    }
}
