//! Classpath elements: one directory tree or one archive on the classpath,
//! together with the resources found in it.

mod archive;
mod dir;

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use crate::config::{ClasspathEntry, ProcessorId, ScanSpec};
use crate::error::ScanError;
use crate::interrupt::InterruptionChecker;
use crate::log::LogNode;
use crate::resource::Resource;

use archive::ArchiveHandle;

pub use archive::manifest_class_path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Directory,
    Archive,
    /// The location could not be inspected at all.
    Unknown,
}

enum Container {
    Directory,
    Archive(ArchiveHandle),
    Unavailable,
}

/// Resources accumulated during the single traversal pass of an element.
#[derive(Debug, Default)]
pub(crate) struct Matches {
    pub(crate) class_matches: Vec<Resource>,
    pub(crate) file_matches: BTreeMap<ProcessorId, Vec<Resource>>,
}

impl Matches {
    /// Tests `resource` against the class-definition predicate and every
    /// registered processor, appending it to each list that matches.
    pub(crate) fn record(&mut self, resource: Resource, spec: &ScanSpec, log: Option<&LogNode>) {
        let rel = resource.relative_path();
        for processor in spec.processors() {
            if processor.matches(rel) {
                if let Some(log) = log {
                    log.log(format!("Found match for {}: {rel}", processor.description));
                }
                self.file_matches
                    .entry(processor.id)
                    .or_default()
                    .push(resource.clone());
            }
        }
        if spec.is_class_definition(rel) {
            if let Some(log) = log {
                log.log(format!("Found class definition {rel}"));
            }
            self.class_matches.push(resource);
        }
    }
}

pub struct ClasspathElement {
    location: Arc<Path>,
    kind: ElementKind,
    scan_files: bool,
    container: Container,
    open_error: Option<ScanError>,
    pub(crate) matches: Matches,
    pub(crate) masked_count: usize,
    child_entries: Vec<ClasspathEntry>,
    last_modified: HashMap<PathBuf, SystemTime>,
}

impl ClasspathElement {
    /// Inspects `entry` once to pick the directory or archive variant, opens it
    /// and, if the entry scans files, traverses it.
    ///
    /// Failure to classify or open the location is recorded on the returned
    /// element. Only cancellation escapes as an error.
    pub fn new_instance(
        entry: &ClasspathEntry,
        spec: &ScanSpec,
        checker: &InterruptionChecker,
        log: Option<&LogNode>,
    ) -> Result<Self, ScanError> {
        checker.check()?;
        let location: Arc<Path> = Arc::from(
            std::fs::canonicalize(&entry.path)
                .unwrap_or_else(|_| entry.path.clone())
                .as_path(),
        );
        let mut element = ClasspathElement {
            location: location.clone(),
            kind: ElementKind::Unknown,
            scan_files: entry.scan_files,
            container: Container::Unavailable,
            open_error: None,
            matches: Matches::default(),
            masked_count: 0,
            child_entries: Vec::new(),
            last_modified: HashMap::new(),
        };

        let metadata = match std::fs::metadata(&location) {
            Ok(m) => m,
            Err(e) => {
                let err = ScanError::open(location.display(), e);
                if let Some(log) = log {
                    log.log_error(format!("Could not classify {}", location.display()), &err);
                }
                element.open_error = Some(err);
                return Ok(element);
            }
        };

        element.kind = if metadata.is_dir() {
            ElementKind::Directory
        } else {
            ElementKind::Archive
        };
        let node = log.map(|l| {
            l.log(format!(
                "Scanning {} {}",
                if metadata.is_dir() { "directory" } else { "jarfile" },
                location.display()
            ))
        });

        let outcome = element.open_and_traverse(spec, checker, node.as_ref(), metadata.modified().ok());
        if let Some(node) = node.as_ref() {
            node.add_elapsed_time();
        }
        match outcome {
            Ok(()) => Ok(element),
            Err(ScanError::Interrupted) => Err(ScanError::Interrupted),
            Err(err) => {
                if let Some(node) = node.as_ref() {
                    node.log_error("Could not open classpath element", &err);
                }
                element.matches = Matches::default();
                element.container = Container::Unavailable;
                element.open_error = Some(err);
                Ok(element)
            }
        }
    }

    fn open_and_traverse(
        &mut self,
        spec: &ScanSpec,
        checker: &InterruptionChecker,
        log: Option<&LogNode>,
        modified: Option<SystemTime>,
    ) -> Result<(), ScanError> {
        match self.kind {
            ElementKind::Directory => {
                dir::open(&self.location)?;
                if self.scan_files {
                    dir::traverse(
                        &self.location,
                        spec,
                        checker,
                        log,
                        &mut self.matches,
                        &mut self.last_modified,
                    )?;
                }
                self.container = Container::Directory;
            }
            ElementKind::Archive => {
                let handle = ArchiveHandle::open(&self.location)?;
                if let Some(mtime) = modified {
                    self.last_modified.insert(self.location.to_path_buf(), mtime);
                }
                let traversal = handle.traverse(&self.location, self.scan_files, spec, checker, log)?;
                self.matches = traversal.matches;
                let parent = self.location.parent().unwrap_or(Path::new(""));
                self.child_entries = traversal
                    .manifest_class_path
                    .iter()
                    .map(|p| ClasspathEntry::new(parent.join(p)))
                    .collect();
                self.container = Container::Archive(handle);
            }
            ElementKind::Unknown => {}
        }
        Ok(())
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    pub fn scan_files(&self) -> bool {
        self.scan_files
    }

    pub fn open_error(&self) -> Option<&ScanError> {
        self.open_error.as_ref()
    }

    pub fn io_error_on_open(&self) -> bool {
        self.open_error.is_some()
    }

    pub fn class_matches(&self) -> &[Resource] {
        &self.matches.class_matches
    }

    pub fn file_matches(&self) -> &BTreeMap<ProcessorId, Vec<Resource>> {
        &self.matches.file_matches
    }

    pub fn file_matches_for(&self, id: ProcessorId) -> &[Resource] {
        self.matches
            .file_matches
            .get(&id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of resources dropped because an earlier element claimed their path.
    pub fn masked_count(&self) -> usize {
        self.masked_count
    }

    /// Entries named by the archive manifest's `Class-Path` attribute.
    pub fn child_entries(&self) -> &[ClasspathEntry] {
        &self.child_entries
    }

    pub fn last_modified(&self) -> &HashMap<PathBuf, SystemTime> {
        &self.last_modified
    }

    /// Opens `resource` and hands its byte stream and length to `f`.
    pub fn with_resource_stream<T>(
        &self,
        resource: &Resource,
        f: impl FnOnce(&mut dyn Read, u64) -> T,
    ) -> Result<T, ScanError> {
        match (&self.container, resource) {
            (Container::Directory, Resource::InDirectory(r)) => {
                let file = std::fs::File::open(&r.path).map_err(|e| ScanError::open(resource, e))?;
                let len = file.metadata().map(|m| m.len()).unwrap_or(r.size);
                let mut reader = std::io::BufReader::new(file);
                Ok(f(&mut reader, len))
            }
            (Container::Archive(handle), Resource::InArchive(r)) => handle
                .with_entry(r.entry_index, f)
                .map_err(|e| ScanError::open(resource, e)),
            (Container::Unavailable, _) => Err(ScanError::open(
                resource,
                "classpath element is closed or was never opened",
            )),
            _ => Err(ScanError::InvalidState(format!(
                "{resource} does not belong to a {:?} element",
                self.kind
            ))),
        }
    }

    /// Releases the archive mapping. Resources can no longer be opened.
    pub fn close(&mut self) {
        self.container = Container::Unavailable;
    }
}

impl std::fmt::Display for ClasspathElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.location.display())
    }
}

impl std::fmt::Debug for ClasspathElement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClasspathElement")
            .field("location", &self.location)
            .field("kind", &self.kind)
            .field("scan_files", &self.scan_files)
            .field("open_error", &self.open_error)
            .field("class_matches", &self.matches.class_matches.len())
            .finish()
    }
}
