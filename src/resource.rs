use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One entry inside one classpath element.
///
/// `relative_path` is always forward-slash separated with no leading slash
/// and is the key used when masking across elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    InDirectory(DirectoryResource),
    InArchive(ArchiveResource),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryResource {
    pub element: Arc<Path>,
    pub relative_path: String,
    pub path: PathBuf,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveResource {
    pub element: Arc<Path>,
    pub relative_path: String,
    pub entry_index: usize,
    pub size: u64,
}

impl Resource {
    pub fn element(&self) -> &Path {
        match self {
            Resource::InDirectory(r) => &r.element,
            Resource::InArchive(r) => &r.element,
        }
    }

    pub fn relative_path(&self) -> &str {
        match self {
            Resource::InDirectory(r) => &r.relative_path,
            Resource::InArchive(r) => &r.relative_path,
        }
    }

    /// Uncompressed length in bytes as reported by the container.
    pub fn size(&self) -> u64 {
        match self {
            Resource::InDirectory(r) => r.size,
            Resource::InArchive(r) => r.size,
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::InDirectory(r) => write!(f, "{}/{}", r.element.display(), r.relative_path),
            Resource::InArchive(r) => write!(f, "{}!{}", r.element.display(), r.relative_path),
        }
    }
}

/// Normalizes a container path to the masking key form.
pub fn normalize_relative_path(raw: &str) -> String {
    let replaced = raw.replace('\\', "/");
    let mut parts: Vec<&str> = Vec::new();
    for part in replaced.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    parts.join("/")
}
