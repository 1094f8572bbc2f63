use ignore::WalkBuilder;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use super::Matches;
use crate::config::ScanSpec;
use crate::error::ScanError;
use crate::interrupt::InterruptionChecker;
use crate::log::LogNode;
use crate::resource::{DirectoryResource, Resource};

/// Fails unless the root directory itself can be listed. Entries below the
/// root that cannot be read are skipped during the walk instead.
pub(super) fn open(root: &Path) -> Result<(), ScanError> {
    std::fs::read_dir(root).map_err(|e| ScanError::open(root.display(), e))?;
    Ok(())
}

/// Walks the element directory in file-name order, recording every regular file.
pub(super) fn traverse(
    element: &Arc<Path>,
    spec: &ScanSpec,
    checker: &InterruptionChecker,
    log: Option<&LogNode>,
    matches: &mut Matches,
    last_modified: &mut HashMap<PathBuf, SystemTime>,
) -> Result<(), ScanError> {
    let root: &Path = element;
    let walker = WalkBuilder::new(root)
        .hidden(false)
        .ignore(false)
        .parents(false)
        .git_ignore(false)
        .git_global(false)
        .git_exclude(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .build();

    for entry in walker {
        checker.check()?;
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                if let Some(log) = log {
                    log.log_error(format!("Skipping unreadable entry under {}", root.display()), &e);
                }
                continue;
            }
        };

        let path = entry.path();
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if let Ok(mtime) = metadata.modified() {
            last_modified.insert(path.to_path_buf(), mtime);
        }
        if !metadata.is_file() {
            continue;
        }

        let Some(relative_path) = relative_path(root, path) else {
            continue;
        };
        let resource = Resource::InDirectory(DirectoryResource {
            element: element.clone(),
            relative_path,
            path: path.to_path_buf(),
            size: metadata.len(),
        });
        matches.record(resource, spec, log);
    }
    Ok(())
}

fn relative_path(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}
