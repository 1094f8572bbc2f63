//! "First occurrence on the classpath wins."
//!
//! Masking walks elements strictly in classpath order on one thread. Each
//! element drops resources whose relative path an earlier element already
//! claimed, then claims every path it matched before filtering.

use std::collections::HashSet;

use crate::element::ClasspathElement;
use crate::error::ScanError;
use crate::log::LogNode;
use crate::resource::Resource;

/// Relative paths claimed by the elements masked so far.
#[derive(Debug, Default)]
pub struct ClaimedPaths {
    paths: HashSet<String>,
}

impl ClaimedPaths {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, relative_path: &str) -> bool {
        self.paths.contains(relative_path)
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl ClasspathElement {
    /// Removes resources shadowed by `claimed` from every match list, then adds
    /// this element's paths to `claimed`. Returns how many list entries were
    /// removed.
    pub fn mask(&mut self, claimed: &mut ClaimedPaths, log: Option<&LogNode>) -> Result<usize, ScanError> {
        if !self.scan_files() {
            return Err(ScanError::InvalidState(format!(
                "cannot mask {}: element does not scan files",
                self.location().display()
            )));
        }

        let own_paths: HashSet<String> = self
            .matches
            .class_matches
            .iter()
            .chain(self.matches.file_matches.values().flatten())
            .map(|r| r.relative_path().to_string())
            .collect();
        let removed = {
            let masked: HashSet<&str> = own_paths
                .iter()
                .filter(|p| claimed.contains(p))
                .map(String::as_str)
                .collect();
            let mut removed = 0;
            if !masked.is_empty() {
                removed += retain_unmasked(&mut self.matches.class_matches, &masked, log);
                for list in self.matches.file_matches.values_mut() {
                    removed += retain_unmasked(list, &masked, log);
                }
                self.matches.file_matches.retain(|_, list| !list.is_empty());
            }
            removed
        };
        self.masked_count += removed;

        claimed.paths.extend(own_paths);
        Ok(removed)
    }
}

fn retain_unmasked(list: &mut Vec<Resource>, masked: &HashSet<&str>, log: Option<&LogNode>) -> usize {
    let before = list.len();
    list.retain(|resource| {
        let keep = !masked.contains(resource.relative_path());
        if !keep && let Some(log) = log {
            log.log(format!(
                "Ignoring duplicate path {} in classpath element {} -- it is masked by the same relative path occurring in an earlier classpath element",
                resource.relative_path(),
                resource.element().display()
            ));
        }
        keep
    });
    before - list.len()
}

/// Masks `elements` in order and returns the final claimed-path set.
/// Elements that do not scan files are skipped.
pub fn mask_classpath(
    elements: &mut [ClasspathElement],
    log: Option<&LogNode>,
) -> Result<ClaimedPaths, ScanError> {
    let mut claimed = ClaimedPaths::new();
    for element in elements.iter_mut().filter(|e| e.scan_files()) {
        element.mask(&mut claimed, log)?;
    }
    Ok(claimed)
}
