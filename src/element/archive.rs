use memmap2::Mmap;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::Arc;
use zip::ZipArchive;
use zip::result::ZipResult;

use super::Matches;
use crate::config::ScanSpec;
use crate::error::ScanError;
use crate::interrupt::InterruptionChecker;
use crate::log::LogNode;
use crate::resource::{ArchiveResource, Resource, normalize_relative_path};

const MANIFEST_PATH: &str = "META-INF/MANIFEST.MF";

#[derive(Clone)]
struct MappedArchive(Arc<Mmap>);

impl AsRef<[u8]> for MappedArchive {
    fn as_ref(&self) -> &[u8] {
        &self.0[..]
    }
}

/// An open archive. Cloning the inner `ZipArchive` shares the parsed central
/// directory, so each reader gets its own cursor over the same mapping.
pub(super) struct ArchiveHandle {
    archive: ZipArchive<Cursor<MappedArchive>>,
}

pub(super) struct Traversal {
    pub(super) matches: Matches,
    pub(super) manifest_class_path: Vec<String>,
}

impl ArchiveHandle {
    pub(super) fn open(path: &Path) -> Result<Self, ScanError> {
        let file = File::open(path).map_err(|e| ScanError::open(path.display(), e))?;
        // SAFETY: The file is opened read-only and the mapping is kept alive by
        // the Arc for as long as any reader holds it.
        let mmap = unsafe { Mmap::map(&file) }.map_err(|e| ScanError::open(path.display(), e))?;
        let archive = ZipArchive::new(Cursor::new(MappedArchive(Arc::new(mmap))))
            .map_err(|e| ScanError::open(path.display(), e))?;
        Ok(Self { archive })
    }

    /// Lists entries in central-directory order. The manifest is always read
    /// so `Class-Path` children are known even when `scan_files` is off.
    pub(super) fn traverse(
        &self,
        element: &Arc<Path>,
        scan_files: bool,
        spec: &ScanSpec,
        checker: &InterruptionChecker,
        log: Option<&LogNode>,
    ) -> Result<Traversal, ScanError> {
        let mut archive = self.archive.clone();
        let mut traversal = Traversal {
            matches: Matches::default(),
            manifest_class_path: Vec::new(),
        };

        for index in 0..archive.len() {
            checker.check()?;
            let mut entry = match archive.by_index(index) {
                Ok(entry) => entry,
                Err(e) => {
                    if let Some(log) = log {
                        log.log_error(format!("Skipping entry #{index} of {}", element.display()), &e);
                    }
                    continue;
                }
            };
            if entry.is_dir() {
                continue;
            }
            let relative_path = normalize_relative_path(entry.name());
            if relative_path.is_empty() {
                continue;
            }

            if relative_path.eq_ignore_ascii_case(MANIFEST_PATH) {
                let mut text = String::new();
                match entry.read_to_string(&mut text) {
                    Ok(_) => traversal.manifest_class_path = manifest_class_path(&text),
                    Err(e) => {
                        if let Some(log) = log {
                            log.log_error(format!("Could not read manifest of {}", element.display()), &e);
                        }
                    }
                }
            }

            if scan_files {
                let resource = Resource::InArchive(ArchiveResource {
                    element: element.clone(),
                    relative_path,
                    entry_index: index,
                    size: entry.size(),
                });
                traversal.matches.record(resource, spec, log);
            }
        }
        Ok(traversal)
    }

    pub(super) fn with_entry<T>(
        &self,
        index: usize,
        f: impl FnOnce(&mut dyn Read, u64) -> T,
    ) -> ZipResult<T> {
        let mut archive = self.archive.clone();
        let mut entry = archive.by_index(index)?;
        let len = entry.size();
        Ok(f(&mut entry, len))
    }
}

/// Extracts the `Class-Path` attribute from the main section of a jar
/// manifest, honoring the 72-byte line continuation rule. Per-entry sections
/// after the first blank line are ignored. Paths lose any `file:` scheme and
/// have `%XX` escapes decoded.
pub fn manifest_class_path(manifest: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for raw in manifest.lines() {
        let raw = raw.trim_end_matches('\r');
        if raw.is_empty() {
            break;
        }
        match raw.strip_prefix(' ') {
            Some(cont) => {
                if let Some(last) = lines.last_mut() {
                    last.push_str(cont);
                }
            }
            None => lines.push(raw.to_string()),
        }
    }

    lines
        .iter()
        .filter_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim().eq_ignore_ascii_case("Class-Path").then_some(value)
        })
        .flat_map(|value| value.split_whitespace())
        .map(|item| percent_decode(item.strip_prefix("file:").unwrap_or(item)))
        .filter(|item| !item.is_empty())
        .collect()
}

/// Decodes `%XX` escapes. Malformed escapes are kept as written.
fn percent_decode(item: &str) -> String {
    let bytes = item.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%'
            && let Some(Ok(decoded)) = bytes.get(i + 1..i + 3).map(hex::decode)
        {
            out.extend_from_slice(&decoded);
            i += 3;
            continue;
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
