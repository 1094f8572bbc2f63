//! Scan orchestration.
//!
//! Phases, all on one rayon pool:
//!
//! 1. open and traverse every classpath entry in parallel, collected back in
//!    classpath order (manifest `Class-Path` children follow their parent);
//! 2. mask on the calling thread, in classpath order;
//! 3. decode class-definition ranges and call file-match processors
//!    concurrently;
//! 4. close every element.

use rayon::prelude::*;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::classfile::{ClassfileDecoder, ClassfileHeaderDecoder, StringInterner, UnlinkedClassInfo};
use crate::config::{ClasspathEntry, ScanSpec};
use crate::element::{ClasspathElement, ElementKind};
use crate::error::ScanError;
use crate::interrupt::InterruptionChecker;
use crate::log::LogNode;
use crate::mask::mask_classpath;
use crate::pipeline::{ParseContext, ResultSink, work_unit_ranges};

pub struct ClasspathScanner {
    spec: ScanSpec,
    decoder: Arc<dyn ClassfileDecoder>,
    checker: InterruptionChecker,
}

#[derive(Debug, Clone, Serialize)]
pub struct ElementReport {
    pub location: PathBuf,
    pub kind: ElementKind,
    pub scan_files: bool,
    pub open_error: Option<String>,
    pub class_matches: usize,
    pub file_matches: usize,
    pub masked: usize,
    pub children: Vec<PathBuf>,
}

impl From<&ClasspathElement> for ElementReport {
    fn from(element: &ClasspathElement) -> Self {
        Self {
            location: element.location().to_path_buf(),
            kind: element.kind(),
            scan_files: element.scan_files(),
            open_error: element.open_error().map(|e| e.to_string()),
            class_matches: element.class_matches().len(),
            file_matches: element.file_matches().values().map(Vec::len).sum(),
            masked: element.masked_count(),
            children: element
                .child_entries()
                .iter()
                .map(|c| c.path.clone())
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ScanResult {
    pub elements: Vec<ElementReport>,
    pub classes: Vec<UnlinkedClassInfo>,
    pub interned_strings: usize,
    pub file_matches_processed: usize,
    pub duration_ms: u64,
    #[serde(skip)]
    last_modified: HashMap<PathBuf, SystemTime>,
}

impl ScanResult {
    pub fn class_named(&self, name: &str) -> Option<&UnlinkedClassInfo> {
        self.classes.iter().find(|c| &*c.class_name == name)
    }

    pub fn classes_from(&self, element: &Path) -> impl Iterator<Item = &UnlinkedClassInfo> {
        self.classes
            .iter()
            .filter(move |c| &*c.classpath_element == element)
    }

    /// Latest modification time seen on any scanned file, directory or archive.
    pub fn classpath_contents_last_modified(&self) -> Option<SystemTime> {
        self.last_modified.values().max().copied()
    }

    /// True if any recorded path has disappeared or changed since the scan.
    pub fn classpath_contents_modified_since_scan(&self) -> bool {
        self.last_modified.iter().any(|(path, recorded)| {
            match path.metadata().and_then(|m| m.modified()) {
                Ok(now) => now > *recorded,
                Err(_) => true,
            }
        })
    }
}

impl ClasspathScanner {
    pub fn new(spec: ScanSpec) -> Self {
        Self::with_decoder(spec, Arc::new(ClassfileHeaderDecoder))
    }

    pub fn with_decoder(spec: ScanSpec, decoder: Arc<dyn ClassfileDecoder>) -> Self {
        Self {
            spec,
            decoder,
            checker: InterruptionChecker::new(),
        }
    }

    /// Shares an existing cancellation flag instead of the scanner's own.
    pub fn with_interruption_checker(mut self, checker: InterruptionChecker) -> Self {
        self.checker = checker;
        self
    }

    pub fn spec(&self) -> &ScanSpec {
        &self.spec
    }

    /// Handle that cancels a running scan from any thread.
    pub fn interruption_checker(&self) -> InterruptionChecker {
        self.checker.clone()
    }

    fn pool(&self) -> Result<rayon::ThreadPool, ScanError> {
        Ok(rayon::ThreadPoolBuilder::new()
            .num_threads(self.spec.settings.threads.max(1))
            .build()?)
    }

    /// Opens, traverses and masks `entries` without decoding anything.
    pub fn open_classpath(
        &self,
        entries: &[ClasspathEntry],
        log: Option<&LogNode>,
    ) -> Result<Vec<ClasspathElement>, ScanError> {
        self.pool()?.install(|| self.open_and_mask(entries, log))
    }

    pub fn scan(&self, entries: &[ClasspathEntry], log: Option<&LogNode>) -> Result<ScanResult, ScanError> {
        let start = Instant::now();
        self.pool()?.install(|| {
            let mut elements = self.open_and_mask(entries, log)?;
            let outcome = self.parse_and_dispatch(&elements, log);
            for element in elements.iter_mut() {
                element.close();
            }
            let (classes, interned_strings, file_matches_processed) = outcome?;

            let mut last_modified = HashMap::new();
            for element in &elements {
                last_modified.extend(element.last_modified().iter().map(|(p, t)| (p.clone(), *t)));
            }
            Ok(ScanResult {
                elements: elements.iter().map(ElementReport::from).collect(),
                classes,
                interned_strings,
                file_matches_processed,
                duration_ms: start.elapsed().as_millis() as u64,
                last_modified,
            })
        })
    }

    fn open_and_mask(
        &self,
        entries: &[ClasspathEntry],
        log: Option<&LogNode>,
    ) -> Result<Vec<ClasspathElement>, ScanError> {
        let node = log.map(|l| l.log(format!("Opening {} classpath entries", entries.len())));
        let mut seen = HashSet::new();
        let mut elements = self.open_elements(entries, &mut seen, node.as_ref())?;
        if let Some(node) = node.as_ref() {
            node.add_elapsed_time();
        }

        let node = log.map(|l| l.log("Masking classpath resources"));
        mask_classpath(&mut elements, node.as_ref())?;
        if let Some(node) = node.as_ref() {
            node.add_elapsed_time();
        }
        Ok(elements)
    }

    /// Opens `entries` in parallel and returns them in order, each followed by
    /// its manifest children. Locations already in `seen` are skipped.
    fn open_elements(
        &self,
        entries: &[ClasspathEntry],
        seen: &mut HashSet<PathBuf>,
        log: Option<&LogNode>,
    ) -> Result<Vec<ClasspathElement>, ScanError> {
        let fresh: Vec<&ClasspathEntry> = entries
            .iter()
            .filter(|e| seen.insert(canonical_key(&e.path)))
            .collect();

        let opened: Vec<ClasspathElement> = fresh
            .par_iter()
            .map(|entry| ClasspathElement::new_instance(entry, &self.spec, &self.checker, log))
            .collect::<Result<_, _>>()?;

        let mut ordered = Vec::with_capacity(opened.len());
        for element in opened {
            let children = if self.spec.settings.follow_manifest_class_path {
                element.child_entries().to_vec()
            } else {
                Vec::new()
            };
            ordered.push(element);
            if !children.is_empty() {
                ordered.extend(self.open_elements(&children, seen, log)?);
            }
        }
        Ok(ordered)
    }

    fn parse_and_dispatch(
        &self,
        elements: &[ClasspathElement],
        log: Option<&LogNode>,
    ) -> Result<(Vec<UnlinkedClassInfo>, usize, usize), ScanError> {
        let settings = &self.spec.settings;
        let units: Vec<(usize, std::ops::Range<usize>)> = elements
            .iter()
            .enumerate()
            .flat_map(|(i, e)| {
                work_unit_ranges(e.class_matches().len(), settings.threads, settings.min_chunk_size)
                    .into_iter()
                    .map(move |r| (i, r))
            })
            .collect();

        let interner = StringInterner::new();
        let results = ResultSink::new();
        let ctx = ParseContext {
            spec: &self.spec,
            decoder: self.decoder.as_ref(),
            interner: &interner,
            results: &results,
            checker: &self.checker,
        };
        let parse_node = log.map(|l| l.log(format!("Parsing classfiles in {} work units", units.len())));
        let dispatch_node = log.map(|l| l.log("Calling file-match processors"));

        let (parsed, dispatched) = rayon::join(
            || {
                units.into_par_iter().try_for_each(|(i, range)| {
                    elements[i]
                        .parse_class_files(range, &ctx, parse_node.as_ref())
                        .map(|_| ())
                })
            },
            || {
                elements
                    .par_iter()
                    .map(|e| e.call_file_match_processors(&self.spec, &self.checker, dispatch_node.as_ref()))
                    .collect::<Vec<_>>()
            },
        );
        for node in parse_node.iter().chain(dispatch_node.iter()) {
            node.add_elapsed_time();
        }
        parsed?;

        // Interruption wins; otherwise report the first callback failure in
        // classpath order once every element has finished.
        let mut processed = 0;
        let mut failure = None;
        for outcome in dispatched {
            match outcome {
                Ok(n) => processed += n,
                Err(ScanError::Interrupted) => return Err(ScanError::Interrupted),
                Err(err) => {
                    failure.get_or_insert(err);
                }
            }
        }
        if let Some(err) = failure {
            return Err(err);
        }

        let mut classes: Vec<UnlinkedClassInfo> = std::iter::from_fn(|| results.pop()).collect();
        classes.sort_by(|a, b| {
            a.class_name
                .cmp(&b.class_name)
                .then_with(|| a.classpath_element.cmp(&b.classpath_element))
        });
        Ok((classes, interner.len(), processed))
    }
}

fn canonical_key(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
