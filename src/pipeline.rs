//! Per-element work after masking: decoding class definitions over index
//! ranges and calling file-match processors.
//!
//! Both loops absorb resource-level failures (log and move on) and poll the
//! interruption checker after every resource.

use crossbeam::queue::SegQueue;
use std::ops::Range;

use crate::classfile::{ClassfileDecoder, StringInterner, UnlinkedClassInfo};
use crate::config::ScanSpec;
use crate::element::ClasspathElement;
use crate::error::ScanError;
use crate::interrupt::InterruptionChecker;
use crate::log::LogNode;

/// Unordered, append-only collection of decoded classes shared by all workers.
pub type ResultSink = SegQueue<UnlinkedClassInfo>;

/// Shared state every parsing unit needs.
pub struct ParseContext<'a> {
    pub spec: &'a ScanSpec,
    pub decoder: &'a dyn ClassfileDecoder,
    pub interner: &'a StringInterner,
    pub results: &'a ResultSink,
    pub checker: &'a InterruptionChecker,
}

impl ClasspathElement {
    /// Decodes the class-definition matches in `range`, appending each success
    /// to the result sink. Returns the number of classes decoded.
    ///
    /// Open and decode failures are logged and skipped. On interruption the
    /// rest of the range is abandoned; already appended results stay.
    pub fn parse_class_files(
        &self,
        range: Range<usize>,
        ctx: &ParseContext<'_>,
        log: Option<&LogNode>,
    ) -> Result<usize, ScanError> {
        let matches = self.class_matches();
        if range.start > range.end || range.end > matches.len() {
            return Err(ScanError::InvalidState(format!(
                "range {range:?} out of bounds for {} class matches in {}",
                matches.len(),
                self.location().display()
            )));
        }

        let mut decoded = 0;
        for resource in &matches[range] {
            ctx.checker.check()?;
            let node = log.map(|l| l.log(format!("Parsing classfile {resource}")));
            let outcome = self
                .with_resource_stream(resource, |input, _| {
                    ctx.decoder.decode(resource, input, ctx.spec, ctx.interner)
                })
                .and_then(|r| r);
            match outcome {
                Ok(info) => {
                    ctx.results.push(info);
                    decoded += 1;
                    if let Some(node) = node.as_ref() {
                        node.add_elapsed_time();
                    }
                }
                Err(err) if err.is_resource_level() => {
                    if let Some(node) = node.as_ref() {
                        node.log_error("Skipping classfile", &err);
                    }
                }
                Err(err) => return Err(err),
            }
        }
        ctx.checker.check()?;
        Ok(decoded)
    }

    /// Calls every registered processor, in registration order, on each of
    /// its unmasked matches. Returns the number of successful calls.
    ///
    /// A resource that cannot be opened is logged and skipped. A failing
    /// callback aborts the remaining dispatch for this element.
    pub fn call_file_match_processors(
        &self,
        spec: &ScanSpec,
        checker: &InterruptionChecker,
        log: Option<&LogNode>,
    ) -> Result<usize, ScanError> {
        let mut processed = 0;
        for (id, resources) in self.file_matches() {
            let Some(processor) = spec.processor(*id) else {
                return Err(ScanError::InvalidState(format!(
                    "no file-match processor registered as #{}",
                    id.0
                )));
            };
            for resource in resources {
                checker.check()?;
                let node = log.map(|l| l.log(format!("Calling match processor for {resource}")));
                let opened = self.with_resource_stream(resource, |input, len| {
                    processor.process(resource, input, len)
                });
                match opened {
                    Ok(Ok(())) => {
                        processed += 1;
                        if let Some(node) = node.as_ref() {
                            node.add_elapsed_time();
                        }
                    }
                    Ok(Err(source)) => {
                        return Err(ScanError::Execution {
                            resource: resource.to_string(),
                            source: source.into(),
                        });
                    }
                    Err(err) if err.is_resource_level() => {
                        if let Some(node) = node.as_ref() {
                            node.log_error("Could not open file", &err);
                        }
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        checker.check()?;
        Ok(processed)
    }
}

/// Splits `len` class matches into at most `workers` contiguous ranges of at
/// least `min_chunk` entries each.
pub fn work_unit_ranges(len: usize, workers: usize, min_chunk: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    let chunk = len.div_ceil(workers.max(1)).max(min_chunk.max(1));
    (0..len)
        .step_by(chunk)
        .map(|start| start..(start + chunk).min(len))
        .collect()
}
