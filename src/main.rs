use anyhow::{Context, Result};
use clap::Parser;
use classpath_scan::cli::{Cli, Commands, OutputFormat};
use classpath_scan::config::{ClasspathEntry, ScanSettings, ScanSpec, parse_classpath};
use classpath_scan::{ClasspathScanner, ElementReport, LogNode, ScanResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let mut settings = ScanSettings::load(cli.config.as_deref())?;
    if let Some(threads) = cli.threads {
        settings.threads = threads;
    }

    match cli.command {
        Commands::Scan {
            entries,
            classpath,
            format,
            match_ext,
            log,
        } => {
            let entries = resolve_entries(entries, classpath)?;
            let matched: Arc<Mutex<Vec<MatchedResource>>> = Arc::default();
            let mut spec = ScanSpec::new(settings);
            for ext in &match_ext {
                let sink = Arc::clone(&matched);
                spec.match_filename_extension(ext, move |resource, _, len| {
                    sink.lock().push(MatchedResource {
                        element: resource.element().to_path_buf(),
                        relative_path: resource.relative_path().to_string(),
                        size: len,
                    });
                    Ok(())
                });
            }

            let scanner = ClasspathScanner::new(spec);
            let log_root = log.then(|| LogNode::root("classpath scan"));
            let result = scanner
                .scan(&entries, log_root.as_ref())
                .context("Classpath scan failed")?;
            if let Some(root) = log_root.as_ref() {
                root.add_elapsed_time();
                eprint!("{root}");
            }

            let mut matched_resources = std::mem::take(&mut *matched.lock());
            matched_resources.sort_by(|a, b| {
                a.relative_path
                    .cmp(&b.relative_path)
                    .then_with(|| a.element.cmp(&b.element))
            });
            write_scan_output(&result, &matched_resources, format)?;
        }
        Commands::Elements { entries, classpath } => {
            let entries = resolve_entries(entries, classpath)?;
            let scanner = ClasspathScanner::new(ScanSpec::new(settings));
            let elements = scanner.open_classpath(&entries, None)?;
            let reports: Vec<ElementReport> = elements.iter().map(ElementReport::from).collect();
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Positional entries first, then `--classpath`, then `$CLASSPATH`.
fn resolve_entries(entries: Vec<PathBuf>, classpath: Option<String>) -> Result<Vec<ClasspathEntry>> {
    let mut resolved: Vec<ClasspathEntry> = entries.into_iter().map(ClasspathEntry::new).collect();
    if let Some(cp) = classpath {
        resolved.extend(parse_classpath(&cp));
    }
    if resolved.is_empty()
        && let Ok(cp) = std::env::var("CLASSPATH")
    {
        resolved.extend(parse_classpath(&cp));
    }
    if resolved.is_empty() {
        anyhow::bail!("No classpath entries given (pass ENTRY arguments, --classpath or set CLASSPATH)");
    }
    Ok(resolved)
}

#[derive(Debug, Serialize)]
struct MatchedResource {
    element: PathBuf,
    relative_path: String,
    size: u64,
}

#[derive(Serialize)]
struct ScanOutput<'a> {
    #[serde(flatten)]
    result: &'a ScanResult,
    matched_resources: &'a [MatchedResource],
}

fn write_scan_output(result: &ScanResult, matched: &[MatchedResource], format: OutputFormat) -> Result<()> {
    let content = match format {
        OutputFormat::Json => serde_json::to_string_pretty(&ScanOutput {
            result,
            matched_resources: matched,
        })?,
        OutputFormat::Text => {
            let mut out = String::new();
            for e in &result.elements {
                out.push_str(&format!(
                    "element: {} ({:?}, classes: {}, masked: {})\n",
                    e.location.display(),
                    e.kind,
                    e.class_matches,
                    e.masked
                ));
                if let Some(err) = e.open_error.as_deref() {
                    out.push_str(&format!("  error: {err}\n"));
                }
            }
            for c in &result.classes {
                out.push_str(&format!(
                    "class: {} extends {} [{}]\n",
                    c.class_name,
                    c.super_class.as_deref().unwrap_or("-"),
                    c.classpath_element.display()
                ));
            }
            for m in matched {
                out.push_str(&format!(
                    "match: {} ({} bytes) [{}]\n",
                    m.relative_path,
                    m.size,
                    m.element.display()
                ));
            }
            out.push_str(&format!("duration_ms: {}\n", result.duration_ms));
            out
        }
    };

    print!("{content}");
    if !content.ends_with('\n') {
        println!();
    }
    Ok(())
}
