//! # classpath-scan
//!
//! Scans an ordered JVM classpath (directories and jars), keeps only the first
//! occurrence of every relative path, and decodes the surviving class files on
//! a worker pool.
//!
//! ## Architecture
//!
//! - **resource**: a single entry inside a directory or archive
//! - **element**: one classpath location plus the resources matched in it
//! - **mask**: earlier classpath elements shadow later ones
//! - **pipeline**: range-partitioned class decoding and file-match dispatch
//! - **classfile**: decoder interface, string interning and a header decoder
//! - **scanner**: phase orchestration on a rayon pool
//! - **interrupt**: cooperative cancellation
//! - **log**: hierarchical scan log mirrored to `tracing`
//! - **config**: settings, scan spec and classpath parsing

pub mod classfile;
pub mod cli;
pub mod config;
pub mod element;
pub mod error;
pub mod interrupt;
pub mod log;
pub mod mask;
pub mod pipeline;
pub mod resource;
pub mod scanner;

pub use classfile::{ClassfileDecoder, ClassfileHeaderDecoder, StringInterner, UnlinkedClassInfo};
pub use config::{ClasspathEntry, ProcessorId, ScanSettings, ScanSpec};
pub use element::{ClasspathElement, ElementKind};
pub use error::ScanError;
pub use interrupt::InterruptionChecker;
pub use log::LogNode;
pub use resource::Resource;
pub use scanner::{ClasspathScanner, ElementReport, ScanResult};
