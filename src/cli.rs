use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Debug, Clone, Parser)]
#[command(name = "classpath-scan")]
#[command(about = "Scan a JVM classpath, mask shadowed resources and decode class headers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, value_name = "N", global = true)]
    pub threads: Option<usize>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Commands {
    /// Decode every unmasked class file and call file matchers.
    Scan {
        #[arg(value_name = "ENTRY")]
        entries: Vec<PathBuf>,

        #[arg(long, value_name = "CP")]
        classpath: Option<String>,

        #[arg(short = 'f', long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,

        /// Report resources with this filename extension (repeatable).
        #[arg(long = "match-ext", value_name = "EXT")]
        match_ext: Vec<String>,

        /// Print the scan log to stderr.
        #[arg(long)]
        log: bool,
    },
    /// Classify and traverse entries without decoding.
    Elements {
        #[arg(value_name = "ENTRY")]
        entries: Vec<PathBuf>,

        #[arg(long, value_name = "CP")]
        classpath: Option<String>,
    },
}

#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum OutputFormat {
    Json,
    Text,
}
