use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Args {
    /// Endpoint catalog (JSON: `{"endpoints": [...]}` or a bare array).
    #[arg(long, value_name = "PATH")]
    pub catalog: PathBuf,

    /// Base URL of the system under test.
    #[arg(long, value_name = "URL")]
    pub base_url: String,

    /// JSON config file; flags below override its values.
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Iteration budget.
    #[arg(long)]
    pub iterations: Option<u64>,

    /// Time budget in seconds.
    #[arg(long, value_name = "SECS")]
    pub time: Option<u64>,

    /// Concurrent workers.
    #[arg(long)]
    pub workers: Option<usize>,

    /// RNG seed for reproducible scheduling.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Extra header sent with every request, `Name: value`. Repeatable.
    ///
    /// Example: `--header "Authorization: Bearer $TOKEN"`
    #[arg(long = "header", value_name = "HEADER")]
    pub headers: Vec<String>,

    /// Per-request timeout in milliseconds.
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,

    /// Also mutate with values outside the declared schemas.
    #[arg(long, default_value_t = false)]
    pub allow_schema_violations: bool,

    /// Output directory for the run (defaults to `$RESTFUZZ_HOME/runs`).
    #[arg(long, value_name = "DIR")]
    pub out_dir: Option<PathBuf>,

    /// Write the final corpus as JSON to this path.
    #[arg(long, value_name = "PATH")]
    pub export_corpus: Option<PathBuf>,

    /// Write one JSON line per iteration to this path.
    #[arg(long, value_name = "PATH")]
    pub iteration_log: Option<PathBuf>,

    /// Log filter (`info`, `debug`, `restfuzz_core=trace`, ...). `RUST_LOG` wins when set.
    #[arg(long, default_value = "info")]
    pub log: String,

    /// Print the report as JSON on stdout instead of a summary.
    #[arg(long, default_value_t = false)]
    pub json: bool,
}
