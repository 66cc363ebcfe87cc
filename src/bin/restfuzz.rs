use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use restfuzz::args::Args;
use restfuzz::runner;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let (report, artifacts) = runner::run(&args).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.summary());
        println!("{}", report.metrics.format_report());
        println!("report: {}", artifacts.report_path.display());
        if let Some(path) = &artifacts.corpus_path {
            println!("corpus: {}", path.display());
        }
        if let Some(path) = &artifacts.iteration_log {
            println!("iteration log: {}", path.display());
        }
    }
    Ok(())
}
