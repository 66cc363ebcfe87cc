//! CLI run orchestration: configuration layering, engine setup and artifacts.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use restfuzz_core::{FuzzConfig, FuzzEngine, FuzzReport, TestCase};
use restfuzz_transport::http::parse_header_line;
use restfuzz_transport::HttpTransport;
use restfuzz_types::{env_list, EndpointCatalog};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::args::Args;
use crate::iteration_log::IterationLogger;
use crate::paths::default_paths;

/// Files written by one run.
#[derive(Debug, Clone)]
pub struct RunArtifacts {
    pub run_dir: PathBuf,
    pub report_path: PathBuf,
    pub corpus_path: Option<PathBuf>,
    pub iteration_log: Option<PathBuf>,
}

/// Defaults, then `--config`, then `RESTFUZZ_*`, then flags.
pub fn build_config(args: &Args) -> Result<FuzzConfig> {
    let mut config = match &args.config {
        Some(path) => FuzzConfig::from_path(path)?,
        None => FuzzConfig::default(),
    }
    .apply_env();

    if let Some(n) = args.iterations {
        config.max_iterations = Some(n);
    }
    if let Some(secs) = args.time {
        config.time_budget_secs = Some(secs);
        if args.iterations.is_none() {
            config.max_iterations = None;
        }
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(ms) = args.timeout_ms {
        config.request_timeout_ms = ms;
    }
    if args.allow_schema_violations {
        config.allow_schema_violations = true;
    }
    config.validate()?;
    Ok(config)
}

/// Extra headers: `RESTFUZZ_HEADERS` entries first, then `--header` flags, so
/// a flag wins over an environment entry of the same name.
pub fn header_lines(args: &Args) -> Result<Vec<String>> {
    let from_env = env_list("RESTFUZZ_HEADERS");
    for line in &from_env {
        if parse_header_line(line).is_none() {
            return Err(anyhow!(
                "invalid RESTFUZZ_HEADERS entry '{}', expected 'Name: value'",
                line
            ));
        }
    }
    for line in &args.headers {
        if parse_header_line(line).is_none() {
            return Err(anyhow!("invalid --header '{}', expected 'Name: value'", line));
        }
    }
    Ok(from_env.into_iter().chain(args.headers.iter().cloned()).collect())
}

pub fn build_transport(args: &Args, config: &FuzzConfig) -> Result<HttpTransport> {
    if !args.base_url.starts_with("http://") && !args.base_url.starts_with("https://") {
        return Err(anyhow!(
            "--base-url must start with http:// or https://, got '{}'",
            args.base_url
        ));
    }
    let headers = header_lines(args)?;
    let timeout = config.request_timeout();
    let connect = timeout.min(Duration::from_secs(10));
    Ok(HttpTransport::with_timeouts(&args.base_url, timeout, connect)
        .with_header_lines(headers.iter().map(String::as_str)))
}

pub async fn run(args: &Args) -> Result<(FuzzReport, RunArtifacts)> {
    let config = build_config(args)?;
    let catalog = Arc::new(EndpointCatalog::from_path(&args.catalog)?);
    let transport = Arc::new(build_transport(args, &config)?);

    let out_dir = args
        .out_dir
        .clone()
        .unwrap_or_else(|| default_paths().runs_dir());
    let run_dir = out_dir.join(Utc::now().format("%Y%m%d-%H%M%S-%3f").to_string());
    fs::create_dir_all(&run_dir).with_context(|| format!("create {}", run_dir.display()))?;

    let logger = match &args.iteration_log {
        Some(path) => Some(Arc::new(IterationLogger::create(path)?)),
        None => None,
    };

    info!(
        catalog = %args.catalog.display(),
        endpoints = catalog.len(),
        base_url = %args.base_url,
        run_dir = %run_dir.display(),
        "loaded catalog"
    );

    let mut engine = FuzzEngine::new(catalog, transport, config);
    if let Some(logger) = &logger {
        engine = engine.with_observer(logger.clone());
    }
    let report = engine.run().await?;
    if let Some(logger) = &logger {
        logger.flush()?;
    }

    let report_path = run_dir.join("report.json");
    write_json(&report_path, &report)?;

    let corpus_path = match &args.export_corpus {
        Some(path) => {
            export_corpus(path, &engine.corpus_snapshot())?;
            Some(path.clone())
        }
        None => None,
    };

    Ok((
        report,
        RunArtifacts {
            run_dir,
            report_path,
            corpus_path,
            iteration_log: logger.map(|l| l.path().to_path_buf()),
        },
    ))
}

/// Write the corpus as a JSON array of test cases.
pub fn export_corpus(path: &Path, cases: &[TestCase]) -> Result<()> {
    write_json(path, &cases)?;
    info!(path = %path.display(), cases = cases.len(), "exported corpus");
    Ok(())
}

fn write_json<T: serde::Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec![
            "restfuzz",
            "--catalog",
            "catalog.json",
            "--base-url",
            "http://localhost:8080",
        ];
        argv.extend_from_slice(extra);
        Args::parse_from(argv)
    }

    #[test]
    fn test_flags_override_defaults() {
        let config = build_config(&args(&["--iterations", "7", "--workers", "2", "--seed", "9"]))
            .unwrap();
        assert_eq!(config.max_iterations, Some(7));
        assert_eq!(config.workers, 2);
        assert_eq!(config.seed, 9);
    }

    #[test]
    fn test_time_flag_lifts_default_iteration_budget() {
        let config = build_config(&args(&["--time", "30"])).unwrap();
        assert_eq!(config.time_budget_secs, Some(30));
        assert_eq!(config.max_iterations, None);
    }

    #[test]
    fn test_rejects_zero_workers_and_bad_headers() {
        assert!(build_config(&args(&["--workers", "0"])).is_err());
        let a = args(&["--header", "no-colon"]);
        assert!(build_transport(&a, &FuzzConfig::default()).is_err());
    }

    #[test]
    fn test_env_headers_precede_flags() {
        std::env::set_var("RESTFUZZ_HEADERS", "Authorization: Bearer env, X-Tenant: 7");
        let lines = header_lines(&args(&["--header", "Authorization: Bearer flag"])).unwrap();
        assert_eq!(
            lines,
            vec!["Authorization: Bearer env", "X-Tenant: 7", "Authorization: Bearer flag"]
        );

        std::env::set_var("RESTFUZZ_HEADERS", "broken");
        assert!(header_lines(&args(&[])).is_err());
        std::env::remove_var("RESTFUZZ_HEADERS");
    }

    #[test]
    fn test_rejects_non_http_base_url() {
        let a = Args::parse_from([
            "restfuzz",
            "--catalog",
            "c.json",
            "--base-url",
            "ftp://example",
        ]);
        assert!(build_transport(&a, &FuzzConfig::default()).is_err());
    }
}
