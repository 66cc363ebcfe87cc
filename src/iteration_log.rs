//! JSONL iteration log.

use anyhow::{Context, Result};
use parking_lot::Mutex;
use restfuzz_core::{IterationObserver, IterationRecord};
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Appends one JSON line per finished iteration.
#[derive(Debug)]
pub struct IterationLogger {
    path: PathBuf,
    file: Mutex<BufWriter<File>>,
}

impl IterationLogger {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open iteration log {}", path.display()))?;
        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self, record: &IterationRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let mut file = self.file.lock();
        writeln!(file, "{}", line)?;
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.file.lock().flush()?;
        Ok(())
    }
}

impl IterationObserver for IterationLogger {
    fn on_iteration(&self, record: &IterationRecord) {
        if let Err(e) = self.log(record) {
            tracing::warn!(path = %self.path.display(), error = %e, "failed to write iteration log");
        }
    }
}
