use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct RestfuzzPaths {
    base: PathBuf,
}

impl RestfuzzPaths {
    pub fn from_base(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    pub fn base_dir(&self) -> PathBuf {
        self.base.clone()
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.base.join("runs")
    }
}

/// `$RESTFUZZ_HOME`, else `~/.restfuzz`.
pub fn default_paths() -> RestfuzzPaths {
    let base = std::env::var("RESTFUZZ_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".restfuzz")
        });
    RestfuzzPaths::from_base(base)
}
