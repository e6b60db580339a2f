use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::{Result, StagegateError};
use crate::report::RunReport;

/// Local record of finished runs.
///
/// Uses one JSON file per pipeline in the platform data directory:
/// - Linux: `~/.local/share/stagegate/runs/{pipeline-slug}.json`
/// - macOS: `~/Library/Application Support/stagegate/runs/{pipeline-slug}.json`
pub struct RunHistory {
    dir: PathBuf,
    enabled: bool,
}

impl RunHistory {
    /// Opens the history store.
    ///
    /// `dir` overrides the platform data directory.
    ///
    /// # Errors
    ///
    /// Returns an error if no data directory can be determined or the
    /// directory cannot be created.
    pub fn new(dir: Option<&Path>, enabled: bool) -> Result<Self> {
        if !enabled {
            debug!("Run history disabled");
            return Ok(Self {
                dir: PathBuf::new(),
                enabled: false,
            });
        }

        let dir = match dir {
            Some(dir) => dir.to_path_buf(),
            None => default_dir()?,
        };

        fs::create_dir_all(&dir)?;
        debug!("Run history at: {}", dir.display());

        Ok(Self { dir, enabled: true })
    }

    fn file_for(&self, pipeline: &str) -> PathBuf {
        self.dir.join(format!("{}.json", slug(pipeline)))
    }

    /// Loads every stored run for `pipeline`, oldest first.
    ///
    /// A corrupt file is logged and treated as empty.
    fn load(&self, pipeline: &str) -> Vec<RunReport> {
        if !self.enabled {
            return Vec::new();
        }

        let file = self.file_for(pipeline);
        if !file.exists() {
            return Vec::new();
        }

        fs::read_to_string(&file)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok())
            .unwrap_or_else(|| {
                warn!("Failed to load run history {}, ignoring it", file.display());
                Vec::new()
            })
    }

    pub fn next_run_id(&self, pipeline: &str) -> u64 {
        self.load(pipeline).iter().map(|r| r.id).max().unwrap_or(0) + 1
    }

    /// Appends a finished run.
    ///
    /// # Errors
    ///
    /// Returns an error if the history file cannot be written.
    pub fn record(&self, report: &RunReport) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let mut runs = self.load(&report.pipeline);
        runs.push(report.clone());

        let file = self.file_for(&report.pipeline);
        fs::write(&file, serde_json::to_string(&runs)?)?;

        debug!("Saved run #{} to {}", report.id, file.display());
        Ok(())
    }

    /// Newest runs first, at most `limit` of them.
    pub fn list(&self, pipeline: &str, limit: usize) -> Vec<RunReport> {
        let mut runs = self.load(pipeline);
        runs.sort_by(|a, b| b.id.cmp(&a.id));
        runs.truncate(limit);
        runs
    }

    /// Removes the stored runs for `pipeline`.
    ///
    /// # Errors
    ///
    /// Returns an error if the history file exists but cannot be removed.
    pub fn clear(&self, pipeline: &str) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        let file = self.file_for(pipeline);
        if file.exists() {
            fs::remove_file(&file)?;
            info!("History cleared: {}", file.display());
        } else {
            info!("No history found for pipeline: {pipeline}");
        }

        Ok(())
    }
}

fn default_dir() -> Result<PathBuf> {
    Ok(dirs::data_dir()
        .ok_or_else(|| StagegateError::History("No data directory found".into()))?
        .join("stagegate")
        .join("runs"))
}

/// File-name form of a pipeline name, e.g. "Spring Boot CI" → "spring-boot-ci".
pub fn slug(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect()
}
