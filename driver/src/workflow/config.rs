use anyhow::Context;
use lidarcore::config::{AtmosphereSource, PipelineConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// One deployment: where the organized sessions live, where results go, and
/// the per-instrument pipeline coefficients.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub workers: usize,
    pub pipeline: PipelineConfig,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            output_dir: PathBuf::from("output"),
            workers: 4,
            pipeline: PipelineConfig::default(),
        }
    }
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    /// Command-line values win over the workflow file; absent ones keep it.
    pub fn with_overrides(
        mut self,
        data_dir: Option<PathBuf>,
        output_dir: Option<PathBuf>,
        workers: Option<usize>,
    ) -> Self {
        if let Some(dir) = data_dir {
            self.data_dir = dir;
        }
        if let Some(dir) = output_dir {
            self.output_dir = dir;
        }
        if let Some(workers) = workers {
            self.workers = workers;
        }
        self.workers = self.workers.max(1);
        self
    }

    /// Switches the molecular atmosphere source; the sounding directory only
    /// replaces the configured one when given.
    pub fn with_atmosphere(mut self, source: AtmosphereSource, sounding_dir: Option<PathBuf>) -> Self {
        self.pipeline.molecular.source = source;
        if let Some(dir) = sounding_dir {
            self.pipeline.molecular.sounding_dir = dir;
        }
        self
    }
}
