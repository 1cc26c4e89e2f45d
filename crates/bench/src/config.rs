//! Benchmark configuration

use crate::metrics::Metric;
use crate::workloads::WorkloadKind;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use treecast::SimulationConfig;

/// Benchmark configuration, loadable from a JSON file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    /// Tree shape and executor timing
    pub simulation: SimulationConfig,
    pub workload: WorkloadKind,
    /// Number of tasks; the workload's default when absent
    pub tasks: Option<usize>,
    pub metrics: Vec<Metric>,
    /// Emit the report as JSON
    pub json: bool,
}

impl BenchConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn task_count(&self) -> usize {
        self.tasks.unwrap_or_else(|| self.workload.default_tasks())
    }
}
