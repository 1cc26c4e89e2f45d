//! Benchmark metrics, collected after the run from read-only views

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use treecast::{Simulation, UserTask};

/// Selectable metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Metric {
    /// Total packets delivered
    NPackets,
    /// Packets sent or received by the root router
    NPacketsRoot,
    /// The membership tree
    PrintTree,
    /// Every task with its result
    DumpTasks,
    /// Every delivered packet
    DumpPackets,
}

/// One finished task
#[derive(Debug, Clone, Serialize)]
pub struct TaskRecord {
    pub id: u64,
    pub keys: Vec<String>,
    pub result: Option<i64>,
}

impl From<&UserTask> for TaskRecord {
    fn from(task: &UserTask) -> Self {
        Self {
            id: task.id(),
            keys: task.program().keys().to_vec(),
            result: task.result(),
        }
    }
}

/// Collected metrics; absent fields were not requested
#[derive(Debug, Default, Serialize)]
pub struct Report {
    pub elapsed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_packets: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub n_packets_root: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tree: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Vec<TaskRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packets: Option<Vec<String>>,
}

impl Report {
    pub fn collect(sim: &Simulation, metrics: &[Metric], elapsed_ms: u64) -> Self {
        let mut report = Report {
            elapsed_ms,
            ..Report::default()
        };

        for metric in metrics {
            match metric {
                Metric::NPackets => report.n_packets = Some(sim.network().packet_count()),
                Metric::NPacketsRoot => report.n_packets_root = Some(sim.root_packets().len()),
                Metric::PrintTree => {
                    report.tree = sim.coordinator().tree().map(|root| root.render());
                }
                Metric::DumpTasks => {
                    let tasks = sim.coordinator().tasks();
                    report.tasks = Some(tasks.iter().map(TaskRecord::from).collect());
                }
                Metric::DumpPackets => {
                    let packets = sim.debug_info().packets;
                    report.packets = Some(packets.iter().map(ToString::to_string).collect());
                }
            }
        }

        report
    }

    /// Human-readable form, one section per metric
    pub fn render(&self) -> String {
        let mut sections = vec![format!("[Elapsed: {} ms]", self.elapsed_ms)];

        if let Some(n) = self.n_packets {
            sections.push(format!("[Total packets sent: {}]", n));
        }
        if let Some(n) = self.n_packets_root {
            sections.push(format!("[Total packets handled by root router: {}]", n));
        }
        if let Some(tree) = &self.tree {
            sections.push(format!("======== Mcast Tree ========\n{}", tree));
        }
        if let Some(tasks) = &self.tasks {
            let lines: Vec<String> = tasks
                .iter()
                .map(|task| match task.result {
                    Some(result) => format!("#{} {:?} => {}", task.id, task.keys, result),
                    None => format!("#{} {:?} => pending", task.id, task.keys),
                })
                .collect();
            sections.push(format!("======= Task Results =======\n{}", lines.join("\n")));
        }
        if let Some(packets) = &self.packets {
            sections.push(format!("======= Sent Packets =======\n{}", packets.join("\n")));
        }

        sections.join("\n")
    }
}
