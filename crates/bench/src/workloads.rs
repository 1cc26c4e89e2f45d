//! Task workloads

use clap::ValueEnum;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use treecast::{Key, Program, ProgramError};

/// Keyspace of the fruits workload
pub const FRUITS: [&str; 7] = ["apple", "orange", "pear", "peach", "mango", "rhubarb", "kiwi"];

/// Named workload
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkloadKind {
    /// A fresh random program per task over seven fruit keys
    #[default]
    FruitsOfMyLabor,
    /// The same three-key program for every task
    Posterboard,
}

impl WorkloadKind {
    /// Task count used when none is given
    pub fn default_tasks(self) -> usize {
        match self {
            WorkloadKind::FruitsOfMyLabor => 128,
            WorkloadKind::Posterboard => 8,
        }
    }

    pub fn generate<R: Rng + ?Sized>(
        self,
        tasks: usize,
        rng: &mut R,
    ) -> Result<Vec<Arc<Program>>, ProgramError> {
        match self {
            WorkloadKind::FruitsOfMyLabor => fruits_of_my_labor(tasks, rng),
            WorkloadKind::Posterboard => posterboard(tasks),
        }
    }
}

/// `n` tasks sharing one program over `x`, `y`, `z`
pub fn posterboard(n: usize) -> Result<Vec<Arc<Program>>, ProgramError> {
    let program = Arc::new(Program::new(["x", "y", "z"], 0.3, 1.0)?);
    Ok(vec![program; n])
}

/// `n` tasks, each with its own key distribution drawn from [`FRUITS`]
pub fn fruits_of_my_labor<R: Rng + ?Sized>(
    n: usize,
    rng: &mut R,
) -> Result<Vec<Arc<Program>>, ProgramError> {
    let keyspace: Vec<Key> = FRUITS.iter().map(|fruit| fruit.to_string()).collect();
    (0..n)
        .map(|_| Program::generate(&keyspace, 0.6, 10.0, rng).map(Arc::new))
        .collect()
}
