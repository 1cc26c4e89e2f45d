//! Multi-node scenarios on a full simulated tree

mod sharding_test;

use crate::simulation::SimulationConfig;

/// Tree shape with a 1ms executor so scenarios finish quickly
fn tree(
    routers: usize,
    workers: usize,
    branch: usize,
    root_branch: usize,
    sharding: bool,
) -> SimulationConfig {
    SimulationConfig {
        routers,
        workers,
        branch,
        root_branch: Some(root_branch),
        sharding,
        base_sleep_ms: 1,
        ..SimulationConfig::default()
    }
}
