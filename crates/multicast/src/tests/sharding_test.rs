//! Sharded multicast tests
//!
//! Tree used throughout: root with two routers, two workers under each.
//! A single task runs on the first worker, so every key update follows the
//! same path and the fan-out can be counted exactly.

use super::tree;
use crate::enclave::derive_value;
use crate::program::Program;
use crate::router::MulticastStats;
use crate::simulation::Simulation;

fn single_task_run(sharding: bool) -> Simulation {
    let sim = Simulation::build(tree(2, 4, 2, 2, sharding)).unwrap();
    sim.run([Program::new(["x", "y", "z"], 0.3, 1.0).unwrap()]).unwrap();
    sim
}

fn total_stats(sim: &Simulation) -> MulticastStats {
    std::iter::once(sim.root())
        .chain(sim.routers().iter())
        .map(|router| router.multicast_stats())
        .fold(MulticastStats::default(), |acc, stats| MulticastStats {
            received: acc.received + stats.received,
            forwarded_up: acc.forwarded_up + stats.forwarded_up,
            forwarded_down: acc.forwarded_down + stats.forwarded_down,
            suppressed: acc.suppressed + stats.suppressed,
        })
}

#[test]
fn test_unsharded_updates_reach_every_other_node() {
    let sim = single_task_run(false);

    // Per update: sibling worker, other router, its two workers
    let stats = total_stats(&sim);
    assert_eq!(stats.forwarded_down, 3 * 4);
    assert_eq!(stats.forwarded_up, 3);
    assert_eq!(stats.suppressed, 0);

    let executing = &sim.workers()[0];
    assert_eq!(executing.completed(), 1);
    for worker in sim.workers() {
        assert_eq!(worker.cached_value("x"), Some(derive_value("x")), "{}", worker.address());
    }
}

#[test]
fn test_sharded_updates_stay_with_interested_children() {
    let sim = single_task_run(true);

    // Nobody else runs a task using x, y or z
    let stats = total_stats(&sim);
    assert_eq!(stats.forwarded_down, 0);
    assert_eq!(stats.forwarded_up, 3);
    assert_eq!(stats.suppressed, 3 * 2);

    // The other subtree never hears about the updates
    assert_eq!(sim.routers()[1].multicast_stats().received, 0);
    assert_eq!(sim.workers()[0].cached_value("y"), Some(derive_value("y")));
    for worker in &sim.workers()[1..] {
        assert_eq!(worker.cached_value("y"), None, "{}", worker.address());
    }
}

#[test]
fn test_sharding_reduces_packet_count() {
    let sharded = single_task_run(true);
    let unsharded = single_task_run(false);

    assert_eq!(
        unsharded.network().packet_count() - sharded.network().packet_count(),
        3 * 4
    );
}

#[test]
fn test_key_usage_tracks_in_flight_tasks_only() {
    let sim = single_task_run(true);

    // Usage recorded on dispatch is released when the result passes back up
    let routers = std::iter::once(sim.root()).chain(sim.routers().iter());
    for router in routers {
        for link in router.children() {
            assert_eq!(link.usage("x"), 0);
            assert_eq!(link.outstanding, 0);
        }
    }
}
