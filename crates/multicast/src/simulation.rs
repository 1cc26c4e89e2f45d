//! Simulation driver: assembles a complete tree on a fresh network

use crate::coordinator::Coordinator;
use crate::enclave::{ExecutorConfig, BASE_SLEEP_MS};
use crate::error::{ProtocolError, SimulationError};
use crate::message::Message;
use crate::node::{Host, Network, Packet};
use crate::program::{Program, TaskId};
use crate::router::{Router, RouterConfig};
use crate::worker::Worker;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use treecast_net::{Address, DebugInfo};

/// Shape of the tree and executor timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Routers besides the root
    pub routers: usize,
    pub workers: usize,
    /// Child capacity of every non-root router
    pub branch: usize,
    /// Child capacity of the root; defaults to `branch`
    pub root_branch: Option<usize>,
    pub sharding: bool,
    /// Shared by the coordinator and the root router
    pub coordinator_address: Address,
    /// Executor sleep scale per key
    pub base_sleep_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            routers: 0,
            workers: 1,
            branch: 1024,
            root_branch: None,
            sharding: true,
            coordinator_address: Ipv4Addr::new(73, 0, 0, 1),
            base_sleep_ms: BASE_SLEEP_MS,
        }
    }
}

impl SimulationConfig {
    pub fn root_capacity(&self) -> usize {
        self.root_branch.unwrap_or(self.branch)
    }

    pub fn executor(&self) -> ExecutorConfig {
        ExecutorConfig {
            base_sleep: Duration::from_millis(self.base_sleep_ms),
        }
    }
}

/// A coordinator, a root router, and the routers and workers below them
pub struct Simulation {
    network: Arc<Network>,
    config: SimulationConfig,
    coordinator: Arc<Coordinator>,
    root: Arc<Router>,
    routers: Vec<Arc<Router>>,
    workers: Vec<Arc<Worker>>,
}

impl Simulation {
    /// Build the tree: coordinator and root first, then routers, then workers
    pub fn build(config: SimulationConfig) -> Result<Self, SimulationError> {
        let network = Network::new();
        Self::assemble(&network, config).map_err(|err| {
            network.reset();
            err
        })
    }

    fn assemble(network: &Arc<Network>, config: SimulationConfig) -> Result<Self, SimulationError> {
        let root_address = config.coordinator_address;
        let host = network
            .register(Some(root_address))
            .ok_or_else(|| SimulationError::AddressUnavailable(root_address.to_string()))?;

        let coordinator = Coordinator::new(host.clone(), root_address)?;
        let root = Router::new(
            host,
            root_address,
            RouterConfig {
                is_root: true,
                capacity: config.root_capacity(),
                sharding: config.sharding,
            },
        )?;

        let mut routers = Vec::with_capacity(config.routers);
        for _ in 0..config.routers {
            let host = Self::allocate(network)?;
            let router_config = RouterConfig {
                is_root: false,
                capacity: config.branch,
                sharding: config.sharding,
            };
            routers.push(Router::new(host, root_address, router_config)?);
        }

        let mut workers = Vec::with_capacity(config.workers);
        for _ in 0..config.workers {
            let host = Self::allocate(network)?;
            workers.push(Worker::new(host, root_address, config.executor())?);
        }

        if let Some(diagnostic) = network.fault() {
            return Err(ProtocolError::Aborted(diagnostic).into());
        }

        tracing::info!(
            "Simulation ready: {} routers, {} workers, sharding {}",
            routers.len() + 1,
            workers.len(),
            if config.sharding { "on" } else { "off" }
        );

        Ok(Self {
            network: Arc::clone(network),
            config,
            coordinator,
            root,
            routers,
            workers,
        })
    }

    fn allocate(network: &Arc<Network>) -> Result<Host, SimulationError> {
        network
            .register(None)
            .ok_or_else(|| {
                SimulationError::AddressUnavailable("192.168.0.0/16 pool exhausted".to_string())
            })
    }

    /// Submit every program in order, then wait for all of them
    pub fn run<I, P>(&self, programs: I) -> Result<Vec<TaskId>, SimulationError>
    where
        I: IntoIterator<Item = P>,
        P: Into<Arc<Program>>,
    {
        let mut task_ids = Vec::new();
        for program in programs {
            task_ids.push(self.coordinator.submit(program)?);
        }
        self.coordinator.join_user_tasks()?;

        tracing::info!(
            "Run complete: {} tasks, {} packets delivered",
            task_ids.len(),
            self.network.packet_count()
        );
        Ok(task_ids)
    }

    pub fn network(&self) -> &Arc<Network> {
        &self.network
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn root(&self) -> &Arc<Router> {
        &self.root
    }

    /// Non-root routers, in creation order
    pub fn routers(&self) -> &[Arc<Router>] {
        &self.routers
    }

    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.workers
    }

    pub fn debug_info(&self) -> DebugInfo<Message> {
        self.network.debug_info()
    }

    /// Delivered packets sent or received by the root router's host
    pub fn root_packets(&self) -> Vec<Packet> {
        let root = self.root.address();
        self.debug_info()
            .packets
            .into_iter()
            .filter(|packet| packet.src == root || packet.dst == root)
            .collect()
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.network.reset();
    }
}
