//! Worker - runs one enclave at a time and reports upward
//!
//! Tasks that arrive while an enclave is running wait in a FIFO channel. The
//! running enclave publishes a KeyUpdate per key to the parent router and, on
//! completion, sends the result and starts the next queued task.

use crate::enclave::{self, ExecutorConfig};
use crate::error::{NodeError, ProtocolError};
use crate::message::{Message, Role};
use crate::node::{self, Host, Packet};
use crate::ports::{
    COORD_CONTROL_PORT, ROUTER_MCAST_PORT, ROUTER_RESULT_PORT, WORKER_CONTROL_PORT,
    WORKER_MCAST_PORT, WORKER_RESULT_PORT, WORKER_TASK_PORT,
};
use crate::program::{Key, Program, TaskId};
use crossbeam_channel::{unbounded, Receiver, Sender};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::Arc;
use treecast_net::Address;

/// A task waiting for the enclave
struct PendingTask {
    program: Arc<Program>,
    task_id: TaskId,
}

#[derive(Default)]
struct WorkerState {
    parent: Option<Address>,
    /// An enclave is executing
    running: bool,
    completed: u64,
}

/// A leaf of the tree
pub struct Worker {
    host: Host,
    coordinator: Address,
    executor: ExecutorConfig,
    state: Mutex<WorkerState>,
    pending_tx: Sender<PendingTask>,
    pending_rx: Receiver<PendingTask>,
    /// Last value seen per key, from own enclaves and from multicast
    cache: DashMap<Key, i64>,
}

impl Worker {
    /// Create a worker, open its ports and join the tree
    pub fn new(
        host: Host,
        coordinator: Address,
        executor: ExecutorConfig,
    ) -> Result<Arc<Self>, NodeError> {
        let (pending_tx, pending_rx) = unbounded();
        let worker = Arc::new(Self {
            host,
            coordinator,
            executor,
            state: Mutex::new(WorkerState::default()),
            pending_tx,
            pending_rx,
            cache: DashMap::new(),
        });

        node::listen(&worker.host, &worker, WORKER_CONTROL_PORT, Self::handle_control)?;
        node::listen(&worker.host, &worker, WORKER_MCAST_PORT, Self::handle_multicast)?;
        node::listen(&worker.host, &worker, WORKER_TASK_PORT, Self::handle_task)?;

        let request = Message::Join {
            role: Role::Worker,
            capacity: None,
        };
        worker
            .host
            .send_msg(request, WORKER_CONTROL_PORT, coordinator, COORD_CONTROL_PORT)
            .map_err(|source| NodeError::JoinFailed {
                from: worker.host.address(),
                coordinator,
                source,
            })?;

        tracing::info!("Worker {} joined", worker.host.address());
        Ok(worker)
    }

    fn handle_control(self: &Arc<Self>, packet: &Packet) -> Result<(), ProtocolError> {
        if packet.src != self.coordinator {
            return Err(ProtocolError::ControlFromStranger {
                from: packet.src,
                expected: self.coordinator,
            });
        }

        let Message::AssignParent { parent } = &packet.payload else {
            return Err(node::unexpected(packet));
        };

        let mut state = self.state.lock();
        if let Some(current) = state.parent {
            if current != *parent {
                return Err(ProtocolError::ParentReassigned {
                    node: self.address(),
                    current,
                    proposed: *parent,
                });
            }
        }
        state.parent = Some(*parent);
        tracing::debug!("Worker {} parent: {}", self.address(), parent);
        Ok(())
    }

    fn handle_task(self: &Arc<Self>, packet: &Packet) -> Result<(), ProtocolError> {
        let Message::ExecFakeProgram { program, task_id } = &packet.payload else {
            return Err(node::unexpected(packet));
        };
        let task = PendingTask {
            program: Arc::clone(program),
            task_id: *task_id,
        };

        {
            let mut state = self.state.lock();
            if state.parent.is_none() {
                return Err(ProtocolError::Detached(self.address()));
            }
            if state.running {
                self.pending_tx
                    .send(task)
                    .map_err(|_| ProtocolError::QueueDisconnected(self.address()))?;
                tracing::trace!(
                    "Worker {} queued task #{} ({} waiting)",
                    self.address(),
                    task_id,
                    self.pending_rx.len()
                );
                return Ok(());
            }
            state.running = true;
        }

        self.start(task)
    }

    /// Launch an enclave for `task`. The caller has marked the worker running.
    fn start(self: &Arc<Self>, task: PendingTask) -> Result<(), ProtocolError> {
        let updater = Arc::clone(self);
        let finisher = Arc::clone(self);
        let program = Arc::clone(&task.program);

        enclave::spawn(
            format!("enclave-{}-{}", self.address(), task.task_id),
            program,
            self.executor.clone(),
            move |key, value| {
                if let Err(err) = updater.publish(key, value) {
                    node::abort(&updater.host, &err);
                }
            },
            move |result| finisher.finish(task, result),
        )
        .map(|_| ())
        .map_err(|err| ProtocolError::EnclaveSpawn {
            worker: self.address(),
            reason: err.to_string(),
        })
    }

    /// Record a key written by the local enclave and multicast it
    fn publish(&self, key: &Key, value: i64) -> Result<(), ProtocolError> {
        self.cache.insert(key.clone(), value);

        let parent = self.parent().ok_or(ProtocolError::Detached(self.address()))?;
        node::send_required(
            &self.host,
            Message::KeyUpdate {
                key: key.clone(),
                value,
            },
            WORKER_MCAST_PORT,
            parent,
            ROUTER_MCAST_PORT,
        )
    }

    /// Enclave completion: report, then pick up the next queued task
    fn finish(self: &Arc<Self>, task: PendingTask, result: i64) {
        self.state.lock().completed += 1;

        if let Err(err) = self.report(&task, result) {
            node::abort(&self.host, &err);
        }

        let next = {
            let mut state = self.state.lock();
            match self.pending_rx.try_recv() {
                Ok(next) => Some(next),
                Err(_) => {
                    state.running = false;
                    None
                }
            }
        };

        if let Some(next) = next {
            if let Err(err) = self.start(next) {
                node::abort(&self.host, &err);
            }
        }
    }

    fn report(&self, task: &PendingTask, result: i64) -> Result<(), ProtocolError> {
        let parent = self.parent().ok_or(ProtocolError::Detached(self.address()))?;
        tracing::debug!(
            "Worker {} finished task #{}: {}",
            self.address(),
            task.task_id,
            result
        );
        node::send_required(
            &self.host,
            Message::TaskResult {
                program: Arc::clone(&task.program),
                task_id: task.task_id,
                result,
            },
            WORKER_RESULT_PORT,
            parent,
            ROUTER_RESULT_PORT,
        )
    }

    fn handle_multicast(self: &Arc<Self>, packet: &Packet) -> Result<(), ProtocolError> {
        match &packet.payload {
            Message::KeyUpdate { key, value } => {
                self.cache.insert(key.clone(), *value);
                Ok(())
            }
            _ => Err(node::unexpected(packet)),
        }
    }

    pub fn address(&self) -> Address {
        self.host.address()
    }

    pub fn parent(&self) -> Option<Address> {
        self.state.lock().parent
    }

    /// Last known value of `key`
    pub fn cached_value(&self, key: &str) -> Option<i64> {
        self.cache.get(key).map(|entry| *entry.value())
    }

    /// Number of enclaves that have finished on this worker
    pub fn completed(&self) -> u64 {
        self.state.lock().completed
    }

    pub fn is_busy(&self) -> bool {
        self.state.lock().running
    }

    /// Tasks waiting behind the running enclave
    pub fn queue_depth(&self) -> usize {
        self.pending_rx.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enclave::expected_result;
    use crate::node::Network;
    use crate::ports::ROUTER_TASK_PORT;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(10);

    struct Harness {
        network: Arc<Network>,
        coordinator: Host,
        router: Host,
        results: Receiver<(TaskId, i64)>,
        updates: Receiver<Key>,
    }

    impl Harness {
        fn new() -> Self {
            let network = Network::new();
            let coordinator = network.register(Some(Ipv4Addr::new(73, 0, 0, 2))).unwrap();
            assert!(coordinator.open_port(COORD_CONTROL_PORT, |_| {}));

            let router = network.register(None).unwrap();
            let (results_tx, results) = unbounded();
            assert!(router.open_port(ROUTER_RESULT_PORT, move |packet| {
                if let Message::TaskResult { task_id, result, .. } = &packet.payload {
                    results_tx.send((*task_id, *result)).unwrap();
                }
            }));
            let (updates_tx, updates) = unbounded();
            assert!(router.open_port(ROUTER_MCAST_PORT, move |packet| {
                if let Message::KeyUpdate { key, .. } = &packet.payload {
                    updates_tx.send(key.clone()).unwrap();
                }
            }));

            Self {
                network,
                coordinator,
                router,
                results,
                updates,
            }
        }

        fn worker(&self, attach: bool) -> Arc<Worker> {
            let host = self.network.register(None).unwrap();
            let config = ExecutorConfig {
                base_sleep: Duration::from_micros(200),
            };
            let worker = Worker::new(host, self.coordinator.address(), config).unwrap();
            if attach {
                self.coordinator
                    .send_msg(
                        Message::AssignParent {
                            parent: self.router.address(),
                        },
                        COORD_CONTROL_PORT,
                        worker.address(),
                        WORKER_CONTROL_PORT,
                    )
                    .unwrap();
            }
            worker
        }

        fn dispatch(&self, worker: &Worker, program: &Arc<Program>, task_id: TaskId) {
            self.router
                .send_msg(
                    Message::ExecFakeProgram {
                        program: program.clone(),
                        task_id,
                    },
                    ROUTER_TASK_PORT,
                    worker.address(),
                    WORKER_TASK_PORT,
                )
                .unwrap();
        }
    }

    #[test]
    fn test_tasks_run_one_at_a_time_in_order() {
        let harness = Harness::new();
        let worker = harness.worker(true);
        let program = Arc::new(Program::new(["x", "y", "z"], 0.3, 1.0).unwrap());

        for task_id in 0..3 {
            harness.dispatch(&worker, &program, task_id);
        }

        let expected = expected_result(&program);
        for task_id in 0..3 {
            assert_eq!(harness.results.recv_timeout(WAIT).unwrap(), (task_id, expected));
        }
        assert_eq!(worker.completed(), 3);

        let updates: Vec<Key> = harness.updates.try_iter().collect();
        assert_eq!(updates.len(), 9);
        assert_eq!(&updates[..3], program.keys());
        assert_eq!(worker.cached_value("x"), Some(enclave::derive_value("x")));
        assert!(harness.network.fault().is_none());
    }

    #[test]
    fn test_task_before_parent_aborts() {
        let harness = Harness::new();
        let worker = harness.worker(false);
        let program = Arc::new(Program::new(["x"], 0.3, 1.0).unwrap());

        harness.dispatch(&worker, &program, 0);
        assert!(harness.network.fault().unwrap().contains("has no parent"));
        assert!(!worker.is_busy());
    }

    #[test]
    fn test_multicast_updates_cache() {
        let harness = Harness::new();
        let worker = harness.worker(true);

        harness
            .router
            .send_msg(
                Message::KeyUpdate {
                    key: "kiwi".to_string(),
                    value: -12,
                },
                ROUTER_MCAST_PORT,
                worker.address(),
                WORKER_MCAST_PORT,
            )
            .unwrap();

        assert_eq!(worker.cached_value("kiwi"), Some(-12));
        assert_eq!(worker.cached_value("pear"), None);
    }

    #[test]
    fn test_assign_child_to_worker_aborts() {
        let harness = Harness::new();
        let worker = harness.worker(true);

        harness
            .coordinator
            .send_msg(
                Message::AssignChild {
                    child: harness.router.address(),
                    role: Role::Router,
                },
                COORD_CONTROL_PORT,
                worker.address(),
                WORKER_CONTROL_PORT,
            )
            .unwrap();

        assert!(harness.network.fault().unwrap().contains("unexpected AssignChild"));
    }
}
