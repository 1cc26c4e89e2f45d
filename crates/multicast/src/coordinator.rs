//! Coordinator - owns the membership tree and the user task table
//!
//! Routers and workers join through the coordinator's control port; the
//! coordinator decides where each one attaches and tells both ends. User
//! tasks are handed to the root router and their results come back on the
//! result port.

use crate::error::{NodeError, ProtocolError};
use crate::message::{Message, Role};
use crate::node::{self, Host, Packet};
use crate::ports::{
    control_port, COORD_CONTROL_PORT, COORD_RESULT_PORT, COORD_SEND_TASK_PORT,
    ROUTER_CONTROL_PORT, ROUTER_TASK_PORT,
};
use crate::program::{Program, TaskId, UserTask};
use crate::tree::TreeNode;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use treecast_net::Address;

/// Coordinator counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct CoordinatorStats {
    pub tasks_submitted: usize,
    pub results_received: u64,
    pub routers_joined: usize,
    pub workers_joined: usize,
    pub forced_placements: u64,
}

#[derive(Default)]
struct CoordinatorState {
    /// Membership tree, created by RootJoin
    root: Option<TreeNode>,
    tasks: HashMap<TaskId, UserTask>,
    routers: Vec<Address>,
    workers: Vec<Address>,
    next_task_id: TaskId,
    results_received: u64,
    forced_placements: u64,
}

/// Counts tasks submitted but not yet completed
struct TaskLedger {
    pending: Mutex<usize>,
    drained: Condvar,
}

impl TaskLedger {
    fn new() -> Self {
        Self {
            pending: Mutex::new(0),
            drained: Condvar::new(),
        }
    }

    fn add(&self) {
        *self.pending.lock() += 1;
    }

    fn complete(&self) {
        let mut pending = self.pending.lock();
        *pending = pending.saturating_sub(1);
        if *pending == 0 {
            self.drained.notify_all();
        }
    }

    /// Wake waiters so they re-check the fault latch. Taking the lock orders
    /// this after any waiter's check.
    fn wake(&self) {
        let _pending = self.pending.lock();
        self.drained.notify_all();
    }

    /// Block until nothing is pending or `fault` reports an abort
    fn wait<F>(&self, fault: F) -> Result<(), ProtocolError>
    where
        F: Fn() -> Option<String>,
    {
        let mut pending = self.pending.lock();
        loop {
            if let Some(diagnostic) = fault() {
                return Err(ProtocolError::Aborted(diagnostic));
            }
            if *pending == 0 {
                return Ok(());
            }
            self.drained.wait(&mut pending);
        }
    }
}

/// The tree's coordinator
pub struct Coordinator {
    host: Host,
    /// Only this address may send RootJoin
    root_address: Address,
    state: Mutex<CoordinatorState>,
    ledger: TaskLedger,
}

impl Coordinator {
    /// Create a coordinator and open its control and result ports
    pub fn new(host: Host, root_address: Address) -> Result<Arc<Self>, NodeError> {
        let coordinator = Arc::new(Self {
            host,
            root_address,
            state: Mutex::new(CoordinatorState::default()),
            ledger: TaskLedger::new(),
        });

        node::listen(
            &coordinator.host,
            &coordinator,
            COORD_CONTROL_PORT,
            Self::handle_control,
        )?;
        node::listen(
            &coordinator.host,
            &coordinator,
            COORD_RESULT_PORT,
            Self::handle_result_packet,
        )?;

        let watcher = Arc::downgrade(&coordinator);
        coordinator.host.network().on_fault(move || {
            if let Some(coordinator) = watcher.upgrade() {
                coordinator.ledger.wake();
            }
        });

        tracing::info!(
            "Coordinator started on {}, expecting root router {}",
            coordinator.host.address(),
            root_address
        );
        Ok(coordinator)
    }

    fn handle_control(self: &Arc<Self>, packet: &Packet) -> Result<(), ProtocolError> {
        match &packet.payload {
            Message::RootJoin { capacity } => self.accept_root(packet.src, *capacity),
            Message::Join { role, capacity } => self.accept_join(packet.src, *role, *capacity),
            Message::Leave => {
                tracing::debug!("Leave from {} ignored", packet.src);
                Ok(())
            }
            _ => Err(node::unexpected(packet)),
        }
    }

    fn accept_root(&self, from: Address, capacity: usize) -> Result<(), ProtocolError> {
        if from != self.root_address {
            return Err(ProtocolError::RootJoinFromNonRoot {
                from,
                expected: self.root_address,
            });
        }

        let mut state = self.state.lock();
        if state.root.is_some() {
            return Err(ProtocolError::DuplicateRootJoin(from));
        }
        state.root = Some(TreeNode::router(from, capacity));
        tracing::info!("Root router {} joined (capacity {})", from, capacity);
        Ok(())
    }

    fn accept_join(
        &self,
        from: Address,
        role: Role,
        capacity: Option<usize>,
    ) -> Result<(), ProtocolError> {
        let placement = {
            let mut state = self.state.lock();
            let root = state
                .root
                .as_mut()
                .ok_or(ProtocolError::JoinBeforeRoot(from))?;

            let record = match role {
                Role::Router => TreeNode::router(from, capacity.unwrap_or(0)),
                Role::Worker => TreeNode::worker(from),
            };
            let placement = root.place(record);

            match role {
                Role::Router => state.routers.push(from),
                Role::Worker => state.workers.push(from),
            }
            if placement.forced {
                state.forced_placements += 1;
            }
            placement
        };

        if placement.forced {
            tracing::warn!(
                "Tree is full; {} {} forced onto root {}",
                role,
                from,
                placement.parent
            );
        } else {
            tracing::debug!("{} {} placed under {}", role, from, placement.parent);
        }

        node::send_required(
            &self.host,
            Message::AssignParent {
                parent: placement.parent,
            },
            COORD_CONTROL_PORT,
            from,
            control_port(role),
        )?;
        node::send_required(
            &self.host,
            Message::AssignChild { child: from, role },
            COORD_CONTROL_PORT,
            placement.parent,
            ROUTER_CONTROL_PORT,
        )
    }

    fn handle_result_packet(self: &Arc<Self>, packet: &Packet) -> Result<(), ProtocolError> {
        match &packet.payload {
            Message::TaskResult {
                task_id, result, ..
            } => self.handle_result(*task_id, *result),
            _ => Err(node::unexpected(packet)),
        }
    }

    /// Mark a task complete
    pub fn handle_result(&self, task_id: TaskId, result: i64) -> Result<(), ProtocolError> {
        {
            let mut state = self.state.lock();
            let task = state
                .tasks
                .get_mut(&task_id)
                .ok_or(ProtocolError::UnknownTask(task_id))?;
            task.finish(result)?;
            state.results_received += 1;
        }
        self.ledger.complete();

        tracing::debug!("Task #{} completed: {}", task_id, result);
        Ok(())
    }

    /// Record a task and dispatch it to the root router.
    ///
    /// A dispatch failure is fatal: it is returned and also aborts the run.
    pub fn enqueue_user_task(&self, task: UserTask) -> Result<TaskId, ProtocolError> {
        let task_id = task.id();
        let program = Arc::clone(task.program());

        {
            let mut state = self.state.lock();
            if state.tasks.contains_key(&task_id) {
                return Err(ProtocolError::DuplicateTask(task_id));
            }
            state.next_task_id = state.next_task_id.max(task_id.saturating_add(1));
            state.tasks.insert(task_id, task);
            self.ledger.add();
        }

        let message = Message::ExecFakeProgram { program, task_id };
        if let Err(source) = self.host.send_msg(
            message,
            COORD_SEND_TASK_PORT,
            self.root_address,
            ROUTER_TASK_PORT,
        ) {
            let err = ProtocolError::DispatchFailed {
                task_id,
                root: self.root_address,
                source,
            };
            node::abort(&self.host, &err);
            return Err(err);
        }

        tracing::trace!("Task #{} dispatched", task_id);
        Ok(task_id)
    }

    /// Enqueue a program under the next free task id
    pub fn submit(&self, program: impl Into<Arc<Program>>) -> Result<TaskId, ProtocolError> {
        let task_id = {
            let mut state = self.state.lock();
            let id = state.next_task_id;
            state.next_task_id += 1;
            id
        };
        self.enqueue_user_task(UserTask::new(task_id, program))
    }

    /// Block until every task submitted so far has completed.
    ///
    /// Returns early with `ProtocolError::Aborted` if the run hits a fatal
    /// protocol violation anywhere in the tree.
    pub fn join_user_tasks(&self) -> Result<(), ProtocolError> {
        self.ledger.wait(|| self.host.network().fault())
    }

    pub fn address(&self) -> Address {
        self.host.address()
    }

    pub fn root_address(&self) -> Address {
        self.root_address
    }

    /// Snapshot of one task
    pub fn task(&self, task_id: TaskId) -> Option<UserTask> {
        self.state.lock().tasks.get(&task_id).cloned()
    }

    /// Snapshot of every task, ordered by id
    pub fn tasks(&self) -> Vec<UserTask> {
        let mut tasks: Vec<UserTask> = self.state.lock().tasks.values().cloned().collect();
        tasks.sort_by_key(UserTask::id);
        tasks
    }

    /// Snapshot of the membership tree
    pub fn tree(&self) -> Option<TreeNode> {
        self.state.lock().root.clone()
    }

    pub fn routers(&self) -> Vec<Address> {
        self.state.lock().routers.clone()
    }

    pub fn workers(&self) -> Vec<Address> {
        self.state.lock().workers.clone()
    }

    pub fn tasks_submitted(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn results_received(&self) -> u64 {
        self.state.lock().results_received
    }

    pub fn stats(&self) -> CoordinatorStats {
        let state = self.state.lock();
        CoordinatorStats {
            tasks_submitted: state.tasks.len(),
            results_received: state.results_received,
            routers_joined: state.routers.len(),
            workers_joined: state.workers.len(),
            forced_placements: state.forced_placements,
        }
    }
}
