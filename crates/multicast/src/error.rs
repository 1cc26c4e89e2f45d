//! Error types
//!
//! `ProtocolError` is fatal: it means an invariant of the simulated system is
//! broken and the run must stop. Delivery failures on their own are not
//! errors at the fabric level; nodes that need a delivery escalate them here.

use crate::program::TaskId;
use thiserror::Error;
use treecast_net::{Address, DeliveryError, Port};

/// Fatal protocol violations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("RootJoin received from {from}, but the configured root is {expected}")]
    RootJoinFromNonRoot { from: Address, expected: Address },

    #[error("duplicate RootJoin from {0}")]
    DuplicateRootJoin(Address),

    #[error("Join from {0} arrived before the root router joined")]
    JoinBeforeRoot(Address),

    #[error("unexpected {kind} message from {from} on port {port}")]
    UnexpectedMessage {
        kind: &'static str,
        from: Address,
        port: Port,
    },

    #[error("control message from {from}, expected coordinator {expected}")]
    ControlFromStranger { from: Address, expected: Address },

    #[error("{node} already has parent {current}, refusing {proposed}")]
    ParentReassigned {
        node: Address,
        current: Address,
        proposed: Address,
    },

    #[error("{child} assigned twice to router {router}")]
    DuplicateChild { router: Address, child: Address },

    #[error("task #{0} is already enqueued")]
    DuplicateTask(TaskId),

    #[error("result for unknown task #{0}")]
    UnknownTask(TaskId),

    #[error("duplicate result for task #{0}")]
    DuplicateResult(TaskId),

    #[error("router {0} asked to dispatch a task with no children")]
    NoChildren(Address),

    #[error("{0} has no parent assigned")]
    Detached(Address),

    #[error("result from {child}, which is not a child of {router}")]
    UnknownChild { router: Address, child: Address },

    #[error("outstanding task counter of child {child} at {router} would go negative")]
    OutstandingUnderflow { router: Address, child: Address },

    #[error("usage count of key {key:?} for child {child} at {router} would go negative")]
    KeyUsageUnderflow {
        router: Address,
        child: Address,
        key: String,
    },

    #[error("failed to dispatch task #{task_id} to root {root}: {source}")]
    DispatchFailed {
        task_id: TaskId,
        root: Address,
        source: DeliveryError,
    },

    #[error("{kind} from {from} to {to} failed: {source}")]
    RelayFailed {
        kind: &'static str,
        from: Address,
        to: Address,
        source: DeliveryError,
    },

    #[error("worker {0} lost its pending task queue")]
    QueueDisconnected(Address),

    #[error("failed to start enclave on {worker}: {reason}")]
    EnclaveSpawn { worker: Address, reason: String },

    #[error("run aborted: {0}")]
    Aborted(String),
}

/// Node construction failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("port {port} is already open on {address}")]
    PortInUse { address: Address, port: Port },

    #[error("join request from {from} to coordinator {coordinator} failed: {source}")]
    JoinFailed {
        from: Address,
        coordinator: Address,
        source: DeliveryError,
    },
}

/// Invalid program parameters
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProgramError {
    #[error("program needs at least one key")]
    NoKeys,

    #[error("length factor must be in [0, 1), got {0}")]
    InvalidLengthFactor(f64),

    #[error("work factor must be positive, got {0}")]
    InvalidWorkFactor(f64),
}

/// Failures while assembling or driving a simulation
#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("address {0} is unavailable")]
    AddressUnavailable(String),

    #[error(transparent)]
    Node(#[from] NodeError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
