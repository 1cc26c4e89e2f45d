//! Message types exchanged between tree nodes

use crate::program::{Key, Program, TaskId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use treecast_net::Address;

/// Node role in the tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Forwards tasks down, results and key updates up
    Router,
    /// Executes programs in an enclave
    Worker,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Router => write!(f, "Router"),
            Role::Worker => write!(f, "Worker"),
        }
    }
}

/// Every message kind carried on the tree. Receivers match exhaustively.
#[derive(Debug, Clone)]
pub enum Message {
    /// Root router announcing itself to the coordinator
    RootJoin { capacity: usize },

    /// Router or worker asking for a place in the tree
    Join { role: Role, capacity: Option<usize> },

    /// Graceful departure (accepted, currently ignored)
    Leave,

    /// Coordinator telling a joiner who its parent is
    AssignParent { parent: Address },

    /// Coordinator telling a parent about its new child
    AssignChild { child: Address, role: Role },

    /// A task travelling down toward a worker
    ExecFakeProgram { program: Arc<Program>, task_id: TaskId },

    /// A completed task travelling up toward the coordinator
    TaskResult {
        program: Arc<Program>,
        task_id: TaskId,
        result: i64,
    },

    /// A key written by an enclave, multicast through the tree
    KeyUpdate { key: Key, value: i64 },
}

impl Message {
    /// Short name of the message kind, for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            Message::RootJoin { .. } => "RootJoin",
            Message::Join { .. } => "Join",
            Message::Leave => "Leave",
            Message::AssignParent { .. } => "AssignParent",
            Message::AssignChild { .. } => "AssignChild",
            Message::ExecFakeProgram { .. } => "ExecFakeProgram",
            Message::TaskResult { .. } => "Result",
            Message::KeyUpdate { .. } => "KeyUpdate",
        }
    }
}
