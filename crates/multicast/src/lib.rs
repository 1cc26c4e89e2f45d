//! Self-organizing multicast tree over a simulated network
//!
//! Architecture:
//! - The Coordinator owns the membership tree and the user task table. It
//!   places joining nodes and hands every task to the root router
//! - Routers forward tasks to their least loaded child, relay results up and
//!   propagate key updates up the tree and (selectively) down it
//! - Workers run one enclave at a time and stream key updates to their parent
//!   while it executes
//!
//! Sharding: each router remembers which keys the in-flight tasks below each
//! child reference, and only sends a key update down to children that use
//! the key.

pub mod coordinator;
pub mod enclave;
pub mod error;
pub mod message;
pub mod node;
pub mod ports;
pub mod program;
pub mod router;
pub mod simulation;
pub mod tree;
pub mod worker;

pub use coordinator::{Coordinator, CoordinatorStats};
pub use enclave::ExecutorConfig;
pub use error::{NodeError, ProgramError, ProtocolError, SimulationError};
pub use message::{Message, Role};
pub use program::{Key, Program, TaskId, UserTask};
pub use router::{ChildLink, MulticastStats, Router, RouterConfig};
pub use simulation::{Simulation, SimulationConfig};
pub use tree::{Placement, TreeNode};
pub use worker::Worker;

#[cfg(test)]
mod tests;
