//! Fixed port plan. Control, multicast, task and result traffic each get their
//! own port per role, so message kinds never share a channel.

use crate::message::Role;
use treecast_net::Port;

pub const COORD_CONTROL_PORT: Port = 3010;
pub const COORD_RESULT_PORT: Port = 3011;
pub const COORD_SEND_TASK_PORT: Port = 3071;

pub const ROUTER_CONTROL_PORT: Port = 6666;
pub const ROUTER_MCAST_PORT: Port = 6667;
pub const ROUTER_RESULT_PORT: Port = 6669;
pub const ROUTER_TASK_PORT: Port = 6670;

pub const WORKER_CONTROL_PORT: Port = 7666;
pub const WORKER_MCAST_PORT: Port = 7667;
pub const WORKER_RESULT_PORT: Port = 7669;
pub const WORKER_TASK_PORT: Port = 7670;

/// Control port of a node with the given role
pub fn control_port(role: Role) -> Port {
    match role {
        Role::Router => ROUTER_CONTROL_PORT,
        Role::Worker => WORKER_CONTROL_PORT,
    }
}

/// Multicast port of a node with the given role
pub fn mcast_port(role: Role) -> Port {
    match role {
        Role::Router => ROUTER_MCAST_PORT,
        Role::Worker => WORKER_MCAST_PORT,
    }
}

/// Task intake port of a node with the given role
pub fn task_port(role: Role) -> Port {
    match role {
        Role::Router => ROUTER_TASK_PORT,
        Role::Worker => WORKER_TASK_PORT,
    }
}
