//! Router - load-balanced task dispatch and sharded key-update multicast
//!
//! A router keeps one traffic record per child: how many tasks are in flight
//! at or below that child, and which keys those tasks reference. Tasks go to
//! the least loaded child. Key updates travel up to the parent and, when
//! sharding is on, down only to children that currently use the key.

use crate::error::{NodeError, ProtocolError};
use crate::message::{Message, Role};
use crate::node::{self, Host, Packet};
use crate::ports::{
    mcast_port, task_port, COORD_CONTROL_PORT, COORD_RESULT_PORT, ROUTER_CONTROL_PORT,
    ROUTER_MCAST_PORT, ROUTER_RESULT_PORT, ROUTER_TASK_PORT,
};
use crate::program::{Key, Program};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use treecast_net::Address;

/// Router configuration
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Announce with RootJoin instead of Join
    pub is_root: bool,
    /// Soft limit on children
    pub capacity: usize,
    /// Filter downward key updates by per-child key usage
    pub sharding: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            is_root: false,
            capacity: 1024,
            sharding: true,
        }
    }
}

/// Traffic record of one child
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChildLink {
    pub address: Address,
    pub role: Role,
    /// Tasks dispatched to this child and not yet reported back
    pub outstanding: u64,
    /// Key -> number of in-flight references at or below this child
    pub key_usage: HashMap<Key, u64>,
}

impl ChildLink {
    fn new(address: Address, role: Role) -> Self {
        Self {
            address,
            role,
            outstanding: 0,
            key_usage: HashMap::new(),
        }
    }

    /// Usage count of `key`, zero if untracked
    pub fn usage(&self, key: &str) -> u64 {
        self.key_usage.get(key).copied().unwrap_or(0)
    }
}

/// Key-update counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MulticastStats {
    pub received: u64,
    pub forwarded_up: u64,
    pub forwarded_down: u64,
    /// Downward copies skipped because the child had no use for the key
    pub suppressed: u64,
}

#[derive(Default)]
struct RouterState {
    parent: Option<Address>,
    /// Children in discovery order
    children: Vec<ChildLink>,
    stats: MulticastStats,
}

/// Number of references to each key in a program
fn key_counts(program: &Program) -> HashMap<&str, u64> {
    let mut counts = HashMap::new();
    for key in program.keys() {
        *counts.entry(key.as_str()).or_insert(0) += 1;
    }
    counts
}

/// An interior node of the tree
pub struct Router {
    host: Host,
    coordinator: Address,
    config: RouterConfig,
    state: Mutex<RouterState>,
}

impl Router {
    /// Create a router, open its ports and join the tree.
    ///
    /// Ports are open before the join request goes out: the coordinator's
    /// AssignParent reply is delivered while the request is still in flight.
    pub fn new(
        host: Host,
        coordinator: Address,
        config: RouterConfig,
    ) -> Result<Arc<Self>, NodeError> {
        let router = Arc::new(Self {
            host,
            coordinator,
            config,
            state: Mutex::new(RouterState::default()),
        });

        node::listen(&router.host, &router, ROUTER_CONTROL_PORT, Self::handle_control)?;
        node::listen(&router.host, &router, ROUTER_MCAST_PORT, Self::handle_multicast)?;
        node::listen(&router.host, &router, ROUTER_RESULT_PORT, Self::handle_result)?;
        node::listen(&router.host, &router, ROUTER_TASK_PORT, Self::handle_task)?;

        let request = if router.config.is_root {
            Message::RootJoin {
                capacity: router.config.capacity,
            }
        } else {
            Message::Join {
                role: Role::Router,
                capacity: Some(router.config.capacity),
            }
        };
        router
            .host
            .send_msg(request, ROUTER_CONTROL_PORT, coordinator, COORD_CONTROL_PORT)
            .map_err(|source| NodeError::JoinFailed {
                from: router.host.address(),
                coordinator,
                source,
            })?;

        tracing::info!(
            "Router {} joined (root: {}, capacity: {}, sharding: {})",
            router.host.address(),
            router.config.is_root,
            router.config.capacity,
            router.config.sharding
        );
        Ok(router)
    }

    fn handle_control(self: &Arc<Self>, packet: &Packet) -> Result<(), ProtocolError> {
        if packet.src != self.coordinator {
            return Err(ProtocolError::ControlFromStranger {
                from: packet.src,
                expected: self.coordinator,
            });
        }

        let mut state = self.state.lock();
        match &packet.payload {
            Message::AssignParent { parent } => {
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
                tracing::debug!("Router {} parent: {}", self.address(), parent);
                Ok(())
            }
            Message::AssignChild { child, role } => {
                if state.children.iter().any(|link| link.address == *child) {
                    return Err(ProtocolError::DuplicateChild {
                        router: self.address(),
                        child: *child,
                    });
                }
                state.children.push(ChildLink::new(*child, *role));
                tracing::debug!(
                    "Router {} child #{}: {} {}",
                    self.address(),
                    state.children.len(),
                    role,
                    child
                );
                Ok(())
            }
            _ => Err(node::unexpected(packet)),
        }
    }

    fn handle_task(self: &Arc<Self>, packet: &Packet) -> Result<(), ProtocolError> {
        let Message::ExecFakeProgram { program, task_id } = &packet.payload else {
            return Err(node::unexpected(packet));
        };

        let (child, role) = {
            let mut state = self.state.lock();
            // First minimum wins, so ties go to the earliest discovered child
            let link = state
                .children
                .iter_mut()
                .min_by_key(|link| link.outstanding)
                .ok_or(ProtocolError::NoChildren(self.host.address()))?;

            link.outstanding += 1;
            for key in program.keys() {
                *link.key_usage.entry(key.clone()).or_insert(0) += 1;
            }
            (link.address, link.role)
        };

        tracing::trace!("Router {} task #{} -> {}", self.address(), task_id, child);
        node::forward_required(&self.host, packet, ROUTER_TASK_PORT, child, task_port(role))
    }

    fn handle_result(self: &Arc<Self>, packet: &Packet) -> Result<(), ProtocolError> {
        let Message::TaskResult { program, .. } = &packet.payload else {
            return Err(node::unexpected(packet));
        };

        let upstream = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let router = self.host.address();

            let upstream = if self.config.is_root {
                None
            } else {
                Some(state.parent.ok_or(ProtocolError::Detached(router))?)
            };

            let link = state
                .children
                .iter_mut()
                .find(|link| link.address == packet.src)
                .ok_or(ProtocolError::UnknownChild {
                    router,
                    child: packet.src,
                })?;

            // Validate everything before touching any counter
            if link.outstanding == 0 {
                return Err(ProtocolError::OutstandingUnderflow {
                    router,
                    child: link.address,
                });
            }
            let counts = key_counts(program);
            if let Some((key, _)) = counts.iter().find(|(key, n)| link.usage(key) < **n) {
                return Err(ProtocolError::KeyUsageUnderflow {
                    router,
                    child: link.address,
                    key: key.to_string(),
                });
            }

            link.outstanding -= 1;
            for (key, n) in counts {
                if let Some(usage) = link.key_usage.get_mut(key) {
                    *usage -= n;
                    if *usage == 0 {
                        link.key_usage.remove(key);
                    }
                }
            }
            upstream
        };

        match upstream {
            None => node::forward_required(
                &self.host,
                packet,
                ROUTER_RESULT_PORT,
                self.coordinator,
                COORD_RESULT_PORT,
            ),
            Some(parent) => node::forward_required(
                &self.host,
                packet,
                ROUTER_RESULT_PORT,
                parent,
                ROUTER_RESULT_PORT,
            ),
        }
    }

    fn handle_multicast(self: &Arc<Self>, packet: &Packet) -> Result<(), ProtocolError> {
        let Message::KeyUpdate { key, .. } = &packet.payload else {
            return Err(node::unexpected(packet));
        };
        let sender = packet.src;

        let (up, down) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.stats.received += 1;

            let up = if self.config.is_root || state.parent == Some(sender) {
                None
            } else {
                Some(
                    state
                        .parent
                        .ok_or(ProtocolError::Detached(self.host.address()))?,
                )
            };

            let mut down = Vec::new();
            for link in state.children.iter().filter(|link| link.address != sender) {
                if self.config.sharding && link.usage(key) == 0 {
                    state.stats.suppressed += 1;
                } else {
                    down.push((link.address, link.role));
                }
            }

            if up.is_some() {
                state.stats.forwarded_up += 1;
            }
            state.stats.forwarded_down += down.len() as u64;
            (up, down)
        };

        if let Some(parent) = up {
            node::forward_required(
                &self.host,
                packet,
                ROUTER_MCAST_PORT,
                parent,
                ROUTER_MCAST_PORT,
            )?;
        }
        for (child, role) in down {
            node::forward_required(&self.host, packet, ROUTER_MCAST_PORT, child, mcast_port(role))?;
        }
        Ok(())
    }

    pub fn address(&self) -> Address {
        self.host.address()
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn is_root(&self) -> bool {
        self.config.is_root
    }

    /// Assigned parent; always `None` for the root
    pub fn parent(&self) -> Option<Address> {
        self.state.lock().parent
    }

    /// Snapshot of the per-child traffic records, in discovery order
    pub fn children(&self) -> Vec<ChildLink> {
        self.state.lock().children.clone()
    }

    pub fn multicast_stats(&self) -> MulticastStats {
        self.state.lock().stats
    }
}
