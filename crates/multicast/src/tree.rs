//! Membership tree held by the coordinator
//!
//! Placement is a depth-first search from the root that, at every node,
//! visits children with the smallest subtrees first and stops at the first
//! router with spare capacity. The search uses an explicit stack.

use crate::message::Role;
use serde::Serialize;
use treecast_net::Address;

/// Membership record of one tree participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeNode {
    pub address: Address,
    pub role: Role,
    /// Soft limit on children; always 0 for workers
    pub capacity: usize,
    /// Children in attachment order
    pub children: Vec<TreeNode>,
}

/// Where a joining node ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub parent: Address,
    /// Attached to the root past its capacity because no node had room
    pub forced: bool,
}

impl TreeNode {
    pub fn router(address: Address, capacity: usize) -> Self {
        Self {
            address,
            role: Role::Router,
            capacity,
            children: Vec::new(),
        }
    }

    pub fn worker(address: Address) -> Self {
        Self {
            address,
            role: Role::Worker,
            capacity: 0,
            children: Vec::new(),
        }
    }

    /// Can accept another child without exceeding its capacity
    pub fn has_room(&self) -> bool {
        self.children.len() < self.capacity
    }

    /// Number of nodes below this one
    pub fn descendant_count(&self) -> usize {
        let mut count = 0;
        let mut stack: Vec<&TreeNode> = self.children.iter().collect();
        while let Some(node) = stack.pop() {
            count += 1;
            stack.extend(node.children.iter());
        }
        count
    }

    /// Index path to the first node with room, if any
    fn find_room(&self) -> Option<Vec<usize>> {
        let mut stack: Vec<(Vec<usize>, &TreeNode)> = vec![(Vec::new(), self)];

        while let Some((path, node)) = stack.pop() {
            if node.has_room() {
                return Some(path);
            }

            let mut order: Vec<usize> = (0..node.children.len()).collect();
            // Stable: equal-sized subtrees keep attachment order
            order.sort_by_key(|&i| node.children[i].descendant_count());

            // Reversed so the smallest subtree is popped first
            for &i in order.iter().rev() {
                let mut child_path = path.clone();
                child_path.push(i);
                stack.push((child_path, &node.children[i]));
            }
        }

        None
    }

    fn node_at_mut(&mut self, path: &[usize]) -> &mut TreeNode {
        path.iter().fold(self, |node, &i| &mut node.children[i])
    }

    /// Attach `node` below the first router with room, or force it onto this
    /// (root) node when the whole tree is full.
    pub fn place(&mut self, node: TreeNode) -> Placement {
        match self.find_room() {
            Some(path) => {
                let parent = self.node_at_mut(&path);
                parent.children.push(node);
                Placement {
                    parent: parent.address,
                    forced: false,
                }
            }
            None => {
                // Overflow absorption: nothing has room, the root takes it
                self.children.push(node);
                Placement {
                    parent: self.address,
                    forced: true,
                }
            }
        }
    }

    /// Find the record for `address`
    pub fn find(&self, address: Address) -> Option<&TreeNode> {
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            if node.address == address {
                return Some(node);
            }
            stack.extend(node.children.iter());
        }
        None
    }

    /// One node per line, indented by depth
    pub fn render(&self) -> String {
        let mut out = String::new();
        let mut stack = vec![(0usize, self)];

        while let Some((depth, node)) = stack.pop() {
            if !out.is_empty() {
                out.push('\n');
            }
            let indent = "  ".repeat(depth);
            let line = match node.role {
                Role::Router => format!(
                    "R {} [{}/{}]",
                    node.address,
                    node.children.len(),
                    node.capacity
                ),
                Role::Worker => format!("W {}", node.address),
            };
            out.push_str(&indent);
            out.push_str(&line);
            for child in node.children.iter().rev() {
                stack.push((depth + 1, child));
            }
        }

        out
    }
}
