//! Simulated network fabric
//!
//! Architecture:
//! - A `Network` is the simulation context: address table, reserved set,
//!   packet log, failure log and the run's fault latch
//! - A `Host` is one node's presence on the network: an address plus a table
//!   of open ports, each bound to a callback
//! - Delivery is a direct synchronous call from the sender into the
//!   destination port's callback; there is no queueing
//!
//! Routing protocols (ARP, DNS, BGP...) are abstracted away: every host is
//! mapped to a unique address and the mapping is visible to all hosts.

pub mod error;
pub mod host;
pub mod network;
pub mod packet;

pub use error::DeliveryError;
pub use host::{Host, PortHandler};
pub use network::{DebugInfo, DeliveryFailure, FaultWatcher, Network};
pub use packet::Packet;

use std::fmt;
use std::net::Ipv4Addr;

/// Host address, unique within one simulation run
pub type Address = Ipv4Addr;

/// Port number on a host
pub type Port = u16;

/// Loopback address; always reserved, routes back to the sender
pub const LOOPBACK: Address = Ipv4Addr::LOCALHOST;

/// Anything that can ride inside a packet
pub trait Payload: Clone + fmt::Debug + Send + Sync + 'static {}

impl<T: Clone + fmt::Debug + Send + Sync + 'static> Payload for T {}
