//! Packet envelope

use crate::{Address, Port};
use chrono::{DateTime, Utc};
use std::fmt;

/// Immutable envelope carried by the network
#[derive(Debug, Clone)]
pub struct Packet<P> {
    /// Message carried by this packet
    pub payload: P,
    /// Sending host
    pub src: Address,
    /// Port the packet was sent from
    pub src_port: Port,
    /// Destination host
    pub dst: Address,
    /// Port the packet is addressed to
    pub dst_port: Port,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl<P> Packet<P> {
    /// Create a packet stamped with the current time
    pub fn new(payload: P, src: Address, src_port: Port, dst: Address, dst_port: Port) -> Self {
        Self {
            payload,
            src,
            src_port,
            dst,
            dst_port,
            created_at: Utc::now(),
        }
    }
}

impl<P: fmt::Debug> fmt::Display for Packet<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Packet: ({}:{} => {}:{} {:?})",
            self.src, self.src_port, self.dst, self.dst_port, self.payload
        )
    }
}
