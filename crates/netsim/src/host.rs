//! Host: a node's presence on the network

use crate::network::Network;
use crate::{Address, DeliveryError, Packet, Payload, Port, LOOPBACK};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Callback bound to an open port
pub type PortHandler<P> = Arc<dyn Fn(&Packet<P>) + Send + Sync>;

/// Port table and receive buffers of one registered address
pub(crate) struct Endpoint<P> {
    pub(crate) address: Address,
    /// At most one callback per port
    ports: RwLock<HashMap<Port, PortHandler<P>>>,
    /// Last packet delivered to each open port
    buffers: Mutex<HashMap<Port, Packet<P>>>,
}

impl<P: Payload> Endpoint<P> {
    pub(crate) fn new(address: Address) -> Self {
        Self {
            address,
            ports: RwLock::new(HashMap::new()),
            buffers: Mutex::new(HashMap::new()),
        }
    }

    /// Hand a packet to the callback of its destination port.
    ///
    /// Returns `false` if the port is not open. The callback runs with no
    /// endpoint lock held, so it may send, open or close ports freely.
    pub(crate) fn receive(&self, packet: &Packet<P>) -> bool {
        debug_assert!(
            packet.dst == self.address || packet.dst == LOOPBACK,
            "packet for {} delivered to {}",
            packet.dst,
            self.address
        );

        let handler = self.ports.read().get(&packet.dst_port).cloned();
        match handler {
            Some(handler) => {
                self.buffers.lock().insert(packet.dst_port, packet.clone());
                handler(packet);
                true
            }
            None => false,
        }
    }

    pub(crate) fn close_all(&self) {
        let handlers = std::mem::take(&mut *self.ports.write());
        self.buffers.lock().clear();
        drop(handlers);
    }
}

/// Handle to a registered host
pub struct Host<P> {
    endpoint: Arc<Endpoint<P>>,
    network: Arc<Network<P>>,
}

impl<P> Clone for Host<P> {
    fn clone(&self) -> Self {
        Self {
            endpoint: Arc::clone(&self.endpoint),
            network: Arc::clone(&self.network),
        }
    }
}

impl<P> fmt::Debug for Host<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("address", &self.endpoint.address)
            .finish()
    }
}

impl<P: Payload> Host<P> {
    pub(crate) fn new(endpoint: Arc<Endpoint<P>>, network: Arc<Network<P>>) -> Self {
        Self { endpoint, network }
    }

    /// This host's address
    pub fn address(&self) -> Address {
        self.endpoint.address
    }

    /// The network this host is registered on
    pub fn network(&self) -> &Arc<Network<P>> {
        &self.network
    }

    /// Bind `handler` to `port`. Fails without side effects if the port is
    /// already open.
    pub fn open_port<F>(&self, port: Port, handler: F) -> bool
    where
        F: Fn(&Packet<P>) + Send + Sync + 'static,
    {
        let mut ports = self.endpoint.ports.write();
        if ports.contains_key(&port) {
            tracing::debug!("{}: port {} already open", self.address(), port);
            return false;
        }
        ports.insert(port, Arc::new(handler));
        true
    }

    /// Free a port and its buffer, if open
    pub fn close_port(&self, port: Port) {
        let handler = self.endpoint.ports.write().remove(&port);
        self.endpoint.buffers.lock().remove(&port);
        drop(handler);
    }

    /// Check whether a port has a callback bound
    pub fn is_port_open(&self, port: Port) -> bool {
        self.endpoint.ports.read().contains_key(&port)
    }

    /// Most recent packet delivered to `port`
    pub fn port_buffer(&self, port: Port) -> Option<Packet<P>> {
        self.endpoint.buffers.lock().get(&port).cloned()
    }

    /// Send a packet originating from this host.
    ///
    /// # Panics
    ///
    /// Panics if the packet's source is not this host's address.
    pub fn send_packet(&self, packet: Packet<P>) -> Result<(), DeliveryError> {
        assert_eq!(
            packet.src,
            self.address(),
            "spoofed source in {}",
            packet
        );
        self.network.deliver(packet)
    }

    /// Wrap `payload` in a packet from this host and send it
    pub fn send_msg(
        &self,
        payload: P,
        src_port: Port,
        dst: Address,
        dst_port: Port,
    ) -> Result<(), DeliveryError> {
        self.send_packet(Packet::new(payload, self.address(), src_port, dst, dst_port))
    }

    /// Relay a packet addressed to this host on to `dst:dst_port`.
    ///
    /// # Panics
    ///
    /// Panics if the packet is not addressed to this host.
    pub fn forward(
        &self,
        packet: &Packet<P>,
        src_port: Port,
        dst: Address,
        dst_port: Port,
    ) -> Result<(), DeliveryError> {
        assert_eq!(
            packet.dst,
            self.address(),
            "cannot forward traffic addressed elsewhere: {}",
            packet
        );
        self.send_msg(packet.payload.clone(), src_port, dst, dst_port)
    }
}
