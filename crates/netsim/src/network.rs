//! Simulation context: address table, traffic logs, fault latch
//!
//! One `Network` per simulation run. Nothing here is process-global: two
//! networks never see each other's hosts, and `reset()` returns a network to
//! its freshly-constructed state.

use crate::host::{Endpoint, Host};
use crate::{Address, DeliveryError, Packet, Payload, LOOPBACK};
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Callback run once when a fault is latched
pub type FaultWatcher = Arc<dyn Fn() + Send + Sync>;

/// A failed delivery, as recorded in the failure log
#[derive(Debug, Clone)]
pub struct DeliveryFailure<P> {
    pub error: DeliveryError,
    pub packet: Packet<P>,
}

/// Owned snapshot of the network's state, for metrics and debugging
#[derive(Debug, Clone)]
pub struct DebugInfo<P> {
    /// Registered addresses, sorted
    pub hosts: Vec<Address>,
    /// Delivered packets, in causal order
    pub packets: Vec<Packet<P>>,
    /// Failed deliveries, in the order they happened
    pub failures: Vec<DeliveryFailure<P>>,
}

/// The simulated network
pub struct Network<P> {
    /// Address table
    hosts: DashMap<Address, Arc<Endpoint<P>>>,
    /// Addresses that can never be registered
    reserved: RwLock<HashSet<Address>>,
    /// Delivered packets tagged with their sequence number
    packet_log: Mutex<Vec<(u64, Packet<P>)>>,
    /// Failed deliveries
    failure_log: Mutex<Vec<DeliveryFailure<P>>>,
    /// Next packet sequence number
    next_seq: AtomicU64,
    /// First fatal diagnostic raised during this run
    fault: Mutex<Option<String>>,
    /// Notified after the fault is latched
    fault_watchers: Mutex<Vec<FaultWatcher>>,
}

impl<P: Payload> Network<P> {
    /// Create an empty network with only the loopback address reserved
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            hosts: DashMap::new(),
            reserved: RwLock::new(HashSet::from([LOOPBACK])),
            packet_log: Mutex::new(Vec::new()),
            failure_log: Mutex::new(Vec::new()),
            next_seq: AtomicU64::new(0),
            fault: Mutex::new(None),
            fault_watchers: Mutex::new(Vec::new()),
        })
    }

    /// Register a host at `requested`, or at the first free pool address.
    ///
    /// Returns `None` if the requested address is taken or reserved, or if the
    /// pool is exhausted.
    pub fn register(self: &Arc<Self>, requested: Option<Address>) -> Option<Host<P>> {
        let endpoint = match requested {
            Some(address) => self.claim(address)?,
            None => self.allocate()?,
        };

        tracing::debug!("Registered host {}", endpoint.address);
        Some(Host::new(endpoint, Arc::clone(self)))
    }

    /// Reserve an address so it can never be registered.
    ///
    /// Fails if the address already belongs to a host.
    pub fn reserve(&self, address: Address) -> bool {
        if self.hosts.contains_key(&address) {
            return false;
        }
        self.reserved.write().insert(address);
        true
    }

    fn claim(&self, address: Address) -> Option<Arc<Endpoint<P>>> {
        if self.reserved.read().contains(&address) {
            return None;
        }

        match self.hosts.entry(address) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let endpoint = Arc::new(Endpoint::new(address));
                slot.insert(Arc::clone(&endpoint));
                Some(endpoint)
            }
        }
    }

    /// Walk the 192.168.0.0/16 pool for the first free address
    fn allocate(&self) -> Option<Arc<Endpoint<P>>> {
        for c in 1..=255u8 {
            for d in 1..=255u8 {
                if let Some(endpoint) = self.claim(Ipv4Addr::new(192, 168, c, d)) {
                    return Some(endpoint);
                }
            }
        }
        tracing::warn!("Address pool exhausted");
        None
    }

    /// Resolve `dst` as seen from `src`
    fn route(&self, src: Address, dst: Address) -> Option<Arc<Endpoint<P>>> {
        if !self.hosts.contains_key(&src) {
            return None;
        }
        let target = if dst == LOOPBACK { src } else { dst };
        self.hosts.get(&target).map(|entry| Arc::clone(entry.value()))
    }

    /// Deliver a packet synchronously.
    ///
    /// The packet is logged before the destination callback runs, so that
    /// nested deliveries triggered by the callback land after it in the log.
    /// If the destination port turns out to be closed the entry is retracted.
    pub(crate) fn deliver(&self, packet: Packet<P>) -> Result<(), DeliveryError> {
        let Some(target) = self.route(packet.src, packet.dst) else {
            tracing::debug!("Routing failed: {}", packet);
            self.record_failure(DeliveryError::RoutingFailed, packet);
            return Err(DeliveryError::RoutingFailed);
        };

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        self.packet_log.lock().push((seq, packet.clone()));
        tracing::trace!("Delivering {}", packet);

        if target.receive(&packet) {
            Ok(())
        } else {
            self.retract(seq);
            tracing::debug!("Port closed: {}", packet);
            self.record_failure(DeliveryError::PortClosed, packet);
            Err(DeliveryError::PortClosed)
        }
    }

    fn retract(&self, seq: u64) {
        let mut log = self.packet_log.lock();
        if let Some(pos) = log.iter().rposition(|(s, _)| *s == seq) {
            log.remove(pos);
        }
    }

    fn record_failure(&self, error: DeliveryError, packet: Packet<P>) {
        self.failure_log.lock().push(DeliveryFailure { error, packet });
    }

    /// Latch a fatal diagnostic for this run. Only the first one is kept.
    ///
    /// Returns `true` if this call latched the fault. Watchers run after the
    /// latch is released, so they may read `fault()`.
    pub fn raise_fault(&self, diagnostic: impl Into<String>) -> bool {
        let diagnostic = diagnostic.into();
        {
            let mut fault = self.fault.lock();
            if fault.is_some() {
                tracing::debug!("Additional fault after abort: {}", diagnostic);
                return false;
            }
            tracing::error!("Run aborted: {}", diagnostic);
            *fault = Some(diagnostic);
        }

        let watchers = self.fault_watchers.lock().clone();
        for watcher in watchers {
            watcher();
        }
        true
    }

    /// Register a callback to run when this run's fault is latched
    pub fn on_fault<F>(&self, watcher: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.fault_watchers.lock().push(Arc::new(watcher));
    }

    /// The fault latched for this run, if any
    pub fn fault(&self) -> Option<String> {
        self.fault.lock().clone()
    }

    /// Check whether an address belongs to a registered host
    pub fn is_registered(&self, address: &Address) -> bool {
        self.hosts.contains_key(address)
    }

    /// Number of packets delivered so far
    pub fn packet_count(&self) -> usize {
        self.packet_log.lock().len()
    }

    /// Number of failed deliveries so far
    pub fn failure_count(&self) -> usize {
        self.failure_log.lock().len()
    }

    /// Snapshot of the address table and both logs
    pub fn debug_info(&self) -> DebugInfo<P> {
        let mut hosts: Vec<Address> = self.hosts.iter().map(|entry| *entry.key()).collect();
        hosts.sort();

        DebugInfo {
            hosts,
            packets: self
                .packet_log
                .lock()
                .iter()
                .map(|(_, packet)| packet.clone())
                .collect(),
            failures: self.failure_log.lock().clone(),
        }
    }

    /// Return to the freshly-constructed state.
    ///
    /// Every host is unregistered and every port closed, which drops the
    /// callbacks (and whatever node state they own).
    pub fn reset(&self) {
        let endpoints: Vec<Arc<Endpoint<P>>> = self
            .hosts
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        self.hosts.clear();
        for endpoint in &endpoints {
            endpoint.close_all();
        }

        *self.reserved.write() = HashSet::from([LOOPBACK]);
        self.packet_log.lock().clear();
        self.failure_log.lock().clear();
        self.next_seq.store(0, Ordering::SeqCst);
        *self.fault.lock() = None;
        self.fault_watchers.lock().clear();

        tracing::debug!("Network reset ({} hosts released)", endpoints.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_explicit_and_duplicate() {
        let network = Network::<String>::new();
        let addr = Ipv4Addr::new(73, 0, 0, 1);

        let host = network.register(Some(addr)).unwrap();
        assert_eq!(host.address(), addr);
        assert!(network.register(Some(addr)).is_none());
        assert!(network.register(Some(LOOPBACK)).is_none());
    }

    #[test]
    fn test_allocate_from_pool() {
        let network = Network::<String>::new();

        let first = network.register(None).unwrap();
        let second = network.register(None).unwrap();
        assert_eq!(first.address(), Ipv4Addr::new(192, 168, 1, 1));
        assert_eq!(second.address(), Ipv4Addr::new(192, 168, 1, 2));

        // An explicitly claimed pool address is skipped
        network.register(Some(Ipv4Addr::new(192, 168, 1, 3))).unwrap();
        let fourth = network.register(None).unwrap();
        assert_eq!(fourth.address(), Ipv4Addr::new(192, 168, 1, 4));
    }

    #[test]
    fn test_reserved_address_is_skipped() {
        let network = Network::<String>::new();
        assert!(network.reserve(Ipv4Addr::new(192, 168, 1, 1)));

        let host = network.register(None).unwrap();
        assert_eq!(host.address(), Ipv4Addr::new(192, 168, 1, 2));
        assert!(!network.reserve(host.address()));
    }

    #[test]
    fn test_unknown_destination_logs_routing_failure() {
        let network = Network::<String>::new();
        let host = network.register(None).unwrap();

        let result = host.send_msg("lost".to_string(), 1, Ipv4Addr::new(10, 9, 9, 9), 1);
        assert_eq!(result, Err(DeliveryError::RoutingFailed));

        let info = network.debug_info();
        assert!(info.packets.is_empty());
        assert_eq!(info.failures.len(), 1);
        assert_eq!(info.failures[0].error, DeliveryError::RoutingFailed);
        assert_eq!(info.failures[0].packet.dst, Ipv4Addr::new(10, 9, 9, 9));
    }

    #[test]
    fn test_closed_port_rolls_back_packet_log() {
        let network = Network::<String>::new();
        let a = network.register(None).unwrap();
        let b = network.register(None).unwrap();

        let result = a.send_msg("knock".to_string(), 1, b.address(), 4242);
        assert_eq!(result, Err(DeliveryError::PortClosed));

        let info = network.debug_info();
        assert!(info.packets.is_empty());
        assert_eq!(info.failures.len(), 1);
        assert_eq!(info.failures[0].error, DeliveryError::PortClosed);
    }

    #[test]
    fn test_nested_delivery_is_logged_in_causal_order() {
        let network = Network::<String>::new();
        let a = network.register(None).unwrap();
        let b = network.register(None).unwrap();
        let c = network.register(None).unwrap();

        let relay = b.clone();
        let c_addr = c.address();
        assert!(b.open_port(10, move |packet| {
            relay.forward(packet, 11, c_addr, 20).unwrap();
        }));
        assert!(c.open_port(20, |_| {}));

        a.send_msg("chain".to_string(), 1, b.address(), 10).unwrap();

        let packets = network.debug_info().packets;
        assert_eq!(packets.len(), 2);
        assert_eq!((packets[0].src, packets[0].dst), (a.address(), b.address()));
        assert_eq!((packets[1].src, packets[1].dst), (b.address(), c.address()));
        assert_eq!(packets[1].payload, "chain");
    }

    #[test]
    fn test_fault_latch_keeps_first() {
        let network = Network::<String>::new();
        assert!(network.fault().is_none());

        assert!(network.raise_fault("first"));
        assert!(!network.raise_fault("second"));
        assert_eq!(network.fault().as_deref(), Some("first"));
    }

    #[test]
    fn test_fault_watchers_run_once() {
        let network = Network::<String>::new();
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let observer = Arc::downgrade(&network);
        network.on_fault(move || {
            let latched = observer.upgrade().and_then(|network| network.fault());
            assert_eq!(latched.as_deref(), Some("first"));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        network.raise_fault("first");
        network.raise_fault("second");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        network.reset();
        network.raise_fault("after reset");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reset() {
        let network = Network::<String>::new();
        let a = network.register(Some(Ipv4Addr::new(73, 0, 0, 1))).unwrap();
        assert!(a.open_port(1, |_| {}));
        a.send_msg("x".to_string(), 1, LOOPBACK, 1).unwrap();
        a.send_msg("y".to_string(), 1, Ipv4Addr::new(1, 1, 1, 1), 1).unwrap_err();
        network.raise_fault("boom");

        network.reset();

        let info = network.debug_info();
        assert!(info.hosts.is_empty());
        assert!(info.packets.is_empty());
        assert!(info.failures.is_empty());
        assert!(network.fault().is_none());
        assert!(!a.is_port_open(1));

        // The address is free again
        assert!(network.register(Some(Ipv4Addr::new(73, 0, 0, 1))).is_some());
    }
}
