//! Plumbing shared by the coordinator, routers and workers

use crate::error::{NodeError, ProtocolError};
use crate::message::Message;
use std::sync::Arc;
use treecast_net::{Address, Port};

pub type Packet = treecast_net::Packet<Message>;
pub type Host = treecast_net::Host<Message>;
pub type Network = treecast_net::Network<Message>;

/// Message handler bound to one port of a node
pub(crate) type Handler<N> = fn(&Arc<N>, &Packet) -> Result<(), ProtocolError>;

/// Latch a protocol violation as the run's fault
pub(crate) fn abort(host: &Host, err: &ProtocolError) {
    host.network()
        .raise_fault(format!("{} (at {})", err, host.address()));
}

/// Bind `handler` to `port`. A handler error aborts the run.
pub(crate) fn listen<N>(
    host: &Host,
    node: &Arc<N>,
    port: Port,
    handler: Handler<N>,
) -> Result<(), NodeError>
where
    N: Send + Sync + 'static,
{
    let node = Arc::clone(node);
    let owner = host.clone();
    let opened = host.open_port(port, move |packet| {
        if let Err(err) = handler(&node, packet) {
            abort(&owner, &err);
        }
    });

    if opened {
        Ok(())
    } else {
        Err(NodeError::PortInUse {
            address: host.address(),
            port,
        })
    }
}

/// The violation for a message that has no business on this port
pub(crate) fn unexpected(packet: &Packet) -> ProtocolError {
    ProtocolError::UnexpectedMessage {
        kind: packet.payload.kind(),
        from: packet.src,
        port: packet.dst_port,
    }
}

/// Send a message that must arrive
pub(crate) fn send_required(
    host: &Host,
    message: Message,
    src_port: Port,
    dst: Address,
    dst_port: Port,
) -> Result<(), ProtocolError> {
    let kind = message.kind();
    host.send_msg(message, src_port, dst, dst_port)
        .map_err(|source| ProtocolError::RelayFailed {
            kind,
            from: host.address(),
            to: dst,
            source,
        })
}

/// Forward a packet that must arrive
pub(crate) fn forward_required(
    host: &Host,
    packet: &Packet,
    src_port: Port,
    dst: Address,
    dst_port: Port,
) -> Result<(), ProtocolError> {
    host.forward(packet, src_port, dst, dst_port)
        .map_err(|source| ProtocolError::RelayFailed {
            kind: packet.payload.kind(),
            from: host.address(),
            to: dst,
            source,
        })
}
