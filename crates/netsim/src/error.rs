//! Delivery errors

use thiserror::Error;

/// Recoverable outcomes of a failed send. Both are logged by the network.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Routing failed")]
    RoutingFailed,

    #[error("Port closed")]
    PortClosed,
}
