//! Relays between the chat platform and the message bus
//!
//! The [`InboundRelay`] publishes platform messages to the bus; the
//! [`OutboundRelay`] consumes envelopes from the bus and sends them to the
//! platform. Each runs as its own task and owns its input channel.

pub mod inbound;
pub mod outbound;

pub use inbound::{InboundOutcome, InboundRelay};
pub use outbound::{OutboundOutcome, OutboundRelay};

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Lifecycle of a relay task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    /// Inbound: waiting for the next platform event
    Listening,
    /// Inbound: wrapping and publishing an event
    Processing,
    /// Outbound: waiting for the next bus message
    Subscribed,
    /// Outbound: sending a message to the platform
    Dispatching,
    Stopped,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RelayState::Idle => "idle",
            RelayState::Listening => "listening",
            RelayState::Processing => "processing",
            RelayState::Subscribed => "subscribed",
            RelayState::Dispatching => "dispatching",
            RelayState::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Shared, observable relay state
#[derive(Debug, Clone)]
pub(crate) struct StateCell(Arc<RwLock<RelayState>>);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(Arc::new(RwLock::new(RelayState::Idle)))
    }

    pub(crate) fn get(&self) -> RelayState {
        *self.0.read()
    }

    pub(crate) fn set(&self, state: RelayState) {
        *self.0.write() = state;
    }
}
