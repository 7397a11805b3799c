//! Network collaborator interface and the inbound-packet slot.
//!
//! Transport, peer management and group membership live outside the engine.
//! The host provides a [`NetworkLink`] for outbound traffic and feeds inbound
//! packets through [`SchedulerHandle::enqueue_packet`] from any thread. The
//! queue is drained between ticks into the single packet handler slot, so
//! handlers never run while a tick is in flight.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::scheduler::SchedulerHandle;
use crate::EngineError;

/// Remote peer identifier assigned by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PeerId(pub u32);

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "peer-{}", self.0)
    }
}

/// Delivery guarantee requested for an outbound packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reliability {
    Unreliable,
    UnreliableSequenced,
    #[default]
    Reliable,
    ReliableOrdered,
}

/// Outbound side of the transport.
pub trait NetworkLink: Send + Sync {
    /// Send `packet` to one peer.
    fn send(&self, peer: PeerId, packet: &Value, reliability: Reliability) -> anyhow::Result<()>;

    /// Send `packet` to every connected peer.
    fn broadcast(&self, packet: &Value, reliability: Reliability) -> anyhow::Result<()>;
}

/// Byte-level packet encoding used by transports.
pub trait PacketCodec {
    fn encode(&self, packet: &Value) -> Result<Vec<u8>, EngineError>;
    fn decode(&self, bytes: &[u8]) -> Result<Value, EngineError>;
}

/// [`PacketCodec`] writing compact JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl PacketCodec for JsonCodec {
    fn encode(&self, packet: &Value) -> Result<Vec<u8>, EngineError> {
        Ok(serde_json::to_vec(packet)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Value, EngineError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Handler installed in the inbound-packet slot.
pub type PacketHandler = Arc<dyn Fn(&SchedulerHandle, PeerId, &Value) + Send + Sync>;

#[derive(Default)]
pub(crate) struct PacketSlot {
    handler: Option<PacketHandler>,
    inbox: VecDeque<(PeerId, Value)>,
}

impl SchedulerHandle {
    /// Attach (or detach with `None`) the outbound transport.
    pub fn set_network(&self, link: Option<Arc<dyn NetworkLink>>) {
        *self.shared.network.write() = link;
    }

    fn link(&self) -> anyhow::Result<Arc<dyn NetworkLink>> {
        self.shared
            .network
            .read()
            .clone()
            .ok_or_else(|| anyhow::anyhow!("no network link attached"))
    }

    pub fn send(&self, peer: PeerId, packet: &Value, reliability: Reliability) -> anyhow::Result<()> {
        self.link()?.send(peer, packet, reliability)
    }

    pub fn broadcast(&self, packet: &Value, reliability: Reliability) -> anyhow::Result<()> {
        self.link()?.broadcast(packet, reliability)
    }

    /// Install the packet handler, replacing any previous one.
    pub fn set_packet_handler(
        &self,
        handler: impl Fn(&SchedulerHandle, PeerId, &Value) + Send + Sync + 'static,
    ) {
        self.shared.packets.lock().handler = Some(Arc::new(handler));
    }

    pub fn clear_packet_handler(&self) {
        self.shared.packets.lock().handler = None;
    }

    /// Queue an inbound packet for the next [`drain_packets`](Self::drain_packets).
    pub fn enqueue_packet(&self, peer: PeerId, packet: Value) {
        self.shared.packets.lock().inbox.push_back((peer, packet));
    }

    pub fn queued_packets(&self) -> usize {
        self.shared.packets.lock().inbox.len()
    }

    /// Hand one packet to the installed handler right away.
    ///
    /// Returns `false` (and logs a warning) if no handler is installed.
    pub fn deliver_packet(&self, peer: PeerId, packet: &Value) -> bool {
        let handler = self.shared.packets.lock().handler.clone();
        match handler {
            Some(handler) => {
                handler(self, peer, packet);
                true
            }
            None => {
                self.sink()
                    .log_warning(&format!("packet from {peer} dropped: no packet handler"));
                false
            }
        }
    }

    /// Deliver every queued packet in arrival order; returns how many were
    /// handled.
    pub fn drain_packets(&self) -> usize {
        let inbox = std::mem::take(&mut self.shared.packets.lock().inbox);
        inbox
            .into_iter()
            .filter(|(peer, packet)| self.deliver_packet(*peer, packet))
            .count()
    }
}
