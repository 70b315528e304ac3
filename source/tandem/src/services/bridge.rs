//! # Socket Bridge
//!
//! A generic pass-through between a host socket surface (netlink or
//! whatever the platform exposes to userspace) and the peer. Payloads are
//! opaque datagrams in both directions; the core never looks inside.

use alloc::sync::Arc;

use tandem_proto::{bridge, service};
use tracing::trace;

use crate::{
    comms::fifo::{FifoConsumer, FifoProducer},
    message::Envelope,
    registry::{DispatchError, Registry, RegistrationError, RpcError, Service},
};

////////////////////////////////////////////////////////////////////////////////
// Service Definition
////////////////////////////////////////////////////////////////////////////////

/// Where peer-to-host datagrams go - usually straight to the socket that
/// userspace listens on.
pub trait BridgeSink: Send + Sync {
    fn deliver(&self, data: &[u8]);
}

pub struct BridgeServer;

impl BridgeServer {
    /// Register the bridge over one ring pair, returning the host-to-peer
    /// send handle.
    pub async fn register(
        registry: &Arc<Registry>,
        tx: FifoProducer,
        rx: FifoConsumer,
        sink: Arc<dyn BridgeSink>,
    ) -> Result<BridgeHandle, RegistrationError> {
        registry
            .register(
                service::BRIDGE,
                Some(tx),
                Some(rx),
                Arc::new(BridgeService { sink }),
            )
            .await?;
        Ok(BridgeHandle {
            registry: registry.clone(),
        })
    }
}

////////////////////////////////////////////////////////////////////////////////
// Client Definition
////////////////////////////////////////////////////////////////////////////////

/// Sends host datagrams toward the peer.
pub struct BridgeHandle {
    registry: Arc<Registry>,
}

impl BridgeHandle {
    /// Forward one opaque datagram to the peer.
    ///
    /// [`RpcError::NoSpace`] means the outbound ring is full; the caller
    /// owns the drop-or-retry policy.
    pub async fn send(&self, data: &[u8]) -> Result<(), RpcError> {
        self.registry
            .send(service::BRIDGE, bridge::Kind::Data as u32, &[], data)
            .await
    }
}

////////////////////////////////////////////////////////////////////////////////
// Server Definition
////////////////////////////////////////////////////////////////////////////////

struct BridgeService {
    sink: Arc<dyn BridgeSink>,
}

impl Service for BridgeService {
    fn dispatch(&self, msg: Envelope<'_>) -> Result<(), DispatchError> {
        match bridge::Kind::try_from(msg.kind)? {
            bridge::Kind::Data => {
                trace!(len = msg.payload.len(), "peer datagram");
                self.sink.deliver(msg.payload);
                Ok(())
            }
        }
    }
}
