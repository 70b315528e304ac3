//! # PCM Audio
//!
//! Raw audio streaming toward the peer. A stream is opened with a
//! synchronous start exchange that hands the peer the sample ring's
//! descriptor; after that, samples flow over the ring with buffer-full
//! backpressure. Writers park on a wait cell and are woken from the
//! service's `poll`, i.e. whenever the peer signals - by then it has
//! usually drained some samples.

use alloc::sync::Arc;

use maitake_sync::WaitCell;
use portable_atomic::{AtomicBool, Ordering};
use tandem_proto::{pcm, service, ResultReply};
use tracing::debug;

use crate::{
    comms::fifo::{FifoConsumer, FifoProducer},
    message::Envelope,
    registry::{DispatchError, Registry, RegistrationError, RpcError, Service},
};

////////////////////////////////////////////////////////////////////////////////
// Message and Error Types
////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PcmError {
    Rpc(RpcError),
    /// The peer rejected the request.
    Refused(i32),
    BadReply,
    /// The stream was stopped while a write was parked.
    Stopped,
    /// The sample ring reported a structural inconsistency.
    Transport,
}

////////////////////////////////////////////////////////////////////////////////
// Client Definition
////////////////////////////////////////////////////////////////////////////////

#[derive(Clone)]
pub struct PcmClient {
    registry: Arc<Registry>,
    shared: Arc<PcmShared>,
}

impl PcmClient {
    /// Register the PCM service over its command ring pair.
    pub async fn register(
        registry: &Arc<Registry>,
        tx: FifoProducer,
        rx: FifoConsumer,
    ) -> Result<PcmClient, RegistrationError> {
        let shared = Arc::new(PcmShared {
            space: WaitCell::new(),
            streaming: AtomicBool::new(false),
        });
        let svc = Arc::new(PcmService {
            rpc: registry.rpc_handle(),
            shared: shared.clone(),
        });
        registry
            .register(service::PCM, Some(tx), Some(rx), svc)
            .await?;
        Ok(PcmClient {
            registry: registry.clone(),
            shared,
        })
    }

    /// Start a stream: announce the sample ring to the peer and hand back
    /// the write side.
    pub async fn start(&self, id: u32, samples: FifoProducer) -> Result<PcmStream, PcmError> {
        let req = pcm::StartChanRequest {
            id,
            fifo: samples.handle(),
        };
        let mut params = [0u8; pcm::StartChanRequest::LEN];
        req.encode(&mut params).expect("sized for the layout");
        self.transact(pcm::Kind::RequestStartChan, pcm::Kind::ReplyStartChan, &params)
            .await?;

        self.shared.streaming.store(true, Ordering::Release);
        debug!(id = id as usize, "pcm stream started");
        Ok(PcmStream {
            registry: self.registry.clone(),
            shared: self.shared.clone(),
            samples,
            id,
        })
    }

    /// Stop a stream. Consumes the stream handle; a parked writer would
    /// otherwise never wake.
    pub async fn stop(&self, stream: PcmStream) -> Result<(), PcmError> {
        let req = pcm::StopChanRequest { id: stream.id };
        let mut params = [0u8; pcm::StopChanRequest::LEN];
        req.encode(&mut params).expect("sized for the layout");
        self.transact(pcm::Kind::RequestStopChan, pcm::Kind::ReplyStopChan, &params)
            .await?;

        self.shared.streaming.store(false, Ordering::Release);
        self.shared.space.wake();
        debug!(id = stream.id as usize, "pcm stream stopped");
        Ok(())
    }

    async fn transact(
        &self,
        kind: pcm::Kind,
        reply: pcm::Kind,
        params: &[u8],
    ) -> Result<(), PcmError> {
        let rep = self
            .registry
            .call(service::PCM, kind as u32, params, &[])
            .await
            .map_err(PcmError::Rpc)?;
        if rep.kind != reply as u32 {
            return Err(PcmError::BadReply);
        }
        let res = ResultReply::decode(&rep.params).map_err(|_| PcmError::BadReply)?;
        if res.result != 0 {
            return Err(PcmError::Refused(res.result));
        }
        Ok(())
    }
}

/// The write side of a running stream.
pub struct PcmStream {
    registry: Arc<Registry>,
    shared: Arc<PcmShared>,
    samples: FifoProducer,
    id: u32,
}

impl PcmStream {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Write one block of samples, waiting for ring space if necessary,
    /// then signal the peer.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), PcmError> {
        loop {
            if !self.shared.streaming.load(Ordering::Acquire) {
                return Err(PcmError::Stopped);
            }
            match self.samples.request(data.len()) {
                Ok(mut wgr) => {
                    wgr[..data.len()].copy_from_slice(data);
                    wgr.commit(data.len()).map_err(|_| PcmError::Transport)?;
                    self.registry.signal().await;
                    return Ok(());
                }
                Err(chute::Error::NoSpace) => {
                    // Full; park until the next peer signal.
                    let _ = self.shared.space.wait().await;
                }
                Err(_) => return Err(PcmError::Transport),
            }
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Server Definition
////////////////////////////////////////////////////////////////////////////////

struct PcmShared {
    space: WaitCell,
    streaming: AtomicBool,
}

struct PcmService {
    rpc: crate::registry::RpcHandle,
    shared: Arc<PcmShared>,
}

impl Service for PcmService {
    fn dispatch(&self, msg: Envelope<'_>) -> Result<(), DispatchError> {
        match pcm::Kind::try_from(msg.kind)? {
            pcm::Kind::ReplyStartChan | pcm::Kind::ReplyStopChan => {
                self.rpc.complete_reply(msg.kind, msg.params)
            }
            _ => Err(DispatchError::UnknownKind(msg.kind)),
        }
    }

    fn poll(&self) {
        // Every peer signal is a chance that sample space was freed.
        if self.shared.streaming.load(Ordering::Acquire) {
            self.shared.space.wake();
        }
    }

    fn teardown(&self) {
        self.shared.streaming.store(false, Ordering::Release);
        self.shared.space.wake();
    }
}
