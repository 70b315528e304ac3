//! # Debug Log Forwarding
//!
//! The peer prints into a (deliberately large) peer-to-host ring; this
//! service drains it and hands each chunk to the host's [`LogSink`], where
//! it typically lands in a device buffer until userspace reads it. Receive
//! only - there is no outbound ring.

use alloc::sync::Arc;

use tandem_proto::{debug_log, service};
use tracing::trace;

use crate::{
    comms::fifo::FifoConsumer,
    message::Envelope,
    registry::{DispatchError, Registry, RegistrationError, Service},
};

////////////////////////////////////////////////////////////////////////////////
// Service Definition
////////////////////////////////////////////////////////////////////////////////

/// Where forwarded peer log output goes. Chunks arrive in commit order;
/// the implementation decides about buffering and overflow.
pub trait LogSink: Send + Sync {
    fn print(&self, text: &[u8]);
}

pub struct DebugLogServer;

impl DebugLogServer {
    /// Register the debug log service.
    ///
    /// `rx` is the host half of the peer-to-host log ring. Size it
    /// generously; log bursts the ring cannot hold are lost on the peer
    /// side.
    pub async fn register(
        registry: &Registry,
        rx: FifoConsumer,
        sink: Arc<dyn LogSink>,
    ) -> Result<(), RegistrationError> {
        registry
            .register(
                service::DEBUG_LOG,
                None,
                Some(rx),
                Arc::new(DebugLogService { sink }),
            )
            .await
    }
}

////////////////////////////////////////////////////////////////////////////////
// Server Definition
////////////////////////////////////////////////////////////////////////////////

struct DebugLogService {
    sink: Arc<dyn LogSink>,
}

impl Service for DebugLogService {
    fn dispatch(&self, msg: Envelope<'_>) -> Result<(), DispatchError> {
        match debug_log::Kind::try_from(msg.kind)? {
            debug_log::Kind::Print => {
                trace!(len = msg.payload.len(), "peer log chunk");
                self.sink.print(msg.payload);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::sync::Mutex;
    use std::vec::Vec;

    struct RecordingSink {
        lines: Mutex<Vec<Vec<u8>>>,
    }

    impl LogSink for RecordingSink {
        fn print(&self, text: &[u8]) {
            self.lines.lock().unwrap().push(text.to_vec());
        }
    }

    #[test]
    fn print_payload_reaches_the_sink() {
        let sink = Arc::new(RecordingSink {
            lines: Mutex::new(Vec::new()),
        });
        let svc = DebugLogService { sink: sink.clone() };

        svc.dispatch(Envelope {
            kind: debug_log::Kind::Print as u32,
            params: &[],
            payload: b"hello from the peer",
        })
        .unwrap();

        assert_eq!(sink.lines.lock().unwrap().as_slice(), &[b"hello from the peer".to_vec()]);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let svc = DebugLogService {
            sink: Arc::new(RecordingSink {
                lines: Mutex::new(Vec::new()),
            }),
        };
        assert_eq!(
            svc.dispatch(Envelope {
                kind: 7,
                params: &[],
                payload: &[],
            }),
            Err(DispatchError::UnknownKind(7))
        );
    }
}
