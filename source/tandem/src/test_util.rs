//! Test plumbing: a scripted in-process peer.
//!
//! The peer holds the far ends of the control rings. Its doorbell
//! implementation drains every host-to-peer frame synchronously, records
//! it, and - in auto mode - answers control requests the way a healthy
//! firmware image would, then raises the inbound notification so the
//! dispatcher task picks the replies up.

extern crate std;

use std::sync::Mutex as StdMutex;
use std::vec::Vec;

use alloc::sync::Arc;
use futures::executor::LocalPool;
use futures::task::LocalSpawnExt;
use tandem_proto::{control, ResultReply};

use crate::{
    comms::fifo::{fifo, FifoConsumer, FifoProducer},
    dispatch::{Dispatcher, Notify},
    message,
    registry::{ConfigSink, Doorbell, Registry},
    Settings,
};

/// One host-to-peer control frame, as observed by the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SeenFrame {
    pub kind: u32,
    pub params: Vec<u8>,
    pub payload: Vec<u8>,
}

pub(crate) struct TestPeer {
    inner: StdMutex<PeerInner>,
    notify: Notify,
}

struct PeerInner {
    /// Far side of the host's outbound control ring.
    host_tx: FifoConsumer,
    /// Far side of the host's inbound control ring.
    host_rx: FifoProducer,
    /// Answer control requests immediately.
    auto: bool,
    /// Result code for the next register replies, when nonzero.
    refuse_register: i32,
    seen: Vec<SeenFrame>,
}

/// The timestamp the auto peer puts into timing replies.
pub(crate) const PEER_TIMESTAMP: u64 = 0x0055_aa77;
/// The byte the auto peer fills timing statistics with.
pub(crate) const PEER_STATS_FILL: u8 = 0xEE;

impl TestPeer {
    pub(crate) fn new(
        host_tx: FifoConsumer,
        host_rx: FifoProducer,
        notify: Notify,
        auto: bool,
    ) -> Self {
        Self {
            inner: StdMutex::new(PeerInner {
                host_tx,
                host_rx,
                auto,
                refuse_register: 0,
                seen: Vec::new(),
            }),
            notify,
        }
    }

    /// Everything the host has sent on the control ring so far.
    pub(crate) fn seen_frames(&self) -> Vec<SeenFrame> {
        self.inner.lock().unwrap().seen.clone()
    }

    pub(crate) fn seen_kinds(&self) -> Vec<u32> {
        self.inner
            .lock()
            .unwrap()
            .seen
            .iter()
            .map(|f| f.kind)
            .collect()
    }

    /// Make subsequent register replies carry `result`.
    pub(crate) fn refuse_register(&self, result: i32) {
        self.inner.lock().unwrap().refuse_register = result;
    }

    /// Push one raw control frame to the host and signal it.
    pub(crate) fn push_control(&self, kind: u32, params: &[u8], payload: &[u8]) {
        {
            let mut inner = self.inner.lock().unwrap();
            message::build(&mut inner.host_rx, kind, params, payload).unwrap();
        }
        self.notify.notify();
    }

    fn service(inner: &mut PeerInner) -> bool {
        let mut replied = false;
        loop {
            let frame = {
                let Some(rgr) = inner.host_tx.read().unwrap() else {
                    break;
                };
                let env = message::Envelope::parse(&rgr).unwrap();
                let frame = SeenFrame {
                    kind: env.kind,
                    params: env.params.to_vec(),
                    payload: env.payload.to_vec(),
                };
                rgr.release();
                frame
            };

            if inner.auto {
                replied |= Self::auto_reply(inner, &frame);
            }
            inner.seen.push(frame);
        }
        replied
    }

    fn auto_reply(inner: &mut PeerInner, frame: &SeenFrame) -> bool {
        let kind = control::Kind::try_from(frame.kind).unwrap();
        let reply = |inner: &mut PeerInner, kind: control::Kind, params: &[u8], payload: &[u8]| {
            message::build(&mut inner.host_rx, kind as u32, params, payload).unwrap();
        };

        match kind {
            control::Kind::RequestInit => {
                let mut params = [0u8; ResultReply::LEN];
                ResultReply { result: 0 }.encode(&mut params).unwrap();
                reply(inner, control::Kind::ReplyInit, &params, &[]);
            }
            control::Kind::RequestRegister => {
                let req = control::RegisterRequest::decode(&frame.params).unwrap();
                let rep = control::RegisterReply {
                    id: req.id,
                    result: inner.refuse_register,
                };
                let mut params = [0u8; control::RegisterReply::LEN];
                rep.encode(&mut params).unwrap();
                reply(inner, control::Kind::ReplyRegister, &params, &[]);
            }
            control::Kind::RequestDeregister => {
                let req = control::DeregisterRequest::decode(&frame.params).unwrap();
                let rep = control::DeregisterReply {
                    id: req.id,
                    result: 0,
                };
                let mut params = [0u8; control::DeregisterReply::LEN];
                rep.encode(&mut params).unwrap();
                reply(inner, control::Kind::ReplyDeregister, &params, &[]);
            }
            control::Kind::RequestTiming => {
                let rep = control::TimingReply {
                    timestamp: PEER_TIMESTAMP,
                };
                let mut params = [0u8; control::TimingReply::LEN];
                rep.encode(&mut params).unwrap();
                let stats = [PEER_STATS_FILL; control::TIMING_STATS_LEN];
                reply(inner, control::Kind::ReplyTiming, &params, &stats);
            }
            // Notifications with no reply.
            _ => return false,
        }
        true
    }
}

impl Doorbell for TestPeer {
    fn ring(&self) {
        let replied = {
            let mut inner = self.inner.lock().unwrap();
            Self::service(&mut inner)
        };
        if replied {
            self.notify.notify();
        }
    }
}

#[derive(Default)]
pub(crate) struct TestConfig {
    pub writes: StdMutex<Vec<(usize, Vec<u8>)>>,
}

impl ConfigSink for TestConfig {
    fn write(&self, pos: usize, data: &[u8]) {
        self.writes.lock().unwrap().push((pos, data.to_vec()));
    }
}

/// A fully attached stack with the scripted peer and a running dispatcher
/// task on a local executor.
pub(crate) struct Harness {
    pub registry: Arc<Registry>,
    pub peer: Arc<TestPeer>,
    pub config: Arc<TestConfig>,
    pub notify: Notify,
    pub pool: LocalPool,
}

impl Harness {
    pub(crate) fn new(auto: bool) -> Self {
        let registry = Arc::new(Registry::new(Settings::default()));
        let (dispatcher, notify) = Dispatcher::new(registry.clone());

        let (ctrl_tx, peer_tx) = fifo(2048, true);
        let (peer_rx, ctrl_rx) = fifo(2048, true);
        let peer = Arc::new(TestPeer::new(peer_tx, peer_rx, notify.clone(), auto));
        let config = Arc::new(TestConfig::default());

        let mut pool = LocalPool::new();
        pool.spawner()
            .spawn_local(dispatcher.run())
            .expect("spawning the dispatcher task");

        pool.run_until(registry.attach(
            peer.clone(),
            config.clone(),
            ctrl_tx,
            ctrl_rx,
        ))
        .expect("attach on a fresh registry");

        Harness {
            registry,
            peer,
            config,
            notify,
            pool,
        }
    }

    /// Attach-and-init shortcut for tests that start from a running stack.
    pub(crate) fn initialized(auto: bool) -> Self {
        let mut h = Self::new(auto);
        h.pool
            .run_until(h.registry.init_stack(0, &[]))
            .expect("init against the scripted peer");
        h
    }
}
