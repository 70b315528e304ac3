//! # Voice Channels
//!
//! Call-channel management for the peer's voice engine: channel lifecycle
//! (acquire, wire media rings, start, stop, free), DTMF in both directions,
//! and RTCP control. Every request/reply pair goes through the registry's
//! synchronous call primitive; the two peer-initiated notifications
//! (detected DTMF and remote start) are delivered to a [`VoiceEvents`]
//! implementation.
//!
//! Media does not travel over the service's command rings. Each channel
//! owns a pair of dedicated rings - encoded audio from the peer, decoded
//! audio toward the peer - whose descriptors are handed over with
//! `open_channel`. The service's `poll` wakes any reader parked on a
//! non-empty encoded ring, so a blocked [`VoiceChannel::read_encoded`]
//! resumes on the peer signal that delivered the audio.

use alloc::{sync::Arc, vec::Vec};

use maitake_sync::{Mutex, WaitCell};
use tandem_proto::{service, voice, ResultReply};
use tracing::{debug, trace};

use crate::{
    comms::fifo::{FifoConsumer, FifoProducer, FrameGrantR, Ring},
    message::Envelope,
    registry::{DispatchError, Registry, RegistrationError, RpcError, Service},
};

////////////////////////////////////////////////////////////////////////////////
// Service Definition
////////////////////////////////////////////////////////////////////////////////

/// Peer-initiated voice notifications.
pub trait VoiceEvents: Send + Sync {
    /// The peer detected a DTMF event on a running channel.
    fn dtmf(&self, event: voice::ReceiveDtmf);
    /// The far end started a channel remotely.
    fn remote_start(&self, id: u32);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceError {
    Rpc(RpcError),
    /// The peer rejected the request.
    Refused(i32),
    BadReply,
}

////////////////////////////////////////////////////////////////////////////////
// Client Definition
////////////////////////////////////////////////////////////////////////////////

#[derive(Clone)]
pub struct VoiceClient {
    registry: Arc<Registry>,
    shared: Arc<VoiceShared>,
}

impl VoiceClient {
    /// Register the voice service over its command ring pair.
    pub async fn register(
        registry: &Arc<Registry>,
        tx: FifoProducer,
        rx: FifoConsumer,
        events: Arc<dyn VoiceEvents>,
    ) -> Result<VoiceClient, RegistrationError> {
        let shared = Arc::new(VoiceShared {
            watches: Mutex::new(Vec::new()),
        });
        let svc = Arc::new(VoiceService {
            rpc: registry.rpc_handle(),
            events,
            shared: shared.clone(),
        });
        registry
            .register(service::VOICE, Some(tx), Some(rx), svc)
            .await?;
        Ok(VoiceClient {
            registry: registry.clone(),
            shared,
        })
    }

    /// Acquire channel `id` on the peer.
    pub async fn get_chan(&self, id: u32) -> Result<(), VoiceError> {
        self.chan_op(id, voice::Kind::RequestGetChan, voice::Kind::ReplyGetChan)
            .await
    }

    /// Hand the channel's media rings to the peer and start watching the
    /// encoded side.
    ///
    /// `enc` is the host half of the encoded-audio ring (peer to host),
    /// `dec` of the decoded-audio ring (host to peer).
    pub async fn open_channel(
        &self,
        id: u32,
        enc: FifoConsumer,
        dec: FifoProducer,
    ) -> Result<VoiceChannel, VoiceError> {
        let req = voice::SetChanFifosRequest {
            id,
            enc: enc.handle(),
            dec: dec.handle(),
        };
        let mut params = [0u8; voice::SetChanFifosRequest::LEN];
        req.encode(&mut params).expect("sized for the layout");
        self.transact(
            voice::Kind::RequestSetChanFifos,
            voice::Kind::ReplySetChanFifos,
            &params,
        )
        .await?;

        let ready = Arc::new(WaitCell::new());
        {
            let mut watches = self.shared.watches.lock().await;
            watches.retain(|w| w.id != id);
            watches.push(Watch {
                id,
                ring: enc.ring().clone(),
                ready: ready.clone(),
            });
        }

        debug!(id = id as usize, "voice channel media rings wired");
        Ok(VoiceChannel {
            id,
            registry: self.registry.clone(),
            enc,
            dec,
            ready,
        })
    }

    /// Start a wired channel with the given codec configuration.
    pub async fn start_chan(&self, req: &voice::StartChanRequest) -> Result<(), VoiceError> {
        let mut params = [0u8; voice::StartChanRequest::LEN];
        req.encode(&mut params).expect("sized for the layout");
        self.transact(
            voice::Kind::RequestStartChan,
            voice::Kind::ReplyStartChan,
            &params,
        )
        .await
    }

    pub async fn stop_chan(&self, id: u32) -> Result<(), VoiceError> {
        self.chan_op(id, voice::Kind::RequestStopChan, voice::Kind::ReplyStopChan)
            .await
    }

    /// Release channel `id` on the peer and stop watching its media ring.
    /// The [`VoiceChannel`] handle should be dropped afterwards.
    pub async fn free_chan(&self, id: u32) -> Result<(), VoiceError> {
        self.chan_op(id, voice::Kind::RequestFreeChan, voice::Kind::ReplyFreeChan)
            .await?;
        let mut watches = self.shared.watches.lock().await;
        watches.retain(|w| w.id != id);
        Ok(())
    }

    /// Ask the peer to generate a DTMF event on a running channel.
    pub async fn send_dtmf(&self, req: &voice::SendDtmfRequest) -> Result<(), VoiceError> {
        let mut params = [0u8; voice::SendDtmfRequest::LEN];
        req.encode(&mut params).expect("sized for the layout");
        self.transact(
            voice::Kind::RequestSendDtmf,
            voice::Kind::ReplySendDtmf,
            &params,
        )
        .await
    }

    pub async fn start_rtcp(&self, id: u32, interval: u32) -> Result<(), VoiceError> {
        let req = voice::StartRtcpRequest { id, interval };
        let mut params = [0u8; voice::StartRtcpRequest::LEN];
        req.encode(&mut params).expect("sized for the layout");
        self.transact(
            voice::Kind::RequestStartRtcp,
            voice::Kind::ReplyStartRtcp,
            &params,
        )
        .await
    }

    pub async fn stop_rtcp(&self, id: u32) -> Result<(), VoiceError> {
        self.chan_op(id, voice::Kind::RequestStopRtcp, voice::Kind::ReplyStopRtcp)
            .await
    }

    pub async fn report_rtcp(&self, id: u32) -> Result<(), VoiceError> {
        self.chan_op(
            id,
            voice::Kind::RequestReportRtcp,
            voice::Kind::ReplyReportRtcp,
        )
        .await
    }

    async fn chan_op(
        &self,
        id: u32,
        kind: voice::Kind,
        reply: voice::Kind,
    ) -> Result<(), VoiceError> {
        let req = voice::ChanRequest { id };
        let mut params = [0u8; voice::ChanRequest::LEN];
        req.encode(&mut params).expect("sized for the layout");
        self.transact(kind, reply, &params).await
    }

    async fn transact(
        &self,
        kind: voice::Kind,
        reply: voice::Kind,
        params: &[u8],
    ) -> Result<(), VoiceError> {
        let rep = self
            .registry
            .call(service::VOICE, kind as u32, params, &[])
            .await
            .map_err(VoiceError::Rpc)?;
        if rep.kind != reply as u32 {
            return Err(VoiceError::BadReply);
        }
        let res = ResultReply::decode(&rep.params).map_err(|_| VoiceError::BadReply)?;
        if res.result != 0 {
            return Err(VoiceError::Refused(res.result));
        }
        Ok(())
    }
}

/// One wired voice channel: the host ends of its media rings.
pub struct VoiceChannel {
    id: u32,
    registry: Arc<Registry>,
    enc: FifoConsumer,
    dec: FifoProducer,
    ready: Arc<WaitCell>,
}

impl VoiceChannel {
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Wait for and borrow the next block of encoded audio from the peer.
    ///
    /// The grant must be released before the next read; holding it across a
    /// fallible copy (e.g. to userspace) and only releasing on success is
    /// the intended pattern.
    pub async fn read_encoded(&mut self) -> Result<FrameGrantR<'_>, chute::Error> {
        while self.enc.is_empty() {
            let _ = self.ready.wait().await;
        }
        match self.enc.read()? {
            Some(rgr) => Ok(rgr),
            None => unreachable!("sole consumer of a non-empty ring"),
        }
    }

    /// Ship one block of decoded audio to the peer and signal it.
    ///
    /// [`chute::Error::NoSpace`] means the peer is behind; dropping the
    /// block is the usual policy for live audio.
    pub async fn write_decoded(&mut self, data: &[u8]) -> Result<(), chute::Error> {
        let mut wgr = self.dec.request(data.len())?;
        wgr[..data.len()].copy_from_slice(data);
        wgr.commit(data.len())?;
        self.registry.signal().await;
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Server Definition
////////////////////////////////////////////////////////////////////////////////

struct Watch {
    id: u32,
    ring: Arc<Ring>,
    ready: Arc<WaitCell>,
}

struct VoiceShared {
    watches: Mutex<Vec<Watch>>,
}

struct VoiceService {
    rpc: crate::registry::RpcHandle,
    events: Arc<dyn VoiceEvents>,
    shared: Arc<VoiceShared>,
}

impl Service for VoiceService {
    fn dispatch(&self, msg: Envelope<'_>) -> Result<(), DispatchError> {
        use voice::Kind;
        match Kind::try_from(msg.kind)? {
            Kind::ReplyGetChan
            | Kind::ReplySetChanFifos
            | Kind::ReplyStartChan
            | Kind::ReplyStopChan
            | Kind::ReplyFreeChan
            | Kind::ReplySendDtmf
            | Kind::ReplyStartRtcp
            | Kind::ReplyStopRtcp
            | Kind::ReplyReportRtcp => self.rpc.complete_reply(msg.kind, msg.params),

            Kind::ReceiveDtmf => {
                let event = voice::ReceiveDtmf::decode(msg.params)?;
                trace!(id = event.id as usize, event.event, "peer detected dtmf");
                self.events.dtmf(event);
                Ok(())
            }

            Kind::RemoteStart => {
                let req = voice::ChanRequest::decode(msg.params)?;
                debug!(id = req.id as usize, "remote start");
                self.events.remote_start(req.id);
                Ok(())
            }

            // Request kinds flow host to peer only.
            _ => Err(DispatchError::UnknownKind(msg.kind)),
        }
    }

    fn poll(&self) {
        // Wake any reader whose encoded-audio ring has data. Skipping a
        // contended lock is fine: the next peer signal polls again.
        let Some(watches) = self.shared.watches.try_lock() else {
            return;
        };
        for watch in watches.iter() {
            if !watch.ring.is_empty() {
                watch.ready.wake();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use core::cell::{Cell, RefCell};
    use std::rc::Rc;
    use std::sync::Mutex as StdMutex;
    use std::vec::Vec;

    use super::*;
    use crate::comms::fifo::fifo;
    use crate::message;
    use crate::test_util::Harness;
    use futures::task::LocalSpawnExt;
    use tandem_proto::ResultReply;

    #[derive(Default)]
    struct Events {
        dtmf: StdMutex<Vec<voice::ReceiveDtmf>>,
        remote: StdMutex<Vec<u32>>,
    }

    impl VoiceEvents for Events {
        fn dtmf(&self, event: voice::ReceiveDtmf) {
            self.dtmf.lock().unwrap().push(event);
        }

        fn remote_start(&self, id: u32) {
            self.remote.lock().unwrap().push(id);
        }
    }

    struct Fixture {
        h: Harness,
        client: VoiceClient,
        events: Arc<Events>,
        /// Far side of the voice command ring (what the host sends).
        cmd: crate::comms::fifo::FifoConsumer,
        /// Far side of the voice event ring (what the peer sends).
        evt: crate::comms::fifo::FifoProducer,
    }

    fn fixture() -> Fixture {
        let mut h = Harness::initialized(true);
        let (tx, cmd) = fifo(1024, true);
        let (evt, rx) = fifo(1024, true);
        let events = Arc::new(Events::default());
        let client = h
            .pool
            .run_until(VoiceClient::register(&h.registry, tx, rx, events.clone()))
            .unwrap();
        Fixture {
            h,
            client,
            events,
            cmd,
            evt,
        }
    }

    impl Fixture {
        /// Pop the next host command frame off the voice ring.
        fn next_cmd(&mut self) -> (u32, Vec<u8>) {
            let rgr = self.cmd.read().unwrap().expect("a command frame");
            let env = message::Envelope::parse(&rgr).unwrap();
            let out = (env.kind, env.params.to_vec());
            rgr.release();
            out
        }

        /// Answer the in-flight voice request with a bare result code.
        fn reply(&mut self, kind: voice::Kind, result: i32) {
            let mut params = [0u8; ResultReply::LEN];
            ResultReply { result }.encode(&mut params).unwrap();
            message::build(&mut self.evt, kind as u32, &params, &[]).unwrap();
            self.h.notify.notify();
        }
    }

    #[test]
    fn chan_op_round_trip() {
        let mut f = fixture();

        let done = Rc::new(Cell::new(false));
        {
            let client = f.client.clone();
            let done = done.clone();
            f.h.pool
                .spawner()
                .spawn_local(async move {
                    client.get_chan(3).await.unwrap();
                    done.set(true);
                })
                .unwrap();
        }
        f.h.pool.run_until_stalled();
        assert!(!done.get());

        let (kind, params) = f.next_cmd();
        assert_eq!(kind, voice::Kind::RequestGetChan as u32);
        assert_eq!(voice::ChanRequest::decode(&params).unwrap().id, 3);

        f.reply(voice::Kind::ReplyGetChan, 0);
        f.h.pool.run_until_stalled();
        assert!(done.get());
    }

    #[test]
    fn refusal_is_surfaced() {
        let mut f = fixture();

        let out = Rc::new(Cell::new(None));
        {
            let client = f.client.clone();
            let out = out.clone();
            f.h.pool
                .spawner()
                .spawn_local(async move {
                    out.set(Some(client.stop_chan(1).await));
                })
                .unwrap();
        }
        f.h.pool.run_until_stalled();
        let _ = f.next_cmd();

        f.reply(voice::Kind::ReplyStopChan, -5);
        f.h.pool.run_until_stalled();
        assert_eq!(out.get(), Some(Err(VoiceError::Refused(-5))));
    }

    #[test]
    fn peer_notifications_reach_the_events_hook() {
        let mut f = fixture();

        let event = voice::ReceiveDtmf {
            id: 2,
            status: 0,
            event: 11,
            volume: -8,
            duration: 80,
        };
        let mut params = [0u8; voice::ReceiveDtmf::LEN];
        event.encode(&mut params).unwrap();
        message::build(&mut f.evt, voice::Kind::ReceiveDtmf as u32, &params, &[]).unwrap();

        let remote = voice::ChanRequest { id: 4 };
        let mut params = [0u8; voice::ChanRequest::LEN];
        remote.encode(&mut params).unwrap();
        message::build(&mut f.evt, voice::Kind::RemoteStart as u32, &params, &[]).unwrap();

        f.h.notify.notify();
        f.h.pool.run_until_stalled();

        assert_eq!(f.events.dtmf.lock().unwrap().as_slice(), &[event]);
        assert_eq!(f.events.remote.lock().unwrap().as_slice(), &[4]);
    }

    #[test]
    fn encoded_audio_wakes_a_parked_reader() {
        let mut f = fixture();

        // Media rings for channel 1.
        let (mut enc_far, enc) = fifo(256, true);
        let (dec, _dec_far) = fifo(256, true);

        // Wire the channel.
        let slot: Rc<RefCell<Option<VoiceChannel>>> = Rc::new(RefCell::new(None));
        {
            let client = f.client.clone();
            let slot = slot.clone();
            f.h.pool
                .spawner()
                .spawn_local(async move {
                    let chan = client.open_channel(1, enc, dec).await.unwrap();
                    *slot.borrow_mut() = Some(chan);
                })
                .unwrap();
        }
        f.h.pool.run_until_stalled();

        let (kind, params) = f.next_cmd();
        assert_eq!(kind, voice::Kind::RequestSetChanFifos as u32);
        let req = voice::SetChanFifosRequest::decode(&params).unwrap();
        assert_eq!(req.id, 1);
        assert!(!req.enc.is_none());
        assert!(!req.dec.is_none());

        f.reply(voice::Kind::ReplySetChanFifos, 0);
        f.h.pool.run_until_stalled();
        let mut chan = slot.borrow_mut().take().expect("channel wired");

        // Park a reader on the empty encoded ring.
        let got: Rc<RefCell<Option<Vec<u8>>>> = Rc::new(RefCell::new(None));
        {
            let got = got.clone();
            f.h.pool
                .spawner()
                .spawn_local(async move {
                    let rgr = chan.read_encoded().await.unwrap();
                    *got.borrow_mut() = Some(rgr.to_vec());
                    rgr.release();
                })
                .unwrap();
        }
        f.h.pool.run_until_stalled();
        assert!(got.borrow().is_none());

        // The peer ships a block of encoded audio and signals.
        let mut wgr = enc_far.request(4).unwrap();
        wgr[..4].copy_from_slice(&[9, 8, 7, 6]);
        wgr.commit(4).unwrap();
        f.h.notify.notify();
        f.h.pool.run_until_stalled();

        assert_eq!(got.borrow().as_deref(), Some(&[9u8, 8, 7, 6][..]));
    }
}
