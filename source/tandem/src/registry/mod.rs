//! # The service registry
//!
//! The registry owns the table mapping service ids to their rings and
//! [`Service`] implementations, the stack lifecycle (loaded / initialized),
//! and the one synchronous request/reply primitive every service shares:
//! [`Registry::call`].
//!
//! There is exactly one reply slot and one completion for the whole stack,
//! so at most one call may be in flight at a time; concurrent callers
//! serialize on the registry's RPC lock. The reply itself arrives like any
//! other inbound message: the dispatcher hands it to the owning service,
//! whose [`Service::dispatch`] recognizes the reply kind and completes the
//! slot through its [`RpcHandle`].
//!
//! Service id 0 is the control plane and is owned by the registry itself:
//! init/deinit, registration, timing queries, and peer-initiated
//! configuration writes all travel over it.

use alloc::{sync::Arc, vec::Vec};

use maitake_sync::Mutex;
use portable_atomic::{AtomicBool, Ordering};
use tandem_proto::{control, service, FifoHandle, ResultReply, WireError};
use tracing::{debug, info, trace, warn};

use crate::{
    comms::{
        fifo::{FifoConsumer, FifoProducer},
        rosc::Rosc,
    },
    message::{self, Envelope},
    Settings,
};


/// The outbound half of the peer notification mechanism: a fire-and-forget
/// "new data is available" signal. Platform code implements this with
/// whatever doorbell register or software interrupt the hardware offers.
pub trait Doorbell: Send + Sync {
    fn ring(&self);
}

/// External collaborator for peer-initiated configuration writes.
///
/// The peer pushes configuration data to the host in chunks; each chunk is
/// handed here. The host answers asynchronously via
/// [`Registry::reply_configuration_write`].
pub trait ConfigSink: Send + Sync {
    fn write(&self, pos: usize, data: &[u8]);
}

/// One registered service.
///
/// `dispatch` is invoked by the dispatcher for every inbound message, in
/// commit order, and must not block or issue synchronous calls; its job is
/// to decode, hand off, and - for reply kinds - complete the in-flight call
/// through an [`RpcHandle`]. `poll` runs after each drain for work that is
/// not itself a message, e.g. waking a blocked reader.
pub trait Service: Send + Sync {
    fn dispatch(&self, msg: Envelope<'_>) -> Result<(), DispatchError>;

    /// Invoked once the service has been registered with the peer.
    fn setup(&self) -> Result<(), SetupError> {
        Ok(())
    }

    /// Invoked when the service is deregistered or the stack is torn down.
    fn teardown(&self) {}

    /// Channel-independent follow-up work, run after each inbound drain.
    fn poll(&self) {}
}

/// Why a service's `dispatch` rejected a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchError {
    /// A kind value this service does not handle.
    UnknownKind(u32),
    /// The parameter block did not decode.
    Malformed(WireError),
    /// A reply kind arrived while no call was in flight.
    UnexpectedReply,
    /// Reply parameters exceed [`MAX_REPLY_PARAMS`].
    ReplyTooBig,
}

impl From<WireError> for DispatchError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::UnknownKind(k) => DispatchError::UnknownKind(k),
            other => DispatchError::Malformed(other),
        }
    }
}

/// A nonzero status from a service's `setup` callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupError(pub i32);

/// Synchronous call failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcError {
    /// The peer stack is not loaded/initialized far enough for this
    /// operation. Returned immediately, without blocking.
    PeerNotReady,
    /// No service with that id, or it has no outbound ring.
    NoSuchService,
    /// The outbound ring is full. Backpressure; retry or drop per service
    /// policy.
    NoSpace,
    /// The transport reported a structural inconsistency.
    Broken,
    /// The reply did not have the expected kind or layout.
    BadReply,
    /// The peer answered with a nonzero status.
    Refused(i32),
    /// The reply slot was torn down while the call was in flight.
    Cancelled,
}

impl From<chute::Error> for RpcError {
    fn from(e: chute::Error) -> Self {
        match e {
            chute::Error::NoSpace => RpcError::NoSpace,
            _ => RpcError::Broken,
        }
    }
}

/// Registration and deregistration failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationError {
    /// Id out of range, or the reserved control id.
    InvalidId,
    /// Another service already occupies that id.
    AlreadyInUse,
    Rpc(RpcError),
    /// The reply did not have the expected kind or layout.
    BadReply,
    /// The peer rejected the request with a nonzero status.
    PeerRefused(i32),
    Setup(SetupError),
}

impl From<RpcError> for RegistrationError {
    fn from(e: RpcError) -> Self {
        RegistrationError::Rpc(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachError {
    AlreadyLoaded,
}

/// Upper bound on reply parameter blocks passing through the shared slot.
pub const MAX_REPLY_PARAMS: usize = 64;

/// The parameters of the reply that completed a [`Registry::call`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub kind: u32,
    pub params: heapless::Vec<u8, MAX_REPLY_PARAMS>,
}

/// Shared control-plane state: the reply slot plus the retained timing
/// statistics.
struct ControlState {
    reply: Rosc<Reply>,
    timing: Mutex<[u8; control::TIMING_STATS_LEN]>,
}

impl ControlState {
    fn complete_reply(&self, kind: u32, params: &[u8]) -> Result<(), DispatchError> {
        let params =
            heapless::Vec::from_slice(params).map_err(|_| DispatchError::ReplyTooBig)?;
        self.reply
            .complete(Reply { kind, params })
            .map_err(|_| DispatchError::UnexpectedReply)
    }
}

/// A service's handle for completing in-flight synchronous calls.
///
/// Handed out by [`Registry::rpc_handle`]; a service's `dispatch` calls
/// [`RpcHandle::complete_reply`] for each of its reply kinds.
#[derive(Clone)]
pub struct RpcHandle {
    state: Arc<ControlState>,
}

impl RpcHandle {
    pub fn complete_reply(&self, kind: u32, params: &[u8]) -> Result<(), DispatchError> {
        self.state.complete_reply(kind, params)
    }
}

struct Slot {
    tx: Option<FifoProducer>,
    rx: Option<FifoConsumer>,
    tx_handle: FifoHandle,
    rx_handle: FifoHandle,
    svc: Arc<dyn Service>,
    active: bool,
}

/// The service table plus the shared synchronous RPC state. One per
/// deployment; see the crate docs for the bring-up sequence.
pub struct Registry {
    settings: Settings,
    slots: Mutex<Vec<Option<Slot>>>,
    /// Serializes the request/reply exchange; there is only one reply slot.
    rpc_lock: Mutex<()>,
    state: Arc<ControlState>,
    doorbell: Mutex<Option<Arc<dyn Doorbell>>>,
    loaded: AtomicBool,
    initialized: AtomicBool,
}

// === impl Registry ===

impl Registry {
    pub fn new(settings: Settings) -> Self {
        let mut table = Vec::new();
        table.resize_with(settings.max_services, || None);
        Self {
            settings,
            slots: Mutex::new(table),
            rpc_lock: Mutex::new(()),
            state: Arc::new(ControlState {
                reply: Rosc::new(),
                timing: Mutex::new([0; control::TIMING_STATS_LEN]),
            }),
            doorbell: Mutex::new(None),
            loaded: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
        }
    }

    /// The notification path to the peer exists.
    pub fn loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// The peer has completed its startup handshake.
    pub fn initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// A handle for services to complete in-flight calls with.
    pub fn rpc_handle(&self) -> RpcHandle {
        RpcHandle {
            state: self.state.clone(),
        }
    }

    /// Wire up the doorbell and the control-plane rings; the stack becomes
    /// *loaded*.
    ///
    /// `ctrl_tx`/`ctrl_rx` are the host halves of the two control rings; the
    /// peer reaches the same memory through the shared region.
    pub async fn attach(
        &self,
        doorbell: Arc<dyn Doorbell>,
        config: Arc<dyn ConfigSink>,
        ctrl_tx: FifoProducer,
        ctrl_rx: FifoConsumer,
    ) -> Result<(), AttachError> {
        if self.loaded.swap(true, Ordering::AcqRel) {
            return Err(AttachError::AlreadyLoaded);
        }

        {
            let mut slots = self.slots.lock().await;
            let tx_handle = ctrl_tx.handle();
            let rx_handle = ctrl_rx.handle();
            slots[service::CONTROL as usize] = Some(Slot {
                tx: Some(ctrl_tx),
                rx: Some(ctrl_rx),
                tx_handle,
                rx_handle,
                svc: Arc::new(ControlService {
                    state: self.state.clone(),
                    config,
                }),
                active: true,
            });
        }
        *self.doorbell.lock().await = Some(doorbell);

        info!("notification path attached, stack loaded");
        Ok(())
    }

    /// Tear down the notification path. Services stay in the table but go
    /// inactive; no teardown callbacks run.
    pub async fn detach(&self) {
        self.initialized.store(false, Ordering::Release);
        self.loaded.store(false, Ordering::Release);
        *self.doorbell.lock().await = None;

        let mut slots = self.slots.lock().await;
        slots[service::CONTROL as usize] = None;
        for slot in slots.iter_mut().flatten() {
            slot.active = false;
        }

        info!("stack unloaded");
    }

    /// Store a service in the table.
    ///
    /// If the peer stack is already initialized this immediately performs
    /// the registration exchange, activates the service, and runs its
    /// `setup`. Otherwise the entry stays pending and is registered
    /// automatically by [`Registry::init_stack`].
    pub async fn register(
        &self,
        id: service::Id,
        tx: Option<FifoProducer>,
        rx: Option<FifoConsumer>,
        svc: Arc<dyn Service>,
    ) -> Result<(), RegistrationError> {
        let idx = id as usize;
        if idx >= self.settings.max_services || id == service::CONTROL {
            return Err(RegistrationError::InvalidId);
        }

        {
            let mut slots = self.slots.lock().await;
            if slots[idx].is_some() {
                return Err(RegistrationError::AlreadyInUse);
            }
            let tx_handle = tx.as_ref().map(FifoProducer::handle).unwrap_or(FifoHandle::NONE);
            let rx_handle = rx.as_ref().map(FifoConsumer::handle).unwrap_or(FifoHandle::NONE);
            slots[idx] = Some(Slot {
                tx,
                rx,
                tx_handle,
                rx_handle,
                svc,
                active: false,
            });
        }

        if self.initialized() {
            self.register_with_peer(id).await
        } else {
            debug!(id = idx, "registration deferred until the peer initializes");
            Ok(())
        }
    }

    /// Remove a service from the table.
    ///
    /// Performs the deregistration exchange when the peer stack is
    /// initialized; regardless of its outcome the table entry is cleared and
    /// `teardown` runs if the service had been active.
    pub async fn deregister(&self, id: service::Id) -> Result<(), RegistrationError> {
        let idx = id as usize;
        if idx >= self.settings.max_services || id == service::CONTROL {
            return Err(RegistrationError::InvalidId);
        }

        let rpc_result = if self.initialized() {
            self.deregister_with_peer(id).await
        } else {
            Ok(())
        };

        let entry = {
            let mut slots = self.slots.lock().await;
            slots[idx].take()
        };
        match entry {
            Some(slot) => {
                if slot.active {
                    slot.svc.teardown();
                }
            }
            None => return Err(RegistrationError::InvalidId),
        }

        info!(id = idx, "service deregistered");
        rpc_result
    }

    /// Run the init handshake with the peer; the stack becomes
    /// *initialized* and every pending service is registered, in ascending
    /// id order.
    ///
    /// `config` is an opaque configuration blob delivered alongside the init
    /// request.
    pub async fn init_stack(&self, options: u32, config: &[u8]) -> Result<(), RpcError> {
        if !self.loaded() {
            return Err(RpcError::PeerNotReady);
        }

        {
            let _rpc = self.rpc_lock.lock().await;
            let req = control::InitRequest { options };
            let mut params = [0u8; control::InitRequest::LEN];
            req.encode(&mut params).expect("sized for the layout");

            let reply = self
                .transact(
                    service::CONTROL,
                    control::Kind::RequestInit as u32,
                    &params,
                    config,
                )
                .await?;
            if reply.kind != control::Kind::ReplyInit as u32 {
                return Err(RpcError::BadReply);
            }
            let rep = ResultReply::decode(&reply.params).map_err(|_| RpcError::BadReply)?;
            if rep.result != 0 {
                return Err(RpcError::Refused(rep.result));
            }

            self.initialized.store(true, Ordering::Release);
            info!("peer stack initialized");
        }

        // Register everything that arrived while the peer was still booting.
        for idx in 1..self.settings.max_services {
            let pending = {
                let slots = self.slots.lock().await;
                matches!(&slots[idx], Some(slot) if !slot.active)
            };
            if pending {
                if let Err(error) = self.register_with_peer(idx as service::Id).await {
                    warn!(id = idx, ?error, "deferred registration failed");
                }
            }
        }

        Ok(())
    }

    /// Drop the peer stack back to *loaded*: deregister every active
    /// service, send the (fire-and-forget) deinit notification, and run the
    /// teardown callbacks.
    pub async fn deinit_stack(&self) -> Result<(), RpcError> {
        if !self.loaded() {
            return Err(RpcError::PeerNotReady);
        }

        if self.initialized() {
            for idx in 1..self.settings.max_services {
                let active = {
                    let slots = self.slots.lock().await;
                    matches!(&slots[idx], Some(slot) if slot.active)
                };
                if active {
                    if let Err(error) = self.deregister_with_peer(idx as service::Id).await {
                        warn!(id = idx, ?error, "deregistration during deinit failed");
                    }
                }
            }

            {
                let _rpc = self.rpc_lock.lock().await;
                self.send_frame(service::CONTROL, control::Kind::Deinit as u32, &[], &[])
                    .await?;
            }
            self.signal().await;

            self.initialized.store(false, Ordering::Release);
            info!("peer stack deinitialized");
        }

        // Services stay in the table (a later init re-registers them) but go
        // inactive, with their teardown run.
        for idx in 1..self.settings.max_services {
            let svc = {
                let mut slots = self.slots.lock().await;
                match slots[idx].as_mut() {
                    Some(slot) if slot.active => {
                        slot.active = false;
                        Some(slot.svc.clone())
                    }
                    _ => None,
                }
            };
            if let Some(svc) = svc {
                svc.teardown();
            }
        }

        Ok(())
    }

    /// The synchronous request/reply primitive.
    ///
    /// Builds and commits one message on `id`'s outbound ring, rings the
    /// doorbell, and suspends until the peer's reply completes the shared
    /// slot. Exactly one call is in flight at a time; concurrent callers
    /// queue on the RPC lock. There is no timeout: a wedged peer stalls the
    /// caller until the stack is torn down.
    #[tracing::instrument(
        name = "Registry::call",
        level = "debug",
        skip(self, params, payload),
        fields(id = id as usize, kind),
    )]
    pub async fn call(
        &self,
        id: service::Id,
        kind: u32,
        params: &[u8],
        payload: &[u8],
    ) -> Result<Reply, RpcError> {
        if !self.initialized() {
            return Err(RpcError::PeerNotReady);
        }
        let _rpc = self.rpc_lock.lock().await;
        self.transact(id, kind, params, payload).await
    }

    /// Fire-and-forget send on `id`'s outbound ring, with doorbell.
    pub async fn send(
        &self,
        id: service::Id,
        kind: u32,
        params: &[u8],
        payload: &[u8],
    ) -> Result<(), RpcError> {
        if !self.initialized() {
            return Err(RpcError::PeerNotReady);
        }
        self.send_frame(id, kind, params, payload).await?;
        self.signal().await;
        Ok(())
    }

    /// Ring the peer doorbell, if attached.
    ///
    /// Media paths call this after committing data frames to their rings.
    pub async fn signal(&self) {
        if let Some(doorbell) = self.doorbell.lock().await.as_ref() {
            doorbell.ring();
        }
    }

    /// Round-trip timing query. Returns the peer's timestamp; the attached
    /// statistics blob is retained and readable via
    /// [`Registry::timing_stats`].
    pub async fn timing(&self, options: u32) -> Result<u64, RpcError> {
        if !self.initialized() {
            return Err(RpcError::PeerNotReady);
        }

        let _rpc = self.rpc_lock.lock().await;
        let req = control::TimingRequest { options };
        let mut params = [0u8; control::TimingRequest::LEN];
        req.encode(&mut params).expect("sized for the layout");

        let reply = self
            .transact(
                service::CONTROL,
                control::Kind::RequestTiming as u32,
                &params,
                &[],
            )
            .await?;
        if reply.kind != control::Kind::ReplyTiming as u32 {
            return Err(RpcError::BadReply);
        }
        let rep = control::TimingReply::decode(&reply.params).map_err(|_| RpcError::BadReply)?;
        Ok(rep.timestamp)
    }

    /// The statistics blob delivered with the most recent timing reply.
    pub async fn timing_stats(&self) -> [u8; control::TIMING_STATS_LEN] {
        *self.state.timing.lock().await
    }

    /// Ask the peer to print its debug menu. Fire-and-forget.
    pub async fn menu(&self) -> Result<(), RpcError> {
        self.send(service::CONTROL, control::Kind::Menu as u32, &[], &[])
            .await
    }

    /// Answer a peer-initiated configuration write (see [`ConfigSink`]).
    pub async fn reply_configuration_write(
        &self,
        bytes_written: i32,
        result: i32,
    ) -> Result<(), RpcError> {
        if !self.initialized() {
            return Err(RpcError::PeerNotReady);
        }

        let _rpc = self.rpc_lock.lock().await;
        let rep = control::WriteConfigurationReply {
            bytes_written,
            result,
        };
        let mut params = [0u8; control::WriteConfigurationReply::LEN];
        rep.encode(&mut params).expect("sized for the layout");
        self.send_frame(
            service::CONTROL,
            control::Kind::ReplyWriteConfiguration as u32,
            &params,
            &[],
        )
        .await?;
        self.signal().await;
        Ok(())
    }

    /// One sweep over every active service with an inbound ring: drain it
    /// frame by frame in commit order, then run the service's `poll`.
    pub(crate) async fn drain_inbound(&self) {
        let mut slots = self.slots.lock().await;
        for (id, entry) in slots.iter_mut().enumerate() {
            let Some(slot) = entry.as_mut() else { continue };
            if !slot.active {
                continue;
            }
            let svc = slot.svc.clone();

            if let Some(rx) = slot.rx.as_mut() {
                loop {
                    match rx.read() {
                        Ok(Some(rgr)) => {
                            match Envelope::parse(&rgr) {
                                Ok(env) => {
                                    let kind = env.kind;
                                    if let Err(error) = svc.dispatch(env) {
                                        // Not retried: the peer does not
                                        // resend, so the frame is consumed
                                        // either way.
                                        warn!(id, kind, ?error, "dispatch failed");
                                    }
                                }
                                Err(error) => {
                                    warn!(id, ?error, "malformed inbound frame");
                                }
                            }
                            rgr.release();
                        }
                        Ok(None) => break,
                        Err(error) => {
                            warn!(id, ?error, "inbound ring unreadable");
                            break;
                        }
                    }
                }
            }

            svc.poll();
        }
    }

    async fn transact(
        &self,
        id: service::Id,
        kind: u32,
        params: &[u8],
        payload: &[u8],
    ) -> Result<Reply, RpcError> {
        // The slot must be armed before the doorbell rings; the reply can
        // arrive on the dispatcher before this task resumes.
        self.state.reply.arm().map_err(|_| RpcError::Cancelled)?;

        if let Err(e) = self.send_frame(id, kind, params, payload).await {
            self.state.reply.disarm();
            return Err(e);
        }
        self.signal().await;

        self.state
            .reply
            .receive()
            .await
            .map_err(|_| RpcError::Cancelled)
    }

    async fn send_frame(
        &self,
        id: service::Id,
        kind: u32,
        params: &[u8],
        payload: &[u8],
    ) -> Result<(), RpcError> {
        let mut slots = self.slots.lock().await;
        let slot = slots
            .get_mut(id as usize)
            .and_then(Option::as_mut)
            .ok_or(RpcError::NoSuchService)?;
        let tx = slot.tx.as_mut().ok_or(RpcError::NoSuchService)?;
        message::build(tx, kind, params, payload)?;
        trace!(id = id as usize, kind, "frame committed");
        Ok(())
    }

    async fn register_with_peer(&self, id: service::Id) -> Result<(), RegistrationError> {
        if !self.loaded() {
            return Err(RegistrationError::Rpc(RpcError::PeerNotReady));
        }

        let (tx_handle, rx_handle) = {
            let slots = self.slots.lock().await;
            let slot = slots[id as usize]
                .as_ref()
                .ok_or(RegistrationError::InvalidId)?;
            (slot.tx_handle, slot.rx_handle)
        };

        {
            let _rpc = self.rpc_lock.lock().await;
            let req = control::RegisterRequest {
                id: id as u32,
                tx: tx_handle,
                rx: rx_handle,
            };
            let mut params = [0u8; control::RegisterRequest::LEN];
            req.encode(&mut params).expect("sized for the layout");

            let reply = self
                .transact(
                    service::CONTROL,
                    control::Kind::RequestRegister as u32,
                    &params,
                    &[],
                )
                .await?;
            if reply.kind != control::Kind::ReplyRegister as u32 {
                return Err(RegistrationError::BadReply);
            }
            let rep = control::RegisterReply::decode(&reply.params)
                .map_err(|_| RegistrationError::BadReply)?;
            if rep.result != 0 {
                return Err(RegistrationError::PeerRefused(rep.result));
            }
        }

        let svc = {
            let mut slots = self.slots.lock().await;
            // The slot can vanish between the exchange and here if someone
            // deregisters concurrently; treat that as the deregistration
            // winning.
            let slot = slots[id as usize]
                .as_mut()
                .ok_or(RegistrationError::InvalidId)?;
            slot.active = true;
            slot.svc.clone()
        };

        if let Err(e) = svc.setup() {
            let mut slots = self.slots.lock().await;
            if let Some(slot) = slots[id as usize].as_mut() {
                slot.active = false;
            }
            return Err(RegistrationError::Setup(e));
        }

        info!(id = id as usize, "service registered with peer");
        Ok(())
    }

    async fn deregister_with_peer(&self, id: service::Id) -> Result<(), RegistrationError> {
        if !self.loaded() {
            return Err(RegistrationError::Rpc(RpcError::PeerNotReady));
        }

        let _rpc = self.rpc_lock.lock().await;
        let req = control::DeregisterRequest { id: id as u32 };
        let mut params = [0u8; control::DeregisterRequest::LEN];
        req.encode(&mut params).expect("sized for the layout");

        let reply = self
            .transact(
                service::CONTROL,
                control::Kind::RequestDeregister as u32,
                &params,
                &[],
            )
            .await?;
        if reply.kind != control::Kind::ReplyDeregister as u32 {
            return Err(RegistrationError::BadReply);
        }
        let rep = control::DeregisterReply::decode(&reply.params)
            .map_err(|_| RegistrationError::BadReply)?;
        if rep.result != 0 {
            return Err(RegistrationError::PeerRefused(rep.result));
        }
        Ok(())
    }
}

// === impl ControlService ===

/// The registry's own service on id 0.
struct ControlService {
    state: Arc<ControlState>,
    config: Arc<dyn ConfigSink>,
}

impl Service for ControlService {
    fn dispatch(&self, msg: Envelope<'_>) -> Result<(), DispatchError> {
        let kind = control::Kind::try_from(msg.kind)?;
        match kind {
            control::Kind::ReplyInit
            | control::Kind::ReplyRegister
            | control::Kind::ReplyDeregister => self.state.complete_reply(msg.kind, msg.params),

            control::Kind::ReplyTiming => {
                // The statistics blob rides in the payload; stash it before
                // waking the caller.
                if msg.payload.len() >= control::TIMING_STATS_LEN {
                    match self.state.timing.try_lock() {
                        Some(mut stats) => {
                            stats.copy_from_slice(&msg.payload[..control::TIMING_STATS_LEN]);
                        }
                        None => warn!("timing stats busy, dropping update"),
                    }
                } else {
                    warn!(len = msg.payload.len(), "short timing stats payload");
                }
                self.state.complete_reply(msg.kind, msg.params)
            }

            control::Kind::WriteConfiguration => {
                let wc = control::WriteConfiguration::decode(msg.params)?;
                self.config.write(wc.pos as usize, msg.payload);
                Ok(())
            }

            // Everything else flows host to peer only.
            _ => Err(DispatchError::UnknownKind(msg.kind)),
        }
    }
}
