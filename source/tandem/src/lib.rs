//! # The tandem messaging core
//!
//! Tandem is the host side of a dual-domain messaging stack: a
//! general-purpose kernel and a cooperating real-time firmware image share
//! the same physical memory and talk through single-producer single-consumer
//! frame rings ([`chute`]), with a service registry and a synchronous
//! request/reply protocol layered on top.
//!
//! The crate is a `no_std` + `alloc` library. Platform code owns everything
//! hardware-shaped: mapping the shared memory region, delivering the
//! doorbell interrupt in both directions, and running async tasks. The core
//! only asks for three things:
//!
//! * a [`Doorbell`] implementation ("poke the peer"),
//! * the inbound converse: calling [`Notify::notify`] whenever the peer
//!   pokes us (safe from interrupt context - it only wakes a queue), and
//! * something that polls the [`Dispatcher::run`] future.
//!
//! ## Bring-up
//!
//! A deployment builds one [`Registry`], one [`Dispatcher`], and wires them
//! up in three phases:
//!
//! 1. **Attach** ([`Registry::attach`]): the notification path and the
//!    control-plane rings exist; the stack is *loaded*.
//! 2. **Init** ([`Registry::init_stack`]): the peer has answered the init
//!    handshake; the stack is *initialized* and every service registered
//!    while the peer was still booting is now registered with it, in
//!    ascending id order.
//! 3. **Run**: services exchange messages; synchronous calls go through
//!    [`Registry::call`], inbound frames are drained by the dispatcher task
//!    and handed to each service's [`Service::dispatch`].
//!
//! Teardown mirrors it: [`Registry::deinit_stack`] drops back to *loaded*,
//! [`Registry::detach`] to square one.
//!
//! ## Services
//!
//! A service is a small integer id, up to two rings (one per direction), and
//! a [`Service`] implementation. The bundled services live in [`services`]:
//! debug log forwarding, voice call channels, PCM audio, and a generic
//! socket bridge. Service id 0 is reserved for the control plane, which the
//! registry itself owns.

#![no_std]
#![allow(clippy::missing_safety_doc)]

extern crate alloc;

pub mod comms;
pub mod dispatch;
pub(crate) mod fmt;
pub mod message;
pub mod registry;
pub mod services;

#[cfg(test)]
pub(crate) mod test_util;

pub use dispatch::{Dispatcher, Notify};
pub use registry::{ConfigSink, Doorbell, Registry, Service};
pub use tandem_proto as proto;

/// Deployment-wide tunables, handed to [`Registry::new`].
///
/// Ring-level knobs (capacity, consistency checking) are chosen per ring at
/// [`comms::fifo::fifo`] creation instead.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    /// Number of slots in the service table. Ids are `0..max_services`.
    pub max_services: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_services: tandem_proto::service::MAX_SERVICES,
        }
    }
}
