//! Heap-backed frame rings
//!
//! A thin ownership layer over [`chute`]: allocates the backing buffer,
//! keeps it alive behind an [`Arc`] shared by both handles, and knows how to
//! describe itself as a [`FifoHandle`] for the registration wire messages.
//!
//! The two handles of one ring usually end up in different places: for a
//! host-to-peer ring the producer goes into the service table and the
//! consumer side belongs to the peer domain (it attaches to the same memory
//! through the descriptor and the host handle is simply dropped); vice versa
//! for peer-to-host rings.

use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::cell::UnsafeCell;

use chute::{Chute, Consumer, Error, GrantR, GrantW, Producer, Storage};
use tandem_proto::FifoHandle;
use tracing::info;

use crate::fmt;

/// Ring storage allocated from the heap.
pub struct HeapStorage {
    buf: Box<[UnsafeCell<u8>]>,
}

unsafe impl Storage for HeapStorage {
    fn buf(&self) -> (*const UnsafeCell<u8>, usize) {
        (self.buf.as_ptr(), self.buf.len())
    }
}

pub(crate) struct Ring {
    chute: Chute<HeapStorage>,
}

unsafe impl Send for Ring {}
unsafe impl Sync for Ring {}

impl Ring {
    pub(crate) fn is_empty(&self) -> bool {
        self.chute.is_empty()
    }

    pub(crate) fn handle(&self) -> FifoHandle {
        let (addr, len) = self.chute.region();
        FifoHandle {
            addr: addr as usize as u64,
            len: len as u32,
        }
    }
}

/// A write grant on a frame ring.
pub type FrameGrantW<'a> = GrantW<'a, 'static, HeapStorage>;

/// A read grant on a frame ring.
pub type FrameGrantR<'a> = GrantR<'a, 'static, HeapStorage>;

/// The writing half of a frame ring.
pub struct FifoProducer {
    ring: Arc<Ring>,
    producer: Producer<'static, HeapStorage>,
}

/// The reading half of a frame ring.
pub struct FifoConsumer {
    ring: Arc<Ring>,
    consumer: Consumer<'static, HeapStorage>,
}

/// Allocate a new frame ring of `capacity` bytes.
///
/// Returns both halves; the caller decides which one stays on the host and
/// which one is notionally the peer's. `checks` enables the transport's
/// runtime consistency checking, see [`chute::Chute::with_checks`].
pub fn fifo(capacity: usize, checks: bool) -> (FifoProducer, FifoConsumer) {
    let buf = (0..capacity)
        .map(|_| UnsafeCell::new(0))
        .collect::<Vec<_>>()
        .into_boxed_slice();
    let ring = Arc::new(Ring {
        chute: Chute::with_checks(HeapStorage { buf }, checks),
    });

    // The chute sits behind the Arc held by both handles, so its address is
    // stable for as long as either handle is alive.
    let chute: *const Chute<HeapStorage> = &ring.chute;
    let (producer, consumer) = unsafe {
        (
            Chute::take_producer_unchecked(chute).expect("fresh ring has no producer"),
            Chute::take_consumer_unchecked(chute).expect("fresh ring has no consumer"),
        )
    };

    info!(capacity, ring = ?fmt::ptr(ring.as_ref()), "created frame ring");

    (
        FifoProducer {
            ring: ring.clone(),
            producer,
        },
        FifoConsumer { ring, consumer },
    )
}

impl FifoProducer {
    /// Reserve space for one frame, see [`chute::Producer::request`].
    #[tracing::instrument(
        name = "FifoProducer::request",
        level = "trace",
        skip(self),
        fields(ring = ?fmt::ptr(self.ring.as_ref())),
    )]
    pub fn request(&mut self, len: usize) -> Result<FrameGrantW<'_>, Error> {
        self.producer.request(len)
    }

    /// The shared-memory descriptor of this ring.
    pub fn handle(&self) -> FifoHandle {
        self.ring.handle()
    }

    /// Discard all ring contents.
    ///
    /// Only valid while the consumer side is known to be quiescent, e.g.
    /// before the ring has been announced to the peer.
    pub fn reset(&mut self) {
        self.ring.chute.reset();
    }
}

impl FifoConsumer {
    /// Borrow the next committed frame, see [`chute::Consumer::read`].
    pub fn read(&mut self) -> Result<Option<FrameGrantR<'_>>, Error> {
        self.consumer.read()
    }

    /// Release the most recently read frame. Idempotent.
    pub fn mark_processed(&mut self) {
        self.consumer.mark_processed();
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    /// The shared-memory descriptor of this ring.
    pub fn handle(&self) -> FifoHandle {
        self.ring.handle()
    }

    pub(crate) fn ring(&self) -> &Arc<Ring> {
        &self.ring
    }
}
