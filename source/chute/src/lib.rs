//! Chute - a framed SPSC ring buffer
//!
//! A [`Chute`] stores variable-length frames in a fixed byte buffer. It is
//! safe for parallel access by not more than one producer and one consumer,
//! without any lock shared between the two sides: each side samples the other
//! side's index exactly once per operation and only ever publishes its own.
//!
//! The producer reserves space with [`Producer::request`], fills the frame in
//! place, and makes it visible with [`GrantW::commit`]. The consumer borrows
//! the next frame with [`Consumer::read`] and must acknowledge it with
//! [`GrantR::release`] before the slot may be overwritten. This means the
//! consumer can hold a frame across a fallible copy (e.g. to userspace) and
//! only give the slot back once the copy actually succeeded.
//!
//! A frame always occupies one consecutive memory region. When a frame does
//! not fit in the space remaining at the end of the buffer, a zero length
//! marker is written there instead and the frame starts over at offset zero.
//! Space for that marker is reserved on every request, so a frame record is
//! never split across the wrap point.

#![no_std]
#![allow(clippy::missing_safety_doc)]

use core::cell::UnsafeCell;
use core::marker::PhantomData;

use portable_atomic::{AtomicBool, AtomicUsize, Ordering};

/// Size of the per-frame length header, in bytes.
pub const HDR_LEN: usize = core::mem::size_of::<u32>();

/// Round `n` up to the next multiple of the header size.
///
/// All published indices are padded like this, so a length header never
/// straddles an alignment boundary.
pub const fn pad(n: usize) -> usize {
    (n + (HDR_LEN - 1)) & !(HDR_LEN - 1)
}

/// Backing storage for a [`Chute`].
///
/// # Safety
///
/// `buf()` must return the same pointer and length for every call, and the
/// region must stay valid (and un-aliased by safe code) for as long as the
/// `Chute` exists.
pub unsafe trait Storage {
    fn buf(&self) -> (*const UnsafeCell<u8>, usize);
}

/// Transport failures, see the taxonomy on each variant.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum Error {
    /// Not enough free space for the requested frame. This is ordinary
    /// backpressure, not a fault; the caller decides whether to retry or
    /// drop.
    NoSpace,
    /// The previously returned frame has not been released yet. The consumer
    /// must acknowledge one frame before borrowing the next.
    NotProcessed,
    /// An index or length invariant does not hold. Only reported when
    /// consistency checks are enabled; the chute contents are undefined
    /// afterwards.
    Broken,
}

/// A framed SPSC ring buffer over caller-provided [`Storage`].
pub struct Chute<STO: Storage> {
    storage: STO,
    /// Usable capacity, rounded down to header alignment.
    size: usize,
    /// Write index, published by the producer on commit.
    in_: AtomicUsize,
    /// Read index, published by the consumer on release.
    out: AtomicUsize,
    /// Start of the most recently requested frame; producer side only.
    lastin: AtomicUsize,
    /// Read index to publish on release; consumer side only.
    lastout: AtomicUsize,
    /// True iff the last frame handed to the consumer was released.
    processed: AtomicBool,
    /// Runtime consistency checking.
    checks: bool,
    prod_taken: AtomicBool,
    cons_taken: AtomicBool,
}

unsafe impl<STO: Storage> Sync for Chute<STO> {}

impl<STO: Storage> Chute<STO> {
    /// Create a chute over `storage` with consistency checks disabled.
    pub fn new(storage: STO) -> Self {
        Self::with_checks(storage, false)
    }

    /// Create a chute over `storage`.
    ///
    /// When `checks` is true, every operation validates the index and length
    /// invariants and reports [`Error::Broken`] on violation. Intended for
    /// tests and bring-up; the checks cost a few loads per operation.
    pub fn with_checks(storage: STO, checks: bool) -> Self {
        let (_, len) = storage.buf();
        let this = Self {
            storage,
            size: len & !(HDR_LEN - 1),
            in_: AtomicUsize::new(0),
            out: AtomicUsize::new(0),
            lastin: AtomicUsize::new(0),
            lastout: AtomicUsize::new(0),
            processed: AtomicBool::new(true),
            checks,
            prod_taken: AtomicBool::new(false),
            cons_taken: AtomicBool::new(false),
        };
        this.reset();
        this
    }

    /// Take the producer handle. Returns `None` if it was already taken.
    pub fn take_producer(&self) -> Option<Producer<'_, STO>> {
        if self.prod_taken.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(Producer {
            chute: self,
            _not_sync: PhantomData,
        })
    }

    /// Take the consumer handle. Returns `None` if it was already taken.
    pub fn take_consumer(&self) -> Option<Consumer<'_, STO>> {
        if self.cons_taken.swap(true, Ordering::AcqRel) {
            return None;
        }
        Some(Consumer {
            chute: self,
            _not_sync: PhantomData,
        })
    }

    /// Take the producer for a chute behind a stable address.
    ///
    /// # Safety
    ///
    /// `this` must point to a chute that outlives the returned handle, e.g.
    /// one held in a reference-counted or leaked allocation.
    pub unsafe fn take_producer_unchecked(this: *const Self) -> Option<Producer<'static, STO>>
    where
        STO: 'static,
    {
        let this: &'static Self = &*this;
        this.take_producer()
    }

    /// Take the consumer for a chute behind a stable address.
    ///
    /// # Safety
    ///
    /// Same contract as [`Chute::take_producer_unchecked`].
    pub unsafe fn take_consumer_unchecked(this: *const Self) -> Option<Consumer<'static, STO>>
    where
        STO: 'static,
    {
        let this: &'static Self = &*this;
        this.take_consumer()
    }

    /// Usable capacity in bytes, including per-frame headers and padding.
    pub fn capacity(&self) -> usize {
        self.size
    }

    /// `true` iff no committed frame is waiting to be read.
    pub fn is_empty(&self) -> bool {
        self.in_.load(Ordering::Acquire) == self.out.load(Ordering::Acquire)
    }

    /// The base address and length of the backing buffer.
    ///
    /// This pair is what gets exchanged with the peer domain so it can attach
    /// to the same memory.
    pub fn region(&self) -> (*const u8, usize) {
        let (ptr, _) = self.storage.buf();
        (ptr as *const u8, self.size)
    }

    /// Discard all contents: zero the buffer and both indices.
    ///
    /// Must only be called while neither side has an operation in flight.
    pub fn reset(&self) {
        self.in_.store(0, Ordering::Relaxed);
        self.out.store(0, Ordering::Relaxed);
        self.lastin.store(0, Ordering::Relaxed);
        self.lastout.store(0, Ordering::Relaxed);
        self.processed.store(true, Ordering::Relaxed);
        unsafe {
            core::ptr::write_bytes(self.base(), 0, self.size);
        }
    }

    /// Release the frame most recently returned by [`Consumer::read`].
    ///
    /// Publishes the pending read index; repeated calls are no-ops.
    pub fn mark_processed(&self) {
        if self.processed.load(Ordering::Acquire) {
            return;
        }
        self.out
            .store(self.lastout.load(Ordering::Relaxed), Ordering::Release);
        self.processed.store(true, Ordering::Release);
    }

    fn base(&self) -> *mut u8 {
        let (ptr, _) = self.storage.buf();
        ptr as *mut UnsafeCell<u8> as *mut u8
    }

    unsafe fn read_hdr(&self, at: usize) -> u32 {
        let mut raw = [0u8; HDR_LEN];
        core::ptr::copy_nonoverlapping(self.base().add(at), raw.as_mut_ptr(), HDR_LEN);
        u32::from_le_bytes(raw)
    }

    unsafe fn write_hdr(&self, at: usize, val: u32) {
        let raw = val.to_le_bytes();
        core::ptr::copy_nonoverlapping(raw.as_ptr(), self.base().add(at), HDR_LEN);
    }

    fn request(&self, len: usize) -> Result<(usize, usize), Error> {
        debug_assert!(len > 0, "a zero length frame is the wraparound marker");

        // Padding distinguishes empty from full and reserves room for the
        // wraparound marker at the end of the buffer.
        let off = len + 2 * HDR_LEN;

        // The consumer's index is sampled exactly once.
        let out = self.out.load(Ordering::Acquire);
        let in_ = self.in_.load(Ordering::Relaxed);

        let start = if (in_ >= out && off <= self.size - in_) || (in_ < out && off <= out - in_) {
            // Free space behind the write index, either up to the end of the
            // buffer (keeping the marker reserve) or up to the read index.
            in_
        } else if in_ >= out && off <= out {
            // Free space only at the beginning: leave a zero length marker at
            // the old write index so the consumer knows to start over.
            unsafe {
                self.write_hdr(in_, 0);
            }
            0
        } else {
            return Err(Error::NoSpace);
        };

        if self.checks && (start >= self.size - HDR_LEN || start + len >= self.size) {
            return Err(Error::Broken);
        }

        self.lastin.store(start, Ordering::Relaxed);
        Ok((start, len))
    }

    fn commit(&self, start: usize, used: usize) -> Result<usize, Error> {
        let mut lastin = start;

        if self.checks && lastin >= self.size - HDR_LEN {
            return Err(Error::Broken);
        }

        // The length header goes first, then the frame body (already written
        // through the grant), then the padded write index is published. That
        // final store is the single point where the frame becomes visible.
        unsafe {
            self.write_hdr(lastin, used as u32);
        }
        lastin += HDR_LEN;

        if self.checks && (lastin >= self.size || lastin + used >= self.size) {
            return Err(Error::Broken);
        }

        lastin += used;
        self.lastin.store(lastin, Ordering::Relaxed);
        self.in_.store(pad(lastin), Ordering::Release);

        Ok(used)
    }

    fn read(&self) -> Result<Option<(usize, usize)>, Error> {
        // The producer's index is sampled exactly once.
        let in_ = self.in_.load(Ordering::Acquire);
        let mut out = self.out.load(Ordering::Relaxed);

        if in_ == out {
            return Ok(None);
        }

        if !self.processed.load(Ordering::Acquire) {
            return Err(Error::NotProcessed);
        }

        if self.checks && self.size - out < HDR_LEN {
            // Cannot happen with padded indices.
            return Err(Error::Broken);
        }

        let mut len = unsafe { self.read_hdr(out) } as usize;

        // A zero length header is the wraparound marker: the next frame
        // really starts at the beginning of the buffer.
        if len == 0 {
            if self.checks && (out == 0 || in_ == 0) {
                return Err(Error::Broken);
            }

            out = 0;
            len = unsafe { self.read_hdr(out) } as usize;

            if self.checks && (len == 0 || len > self.size - HDR_LEN) {
                return Err(Error::Broken);
            }
        }

        out += HDR_LEN;

        if self.checks && in_.wrapping_sub(out) < len {
            return Err(Error::Broken);
        }

        let at = out;
        out += len;

        // Compute the new read index but do not publish it yet; that happens
        // on release.
        self.lastout.store(pad(out), Ordering::Relaxed);
        self.processed.store(false, Ordering::Release);

        Ok(Some((at, len)))
    }

    unsafe fn slice(&self, at: usize, len: usize) -> &[u8] {
        core::slice::from_raw_parts(self.base().add(at), len)
    }

    #[allow(clippy::mut_from_ref)]
    unsafe fn slice_mut(&self, at: usize, len: usize) -> &mut [u8] {
        core::slice::from_raw_parts_mut(self.base().add(at), len)
    }
}

/// The writing side of a [`Chute`]. At most one exists per chute.
pub struct Producer<'chute, STO: Storage> {
    chute: &'chute Chute<STO>,
    _not_sync: PhantomData<*const ()>,
}

unsafe impl<STO: Storage> Send for Producer<'_, STO> {}

/// The reading side of a [`Chute`]. At most one exists per chute.
pub struct Consumer<'chute, STO: Storage> {
    chute: &'chute Chute<STO>,
    _not_sync: PhantomData<*const ()>,
}

unsafe impl<STO: Storage> Send for Consumer<'_, STO> {}

impl<'chute, STO: Storage> Producer<'chute, STO> {
    /// Reserve space for a frame of up to `len` bytes.
    ///
    /// The returned grant is a writable view of the frame body. Nothing is
    /// visible to the consumer until [`GrantW::commit`] is called; dropping
    /// the grant abandons the reservation.
    ///
    /// Returns [`Error::NoSpace`] when the frame does not fit. That is the
    /// normal backpressure signal, not a fault.
    pub fn request(&mut self, len: usize) -> Result<GrantW<'_, 'chute, STO>, Error> {
        let (start, cap) = self.chute.request(len)?;
        Ok(GrantW {
            prod: self,
            start,
            cap,
        })
    }
}

impl<'chute, STO: Storage> Consumer<'chute, STO> {
    /// Borrow the next committed frame, if any.
    ///
    /// Returns `Ok(None)` when the chute is empty and
    /// [`Error::NotProcessed`] when the previous frame has not been released
    /// yet.
    pub fn read(&mut self) -> Result<Option<GrantR<'_, 'chute, STO>>, Error> {
        match self.chute.read()? {
            Some((at, len)) => Ok(Some(GrantR {
                cons: self,
                at,
                len,
            })),
            None => Ok(None),
        }
    }

    /// Release the most recently read frame without holding a grant.
    ///
    /// Idempotent; equivalent to dropping and releasing a [`GrantR`].
    pub fn mark_processed(&mut self) {
        self.chute.mark_processed();
    }

    /// `true` iff no committed frame is waiting.
    pub fn is_empty(&self) -> bool {
        self.chute.is_empty()
    }
}

/// A reserved, writable frame body. Commit to publish.
pub struct GrantW<'prod, 'chute, STO: Storage> {
    prod: &'prod mut Producer<'chute, STO>,
    start: usize,
    cap: usize,
}

impl<STO: Storage> core::ops::Deref for GrantW<'_, '_, STO> {
    type Target = [u8];

    #[inline(always)]
    fn deref(&self) -> &[u8] {
        unsafe { self.prod.chute.slice(self.start + HDR_LEN, self.cap) }
    }
}

impl<STO: Storage> core::ops::DerefMut for GrantW<'_, '_, STO> {
    #[inline(always)]
    fn deref_mut(&mut self) -> &mut [u8] {
        unsafe { self.prod.chute.slice_mut(self.start + HDR_LEN, self.cap) }
    }
}

impl<STO: Storage> GrantW<'_, '_, STO> {
    /// Publish the first `used` bytes of the reservation as one frame.
    ///
    /// `used` may be less than the reserved length. Returns the committed
    /// length, or [`Error::Broken`] when consistency checks are enabled and
    /// the producer side bookkeeping is inconsistent.
    pub fn commit(self, used: usize) -> Result<usize, Error> {
        assert!(used <= self.cap, "commit of more bytes than were reserved");
        self.prod.chute.commit(self.start, used)
    }
}

/// A borrowed committed frame. Release to free the slot.
pub struct GrantR<'cons, 'chute, STO: Storage> {
    cons: &'cons mut Consumer<'chute, STO>,
    at: usize,
    len: usize,
}

impl<STO: Storage> core::fmt::Debug for GrantR<'_, '_, STO> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GrantR")
            .field("at", &self.at)
            .field("len", &self.len)
            .finish()
    }
}

impl<STO: Storage> core::ops::Deref for GrantR<'_, '_, STO> {
    type Target = [u8];

    #[inline(always)]
    fn deref(&self) -> &[u8] {
        unsafe { self.cons.chute.slice(self.at, self.len) }
    }
}

impl<STO: Storage> GrantR<'_, '_, STO> {
    /// Frame length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Acknowledge the frame, allowing the producer to reuse its space.
    pub fn release(self) {
        self.cons.chute.mark_processed();
    }
}

#[cfg(test)]
mod tests {
    extern crate std;

    use super::*;
    use std::boxed::Box;
    use std::vec::Vec;

    struct HeapStorage {
        buf: Box<[UnsafeCell<u8>]>,
    }

    unsafe impl Storage for HeapStorage {
        fn buf(&self) -> (*const UnsafeCell<u8>, usize) {
            (self.buf.as_ptr(), self.buf.len())
        }
    }

    fn chute(capacity: usize, checks: bool) -> Chute<HeapStorage> {
        let buf = (0..capacity)
            .map(|_| UnsafeCell::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Chute::with_checks(HeapStorage { buf }, checks)
    }

    fn send(prod: &mut Producer<'_, HeapStorage>, data: &[u8]) -> Result<usize, Error> {
        let mut wgr = prod.request(data.len())?;
        wgr[..data.len()].copy_from_slice(data);
        wgr.commit(data.len())
    }

    fn recv(cons: &mut Consumer<'_, HeapStorage>) -> Option<Vec<u8>> {
        let rgr = cons.read().unwrap()?;
        let data = rgr.to_vec();
        rgr.release();
        Some(data)
    }

    #[test]
    fn request_commit_read_release() {
        let c = chute(64, true);
        let (mut prod, mut cons) = (c.take_producer().unwrap(), c.take_consumer().unwrap());

        let payload: Vec<u8> = (0..10).collect();
        assert_eq!(send(&mut prod, &payload), Ok(10));

        // One header plus ten payload bytes, padded to header alignment.
        assert_eq!(c.in_.load(Ordering::Relaxed), 16);

        let rgr = cons.read().unwrap().unwrap();
        assert_eq!(rgr.len(), 10);
        assert_eq!(&rgr[..], &payload[..]);
        rgr.release();

        assert!(c.is_empty());
    }

    #[test]
    fn handles_taken_once() {
        let c = chute(64, false);
        assert!(c.take_producer().is_some());
        assert!(c.take_producer().is_none());
        assert!(c.take_consumer().is_some());
        assert!(c.take_consumer().is_none());
    }

    #[test]
    fn fifo_order() {
        let c = chute(256, true);
        let (mut prod, mut cons) = (c.take_producer().unwrap(), c.take_consumer().unwrap());

        let frames: Vec<Vec<u8>> = (1..=5u8)
            .map(|n| (0..n * 3).map(|b| b.wrapping_mul(n)).collect())
            .collect();
        for f in &frames {
            assert_eq!(send(&mut prod, f), Ok(f.len()));
        }
        for f in &frames {
            assert_eq!(recv(&mut cons).unwrap(), *f);
        }
        assert_eq!(recv(&mut cons), None);
    }

    #[test]
    fn no_space_is_backpressure() {
        let c = chute(64, true);
        let (mut prod, mut cons) = (c.take_producer().unwrap(), c.take_consumer().unwrap());

        let mut committed = Vec::new();
        let frame = [0xAB; 10];
        loop {
            match send(&mut prod, &frame) {
                Ok(n) => committed.push(n),
                Err(Error::NoSpace) => break,
                Err(e) => panic!("unexpected error: {e:?}"),
            }
        }
        assert!(!committed.is_empty());

        // The rejected request must not have damaged the committed frames.
        for _ in &committed {
            assert_eq!(recv(&mut cons).unwrap(), &frame[..]);
        }
        assert_eq!(recv(&mut cons), None);
    }

    #[test]
    fn one_unreleased_frame_at_a_time() {
        let c = chute(128, true);
        let (mut prod, mut cons) = (c.take_producer().unwrap(), c.take_consumer().unwrap());

        send(&mut prod, b"first").unwrap();
        send(&mut prod, b"second").unwrap();

        let rgr = cons.read().unwrap().unwrap();
        assert_eq!(&rgr[..], b"first");
        // Dropping the grant without releasing leaves the frame pending.
        drop(rgr);

        assert_eq!(cons.read().unwrap_err(), Error::NotProcessed);
        assert_eq!(cons.read().unwrap_err(), Error::NotProcessed);

        cons.mark_processed();
        // Releasing twice is a no-op.
        cons.mark_processed();

        assert_eq!(recv(&mut cons).unwrap(), b"second");
    }

    #[test]
    fn wraparound_marker() {
        let c = chute(64, true);
        let (mut prod, mut cons) = (c.take_producer().unwrap(), c.take_consumer().unwrap());

        // Walk the write index close to the end of the buffer, draining as we
        // go so there is always room at the front.
        let frame = [0x5A; 12];
        for _ in 0..3 {
            send(&mut prod, &frame).unwrap();
            assert_eq!(recv(&mut cons).unwrap(), &frame[..]);
        }
        // in == out == 48; 12 + 2 headers does not fit in the 16 bytes left,
        // so this frame must go through the wraparound marker path.
        assert_eq!(c.in_.load(Ordering::Relaxed), 48);

        send(&mut prod, &frame).unwrap();
        assert_eq!(c.in_.load(Ordering::Relaxed), pad(HDR_LEN + frame.len()));

        assert_eq!(recv(&mut cons).unwrap(), &frame[..]);
        assert!(c.is_empty());
    }

    #[test]
    fn sustained_traffic_through_many_wraps() {
        let c = chute(96, true);
        let (mut prod, mut cons) = (c.take_producer().unwrap(), c.take_consumer().unwrap());

        let mut sent = 0u32;
        let mut rcvd = 0u32;
        while rcvd < 100 {
            let frame = sent.to_le_bytes();
            match send(&mut prod, &frame) {
                Ok(_) => sent += 1,
                Err(Error::NoSpace) => {
                    let got = recv(&mut cons).expect("full chute must be readable");
                    assert_eq!(got, rcvd.to_le_bytes());
                    rcvd += 1;
                }
                Err(e) => panic!("unexpected error: {e:?}"),
            }
        }
    }

    #[test]
    fn reset_discards_contents() {
        let c = chute(64, true);
        let (mut prod, mut cons) = (c.take_producer().unwrap(), c.take_consumer().unwrap());

        send(&mut prod, b"stale").unwrap();
        c.reset();

        assert!(c.is_empty());
        assert!(cons.read().unwrap().is_none());
        assert_eq!(send(&mut prod, b"fresh"), Ok(5));
        assert_eq!(recv(&mut cons).unwrap(), b"fresh");
    }

    #[test]
    fn corrupted_header_reported_broken() {
        let c = chute(64, true);
        let (mut prod, mut cons) = (c.take_producer().unwrap(), c.take_consumer().unwrap());

        send(&mut prod, &[1, 2, 3, 4]).unwrap();

        // Smash the length header to something far beyond the buffer.
        unsafe {
            c.write_hdr(0, 0xFFFF);
        }
        assert_eq!(cons.read().unwrap_err(), Error::Broken);
    }

    #[test]
    fn capacity_is_padded_down() {
        let c = chute(30, false);
        assert_eq!(c.capacity(), 28);
        let c = chute(64, false);
        assert_eq!(c.capacity(), 64);
    }

    #[test]
    fn commit_less_than_requested() {
        let c = chute(64, true);
        let (mut prod, mut cons) = (c.take_producer().unwrap(), c.take_consumer().unwrap());

        let mut wgr = prod.request(16).unwrap();
        wgr[..3].copy_from_slice(b"abc");
        assert_eq!(wgr.commit(3), Ok(3));

        let rgr = cons.read().unwrap().unwrap();
        assert_eq!(&rgr[..], b"abc");
        rgr.release();
    }

    #[test]
    fn region_matches_storage() {
        let c = chute(64, false);
        let (ptr, len) = c.region();
        assert!(!ptr.is_null());
        assert_eq!(len, 64);
    }
}
