//! Reusable One-Shot Completion
//!
//! The synchronous request/reply path wants exactly one in-flight exchange
//! at a time: a caller arms the slot, sends its request, and waits; whoever
//! decodes the matching reply completes the slot with the result. A `Rosc`
//! is that single-value channel, reusable across many exchanges over its
//! lifetime.
//!
//! Unlike a channel that hands out a sender object, completion happens
//! through a shared reference - the completer is the dispatch path, which
//! holds the slot for its whole life and cannot thread a per-call sender
//! through the peer domain.

use core::{
    cell::UnsafeCell,
    mem::MaybeUninit,
    sync::atomic::{AtomicU8, Ordering},
};

use maitake_sync::WaitCell;

/// Not armed; completions are rejected.
const ROSC_IDLE: u8 = 0;
/// A caller armed the slot and may be waiting.
const ROSC_ARMED: u8 = 1;
/// A completion is writing the value.
const ROSC_WRITING: u8 = 2;
/// A value is ready for the receiver.
const ROSC_READY: u8 = 3;
/// The receiver is taking the value out.
const ROSC_READING: u8 = 4;

/// A reusable one-shot completion slot.
pub struct Rosc<T> {
    state: AtomicU8,
    cell: UnsafeCell<MaybeUninit<T>>,
    wait: WaitCell,
}

#[derive(Debug, Eq, PartialEq)]
pub enum RoscError {
    /// `arm` while a previous exchange is still pending.
    AlreadyArmed,
    /// `complete` or `receive` without a prior `arm`.
    NotArmed,
}

unsafe impl<T: Send> Send for Rosc<T> {}
unsafe impl<T: Send> Sync for Rosc<T> {}

impl<T> Rosc<T> {
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(ROSC_IDLE),
            cell: UnsafeCell::new(MaybeUninit::uninit()),
            wait: WaitCell::new(),
        }
    }

    /// Claim the slot for one exchange. Fails if an exchange is already
    /// pending.
    pub fn arm(&self) -> Result<(), RoscError> {
        self.state
            .compare_exchange(ROSC_IDLE, ROSC_ARMED, Ordering::AcqRel, Ordering::Relaxed)
            .map(drop)
            .map_err(|_| RoscError::AlreadyArmed)
    }

    /// Give up an armed exchange without receiving, e.g. because the request
    /// was never sent. Any reply that raced in is dropped.
    pub fn disarm(&self) {
        loop {
            let swap = self.state.compare_exchange(
                ROSC_ARMED,
                ROSC_IDLE,
                Ordering::AcqRel,
                Ordering::Relaxed,
            );
            match swap {
                Ok(_) => return,
                Err(ROSC_READY) => {
                    // A completion slipped in; drain it.
                    if self
                        .state
                        .compare_exchange(
                            ROSC_READY,
                            ROSC_READING,
                            Ordering::AcqRel,
                            Ordering::Relaxed,
                        )
                        .is_ok()
                    {
                        unsafe {
                            core::ptr::drop_in_place((*self.cell.get()).as_mut_ptr());
                        }
                        self.state.store(ROSC_IDLE, Ordering::Release);
                        return;
                    }
                }
                Err(_) => return,
            }
        }
    }

    /// Complete the pending exchange with `item`.
    ///
    /// Fails with [`RoscError::NotArmed`] when nobody is waiting, which on
    /// the dispatch path means an unsolicited reply.
    pub fn complete(&self, item: T) -> Result<(), RoscError> {
        self.state
            .compare_exchange(
                ROSC_ARMED,
                ROSC_WRITING,
                Ordering::AcqRel,
                Ordering::Relaxed,
            )
            .map_err(|_| RoscError::NotArmed)?;

        unsafe {
            self.cell.get().write(MaybeUninit::new(item));
        }
        self.state.store(ROSC_READY, Ordering::Release);
        self.wait.wake();
        Ok(())
    }

    /// Wait for the completion of the exchange armed by this caller.
    pub async fn receive(&self) -> Result<T, RoscError> {
        loop {
            let swap = self.state.compare_exchange(
                ROSC_READY,
                ROSC_READING,
                Ordering::AcqRel,
                Ordering::Relaxed,
            );

            match swap {
                Ok(_) => unsafe {
                    let mut ret = MaybeUninit::<T>::uninit();
                    core::ptr::copy_nonoverlapping(
                        self.cell.get().cast::<T>(),
                        ret.as_mut_ptr(),
                        1,
                    );
                    self.state.store(ROSC_IDLE, Ordering::Release);
                    return Ok(ret.assume_init());
                },
                Err(ROSC_ARMED) | Err(ROSC_WRITING) => {
                    // Completion has not landed yet.
                    if self.wait.wait().await.is_err() {
                        return Err(RoscError::NotArmed);
                    }
                }
                Err(_) => return Err(RoscError::NotArmed),
            }
        }
    }
}

impl<T> Default for Rosc<T> {
    fn default() -> Self {
        Self::new()
    }
}
