//! User-space threading library: mutexes, condition variables, semaphores,
//! reader/writer locks, and thread lifecycle management, built entirely on
//! top of eight raw kernel primitives (thread spawn with an explicit stack
//! pointer, directed sleep/wake, cooperative yield, current-tid, single-
//! thread terminate, page allocation, and software exception-handler
//! installation).
//!
//! The hard part is the synchronization layer: every blocking primitive in
//! this crate is ultimately built from one [`mutex::RawMutex`] and the
//! kernel's deschedule/make_runnable pair, which exposes a well-known
//! lost-wakeup hazard that [`cond::CondVar`] is specifically designed to
//! close (see that module's docs).
//!
//! Enable the `std-test-kernel` feature to run this crate's own test suite
//! on a host, against a `std`-backed emulation of the eight kernel
//! primitives instead of a real target kernel.

#![cfg_attr(not(feature = "std-test-kernel"), no_std)]

extern crate alloc;

pub mod alloc_shim;
pub mod autostack;
pub mod cond;
pub mod diagnostics;
pub mod error;
pub mod list;
pub mod mutex;
pub mod panic;
pub mod rwlock;
pub mod sem;
pub mod sys;
pub mod thread;

pub use error::{ErrorKind, Result, ThreadLibError};
pub use thread::{spawn, thr_create, thr_exit, thr_getid, thr_init, thr_join, thr_yield, JoinHandle};

/// Supply the backing memory region for the library's global allocator.
///
/// Must be called once, by the program's entry wrapper, before
/// [`install_autostack`] and before [`thr_init`] — both allocate. See
/// [`alloc_shim::init`] for the full contract.
///
/// # Safety
/// `[addr, addr + size)` must be valid, unused, and not otherwise accessed
/// for as long as the program runs.
pub unsafe fn init_heap(addr: *mut u8, size: usize) {
    // SAFETY: forwarded from the caller's contract.
    unsafe { alloc_shim::init(addr, size) };
}

/// Install the auto-growing stack handler. Must be called once, by the
/// program's entry wrapper, after [`init_heap`] and before `thr_init`.
pub fn install_autostack(stack_high: *mut u8, stack_low: *mut u8) {
    autostack::install_autostack(stack_high, stack_low);
}
