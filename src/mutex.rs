//! Binary mutex built on a single atomic test-and-set word.
//!
//! No kernel deschedule is involved here: every higher construct,
//! including [`crate::cond::CondVar`], is built on top of this mutex, so
//! blocking inside it would recurse. Fairness is left to the scheduler —
//! critical sections in this crate are all short, so unbounded spinning is
//! acceptable in practice.

use core::cell::UnsafeCell;
use core::sync::atomic::{AtomicI32, Ordering};

const FREE: i32 = 1;
const HELD: i32 = 0;
const DESTROYED: i32 = -1;

/// The bare lock/unlock primitive, with no data attached. Mirrors `mutex_t`.
pub struct RawMutex {
    state: AtomicI32,
}

impl RawMutex {
    pub const fn new() -> Self {
        Self {
            state: AtomicI32::new(FREE),
        }
    }

    /// Spin until the lock is acquired.
    pub fn lock(&self) {
        while self.state.swap(HELD, Ordering::Acquire) == HELD {
            core::hint::spin_loop();
        }
    }

    pub fn unlock(&self) {
        self.state.store(FREE, Ordering::Release);
    }

    /// Marks the mutex unusable. Calling this while held, or calling
    /// lock/unlock afterwards, is undefined — the caller must guarantee the
    /// mutex has no remaining users.
    pub fn destroy(&self) {
        self.state.store(DESTROYED, Ordering::Release);
    }
}

impl Default for RawMutex {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: the whole point of RawMutex is to serialize access across threads.
unsafe impl Sync for RawMutex {}
unsafe impl Send for RawMutex {}

/// A mutex guarding a `T`, in the `std::sync::Mutex` shape: lock returns a
/// guard, the guard derefs to `T`, dropping the guard unlocks.
pub struct Mutex<T> {
    raw: RawMutex,
    data: UnsafeCell<T>,
}

impl<T> Mutex<T> {
    pub const fn new(val: T) -> Self {
        Self {
            raw: RawMutex::new(),
            data: UnsafeCell::new(val),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.raw.lock();
        MutexGuard { mutex: self }
    }

    /// Access to the inner raw lock, for constructs (like [`crate::cond::CondVar`])
    /// that need to pair their own wait queue with this mutex's lock state.
    pub fn raw(&self) -> &RawMutex {
        &self.raw
    }

    /// SAFETY: caller must hold the lock (directly or via the raw handle).
    pub unsafe fn data_ptr(&self) -> *mut T {
        self.data.get()
    }
}

unsafe impl<T: Send> Sync for Mutex<T> {}
unsafe impl<T: Send> Send for Mutex<T> {}

pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> core::ops::Deref for MutexGuard<'_, T> {
    type Target = T;
    fn deref(&self) -> &T {
        // SAFETY: holding the guard implies holding the lock.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> core::ops::DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: holding the guard implies holding the lock, exclusively.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.raw.unlock();
    }
}

#[cfg(all(test, feature = "std-test-kernel"))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn mutual_exclusion() {
        let m = Arc::new(Mutex::new(0u64));
        let handles: std::vec::Vec<_> = (0..8)
            .map(|_| {
                let m = Arc::clone(&m);
                thread::spawn(move || {
                    for _ in 0..10_000 {
                        *m.lock() += 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*m.lock(), 80_000);
    }

    #[test]
    fn destroy_marks_unusable() {
        let m = RawMutex::new();
        m.lock();
        m.unlock();
        m.destroy();
    }
}
