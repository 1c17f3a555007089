//! Condition variable immune to lost wakeups.
//!
//! The core trick: each waiter allocates its own flag word and ties the
//! kernel deschedule to that word instead of a shared counter. A signaller
//! sets the flag before calling `make_runnable`, so a waiter that hasn't
//! descheduled yet simply observes the flag already set and returns from
//! `deschedule` without sleeping — the signal cannot be lost in the gap
//! between releasing the user mutex and actually blocking.

use crate::list::{IntrusiveList, ListNode};
use crate::mutex::RawMutex;
use crate::sys;
use alloc::alloc::{alloc, Layout};
use core::cell::Cell;
use core::ptr::NonNull;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Status {
    Valid,
    Invalid,
}

/// One pending `cond_wait` call. Heap-allocated for the duration of the
/// wait; the waiter itself frees it after waking (never the signaller —
/// see module docs). `link` is kept as the first field under `repr(C)` so a
/// `NonNull<ListNode>` taken from the waiters list can be cast back to a
/// `WaitNode` pointer (the `get_entry`/container-of trick).
#[repr(C)]
struct WaitNode {
    link: ListNode,
    tid: sys::Tid,
    flag: Cell<i32>,
}

pub struct CondVar {
    status: Cell<Status>,
    queue_mutex: RawMutex,
    waiters: IntrusiveList,
}

// SAFETY: all mutable state is behind queue_mutex or a per-wait Cell that is
// only touched by its owning WaitNode's two threads (waiter + one signaller),
// themselves serialized by queue_mutex.
unsafe impl Sync for CondVar {}
unsafe impl Send for CondVar {}

impl CondVar {
    pub const fn new() -> Self {
        Self {
            status: Cell::new(Status::Valid),
            queue_mutex: RawMutex::new(),
            waiters: IntrusiveList::new(),
        }
    }

    /// Must be called once before first use (mirrors `cond_init`).
    pub fn init(&self) {
        self.waiters.init();
        self.status.set(Status::Valid);
    }

    pub fn destroy(&self) {
        self.queue_mutex.destroy();
        self.status.set(Status::Invalid);
    }

    /// Release `user_mutex`, sleep until signalled, then reacquire it.
    ///
    /// # Safety
    /// The caller must hold `user_mutex`'s raw lock on entry, and the lock
    /// must correspond to whatever guards the predicate this wait is for.
    pub unsafe fn wait(&self, user_mutex: &RawMutex) {
        if self.status.get() == Status::Invalid {
            return;
        }

        // Allocated explicitly (rather than via `Box::new`) so a failure
        // routes through this crate's own panic path instead of the
        // default Rust OOM abort: a failed wait is unrecoverable (spec'd
        // fatal condition), and the diagnostic should say so.
        let layout = Layout::new::<WaitNode>();
        // SAFETY: layout is non-zero-sized and well-formed (derived from a
        // concrete type).
        let raw = unsafe { alloc(layout) } as *mut WaitNode;
        if raw.is_null() {
            crate::die!("cond_wait: out of memory allocating wait node");
        }
        // SAFETY: raw is a valid, uninitialized, properly aligned WaitNode
        // allocation; we fully initialize it before ever reading from it.
        unsafe {
            raw.write(WaitNode {
                link: ListNode::new(),
                tid: sys::gettid(),
                flag: Cell::new(0),
            });
        }
        // SAFETY: raw was just initialized above and was allocated with
        // this same layout.
        let node_ref: &WaitNode = unsafe { &*raw };

        self.queue_mutex.lock();
        // SAFETY: node_ref outlives its list membership — we don't drop it
        // until after unlinking, below.
        unsafe { self.waiters.push_back(&node_ref.link) };
        self.queue_mutex.unlock();

        user_mutex.unlock();
        let flag_ptr = node_ref.flag.as_ptr();
        sys::deschedule(flag_ptr);
        user_mutex.lock();

        self.queue_mutex.lock();
        // SAFETY: still linked unless a concurrent signal already woke us,
        // in which case unlinking here is a no-op on an already-unlinked
        // node is avoided by the signaller never unlinking (see signal()).
        unsafe { self.waiters.unlink(&node_ref.link) };
        self.queue_mutex.unlock();

        // SAFETY: no other thread still references node_ref — the
        // signaller's only access window was before this unlink, under
        // queue_mutex, and it never retains the pointer afterwards. `raw`
        // was allocated above with this same layout.
        unsafe {
            core::ptr::drop_in_place(raw);
            alloc::alloc::dealloc(raw as *mut u8, layout);
        }
    }

    /// Wake the longest-waiting thread, if any. Caller must hold the user
    /// mutex associated with this condition variable's predicate.
    pub fn signal(&self) {
        if self.status.get() == Status::Invalid {
            return;
        }
        self.queue_mutex.lock();
        if let Some(node) = self.waiters.first() {
            self.wake_one(node);
        }
        self.queue_mutex.unlock();
    }

    /// Wake every currently-waiting thread. Threads that call `wait` after
    /// this returns are not woken by this call.
    pub fn broadcast(&self) {
        if self.status.get() == Status::Invalid {
            return;
        }
        self.queue_mutex.lock();
        self.waiters.for_each(|node| self.wake_one(node));
        self.queue_mutex.unlock();
    }

    /// SAFETY: `node` must be currently linked into `self.waiters`, and the
    /// caller must hold `queue_mutex`.
    fn wake_one(&self, node: NonNull<ListNode>) {
        // SAFETY: every node in `waiters` is a `WaitNode.link` field, and
        // `ListNode` is `#[repr]`-stable as the struct's first field.
        let wait_node = unsafe { &*(node.as_ptr() as *const WaitNode) };
        wait_node.flag.set(1);
        sys::make_runnable(wait_node.tid);
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, feature = "std-test-kernel"))]
mod tests {
    use super::*;
    use crate::mutex::Mutex;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn no_lost_wakeup_bounded_buffer() {
        struct Shared {
            buf: Option<u32>,
        }
        let mutex = Arc::new(Mutex::new(Shared { buf: None }));
        let not_empty = Arc::new(CondVar::new());
        let not_full = Arc::new(CondVar::new());
        not_empty.init();
        not_full.init();

        const N: u32 = 1000;
        let (m2, ne2, nf2) = (mutex.clone(), not_empty.clone(), not_full.clone());
        let producer = thread::spawn(move || {
            for i in 0..N {
                let mut guard = m2.lock();
                while guard.buf.is_some() {
                    // SAFETY: guard holds m2's raw lock.
                    unsafe { nf2.wait(m2.raw()) };
                }
                guard.buf = Some(i);
                ne2.signal();
            }
        });

        let mut received = std::vec::Vec::with_capacity(N as usize);
        for _ in 0..N {
            let mut guard = mutex.lock();
            while guard.buf.is_none() {
                unsafe { not_empty.wait(mutex.raw()) };
            }
            received.push(guard.buf.take().unwrap());
            not_full.signal();
        }
        producer.join().unwrap();
        assert_eq!(received, (0..N).collect::<std::vec::Vec<_>>());
    }

    #[test]
    fn fifo_wake_order() {
        let mutex = Arc::new(Mutex::new(0u32));
        let cv = Arc::new(CondVar::new());
        cv.init();
        let order = Arc::new(Mutex::new(std::vec::Vec::new()));

        let mut handles = std::vec::Vec::new();
        for i in 0..4u32 {
            let (m, c, o) = (mutex.clone(), cv.clone(), order.clone());
            handles.push(thread::spawn(move || {
                let mut guard = m.lock();
                while *guard != i {
                    unsafe { c.wait(m.raw()) };
                }
                o.lock().push(i);
                *guard += 1;
                drop(guard);
                c.broadcast();
            }));
            // Give each thread a chance to enqueue before spawning the next,
            // so the observed wake order matches spawn order.
            thread::sleep(std::time::Duration::from_millis(5));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*order.lock(), std::vec![0, 1, 2, 3]);
    }
}
