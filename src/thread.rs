//! Thread lifecycle: stack allocation, spawn trampoline, join/exit rendezvous,
//! and the global TCB registry.

use crate::autostack;
use crate::cond::CondVar;
use crate::error::{Result, ThreadLibError};
use crate::list::{IntrusiveList, ListNode};
use crate::mutex::RawMutex;
use crate::sys::{self, Tid};
use alloc::boxed::Box;
use alloc::vec;
use core::cell::Cell;
use core::ffi::c_void;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicUsize, Ordering};

static STACK_SIZE: AtomicUsize = AtomicUsize::new(0);
static TCB_LIST: IntrusiveList = IntrusiveList::new();
static TCB_LIST_MUTEX: RawMutex = RawMutex::new();

/// Task control block. `link` is kept first under `repr(C)` so a
/// `NonNull<ListNode>` taken from `TCB_LIST` can be cast back to a `Tcb`.
#[repr(C)]
struct Tcb {
    link: ListNode,
    id: Cell<Tid>,
    exited: Cell<bool>,
    status: Cell<i32>,
    /// Null for the main thread, whose stack the library did not allocate
    /// and must not free.
    stack_base: Cell<*mut u8>,
    joiners: CondVar,
    tcb_mutex: RawMutex,
}

unsafe impl Sync for Tcb {}
unsafe impl Send for Tcb {}

fn round_up_to_word(size: usize) -> usize {
    let rem = size % 4;
    if rem == 0 {
        size
    } else {
        size + (4 - rem)
    }
}

fn tcb_from_node(node: NonNull<ListNode>) -> NonNull<Tcb> {
    node.cast()
}

/// Find the Tcb for `tid`, if registered. Caller must not hold
/// `TCB_LIST_MUTEX`.
fn lookup_tcb(tid: Tid) -> Option<NonNull<Tcb>> {
    TCB_LIST_MUTEX.lock();
    let mut found = None;
    TCB_LIST.for_each(|node| {
        let tcb = tcb_from_node(node);
        // SAFETY: every node in TCB_LIST is a live Tcb.
        if found.is_none() && unsafe { tcb.as_ref() }.id.get() == tid {
            found = Some(tcb);
        }
    });
    TCB_LIST_MUTEX.unlock();
    found
}

/// Initialize the thread library. Must be called exactly once, before any
/// other `thr_*` call, from the program's single initial thread.
///
/// `size` is the stack size (in bytes) every subsequently created thread
/// will be given; it is rounded up to a 4-byte multiple.
pub fn thr_init(size: usize) -> Result<()> {
    autostack::uninstall_seh();
    STACK_SIZE.store(round_up_to_word(size), Ordering::SeqCst);
    TCB_LIST.init();

    let tcb = Box::new(Tcb {
        link: ListNode::new(),
        id: Cell::new(sys::gettid()),
        exited: Cell::new(false),
        status: Cell::new(0),
        stack_base: Cell::new(core::ptr::null_mut()),
        joiners: CondVar::new(),
        tcb_mutex: RawMutex::new(),
    });
    tcb.joiners.init();
    let tcb_ref = Box::leak(tcb);

    TCB_LIST_MUTEX.lock();
    // SAFETY: tcb_ref is leaked for the library's lifetime.
    unsafe { TCB_LIST.push_back(&tcb_ref.link) };
    TCB_LIST_MUTEX.unlock();
    Ok(())
}

struct SpawnPayload {
    entry: Box<dyn FnOnce() -> i32 + Send + 'static>,
    tcb: NonNull<Tcb>,
}

/// Create a thread running `f(arg)`. Returns the child's kernel tid.
pub fn thr_create<F>(f: F) -> Result<Tid>
where
    F: FnOnce() -> i32 + Send + 'static,
{
    let stack_size = STACK_SIZE.load(Ordering::SeqCst);
    if stack_size == 0 {
        return Err(ThreadLibError::invalid_argument());
    }

    let mut stack = vec![0u8; stack_size].into_boxed_slice();
    let stack_base = stack.as_mut_ptr();
    let stack_top = unsafe { stack_base.add(stack_size) };
    core::mem::forget(stack);

    let tcb = Box::new(Tcb {
        link: ListNode::new(),
        id: Cell::new(0),
        exited: Cell::new(false),
        status: Cell::new(0),
        stack_base: Cell::new(stack_base),
        joiners: CondVar::new(),
        tcb_mutex: RawMutex::new(),
    });
    tcb.joiners.init();
    let tcb_ptr = NonNull::from(Box::leak(tcb));

    let payload = Box::new(SpawnPayload {
        entry: Box::new(f),
        tcb: tcb_ptr,
    });
    let payload_ptr = Box::into_raw(payload) as *mut c_void;

    // Held across fork + append, per spec: otherwise the child could run
    // far enough to call the public `thr_exit` before its own Tcb is on
    // TCB_LIST, miss itself in `lookup_tcb`, and fall through to a bare
    // `vanish()` that never publishes `exited` — the joiner would then
    // block on `joiners` forever. Holding the lock here means any such
    // lookup in the child simply spins behind us until we've published.
    TCB_LIST_MUTEX.lock();
    let child_tid = sys::thread_fork(stack_top, trampoline, payload_ptr);
    if child_tid < 0 {
        TCB_LIST_MUTEX.unlock();
        // SAFETY: thread_fork failed synchronously; nothing else can be
        // holding these pointers.
        unsafe {
            drop(Box::from_raw(payload_ptr as *mut SpawnPayload));
            drop(Box::from_raw(tcb_ptr.as_ptr()));
            drop(alloc::vec::Vec::from_raw_parts(
                stack_base,
                stack_size,
                stack_size,
            ));
        }
        return Err(ThreadLibError::no_memory());
    }

    // SAFETY: the child has not been joined yet (its tid was just returned
    // to us and not yet observable by any other caller), so writing its id
    // before publishing it to TCB_LIST is race-free.
    unsafe { tcb_ptr.as_ref() }.id.set(child_tid);
    unsafe { TCB_LIST.push_back(&tcb_ptr.as_ref().link) };
    TCB_LIST_MUTEX.unlock();

    Ok(child_tid)
}

unsafe extern "C" fn trampoline(arg: *mut c_void) -> i32 {
    // SAFETY: arg is the payload pointer thr_create boxed and leaked.
    let payload = unsafe { Box::from_raw(arg as *mut SpawnPayload) };
    autostack::install_seh_multi();
    let ret = (payload.entry)();
    thr_exit_from(payload.tcb, ret)
}

/// Terminate the calling thread, frees its stack if the library allocated
/// one, and signals any joiner.
///
/// # Safety
/// `tcb` must be the current thread's own Tcb.
fn thr_exit_from(tcb: NonNull<Tcb>, status: i32) -> ! {
    // SAFETY: caller (trampoline) guarantees `tcb` belongs to this thread,
    // and no other thread mutates these fields except under tcb_mutex.
    let tcb_ref = unsafe { tcb.as_ref() };

    // Captured before publishing `exited`: the moment `joiners.broadcast()`
    // runs, a waiting joiner is free to wake, reacquire `tcb_mutex` right
    // behind us, see `exited == true`, and unlink-and-free this very Tcb
    // (see thr_join below) before we get any further. Nothing past this
    // point may read through `tcb_ref`/`tcb`.
    let stack_base = tcb_ref.stack_base.get();
    let stack_size = STACK_SIZE.load(Ordering::SeqCst);

    tcb_ref.tcb_mutex.lock();
    tcb_ref.exited.set(true);
    tcb_ref.status.set(status);
    tcb_ref.joiners.broadcast();
    tcb_ref.tcb_mutex.unlock();

    if !stack_base.is_null() {
        // SAFETY: this is exactly the allocation thr_create made and leaked.
        unsafe {
            drop(alloc::vec::Vec::from_raw_parts(
                stack_base,
                stack_size,
                stack_size,
            ));
        }
    }
    sys::vanish()
}

/// Exit the calling thread with the given status. Callable directly by user
/// code (not just implicitly, by returning from the thread function).
pub fn thr_exit(status: i32) -> ! {
    let tid = sys::gettid();
    match lookup_tcb(tid) {
        Some(tcb) => thr_exit_from(tcb, status),
        // No TCB (thr_exit called before thr_init, or from an unregistered
        // thread): nothing to publish, fall through to a bare halt.
        None => sys::vanish(),
    }
}

/// Wait for thread `tid` to exit, and retrieve the status it passed to
/// `thr_exit`.
pub fn thr_join(tid: Tid, out_status: Option<&mut i32>) -> Result<()> {
    if tid == sys::gettid() {
        return Err(ThreadLibError::invalid_argument());
    }
    let tcb = lookup_tcb(tid).ok_or_else(ThreadLibError::invalid_argument)?;
    // SAFETY: a Tcb only leaves TCB_LIST (and gets freed) inside this same
    // function, under TCB_LIST_MUTEX, and only one join per tid is
    // supported, so the reference stays valid for this call's duration.
    let tcb_ref = unsafe { tcb.as_ref() };

    tcb_ref.tcb_mutex.lock();
    while !tcb_ref.exited.get() {
        unsafe { tcb_ref.joiners.wait(&tcb_ref.tcb_mutex) };
    }
    let status = tcb_ref.status.get();
    tcb_ref.tcb_mutex.unlock();

    TCB_LIST_MUTEX.lock();
    unsafe { TCB_LIST.unlink(&tcb_ref.link) };
    TCB_LIST_MUTEX.unlock();

    // SAFETY: just unlinked, and joins are one-per-tid, so nothing else
    // references this Tcb.
    unsafe { drop(Box::from_raw(tcb.as_ptr())) };

    if let Some(out) = out_status {
        *out = status;
    }
    Ok(())
}

pub fn thr_getid() -> Tid {
    sys::gettid()
}

pub fn thr_yield(tid: Tid) -> i32 {
    sys::yield_thread(tid)
}

/// A handle to a spawned thread, in the `std::thread::JoinHandle` shape.
/// Built on top of [`thr_create`]/[`thr_join`].
pub struct JoinHandle {
    tid: Tid,
}

/// Spawn a thread running `f`, returning a handle that can wait for its
/// result. Equivalent to `thr_create` plus RAII bookkeeping.
pub fn spawn<F>(f: F) -> Result<JoinHandle>
where
    F: FnOnce() -> i32 + Send + 'static,
{
    let tid = thr_create(f)?;
    Ok(JoinHandle { tid })
}

impl JoinHandle {
    pub fn id(&self) -> Tid {
        self.tid
    }

    /// Block until the thread exits and return its status.
    pub fn join(self) -> Result<i32> {
        let mut status = 0;
        thr_join(self.tid, Some(&mut status))?;
        Ok(status)
    }
}

// The underlying kernel exposes no way to terminate a thread other than
// itself, so an unjoined JoinHandle has nothing useful to do on drop: the
// thread it names keeps running independently either way. No Drop impl here.

#[cfg(all(test, feature = "std-test-kernel"))]
mod tests {
    use super::*;

    #[test]
    fn join_delivers_status() {
        thr_init(16 * 1024).unwrap();
        let h = spawn(|| 42).unwrap();
        assert_eq!(h.join().unwrap(), 42);
    }

    #[test]
    fn self_join_rejected() {
        thr_init(16 * 1024).unwrap();
        let me = thr_getid();
        assert!(thr_join(me, None).is_err());
    }

    #[test]
    fn join_unknown_tid_rejected() {
        thr_init(16 * 1024).unwrap();
        assert!(thr_join(999_999, None).is_err());
    }

    #[test]
    fn ping_pong() {
        thr_init(16 * 1024).unwrap();
        let counter = alloc::sync::Arc::new(crate::mutex::Mutex::new(0u32));
        let cv_a = alloc::sync::Arc::new(CondVar::new());
        let cv_b = alloc::sync::Arc::new(CondVar::new());
        cv_a.init();
        cv_b.init();

        let (c1, a1, b1) = (counter.clone(), cv_a.clone(), cv_b.clone());
        let h = spawn(move || {
            for _ in 0..500 {
                let mut guard = c1.lock();
                while *guard % 2 != 0 {
                    unsafe { a1.wait(c1.raw()) };
                }
                *guard += 1;
                drop(guard);
                b1.signal();
            }
            0
        })
        .unwrap();

        for _ in 0..500 {
            let mut guard = counter.lock();
            while *guard % 2 != 1 {
                unsafe { cv_b.wait(counter.raw()) };
            }
            *guard += 1;
            drop(guard);
            cv_a.signal();
        }

        assert_eq!(h.join().unwrap(), 0);
        assert_eq!(*counter.lock(), 1000);
    }
}
