//! The eight kernel primitives this library is built on, plus a
//! `std-test-kernel`-gated host backend that emulates them with
//! `std::thread`/`std::sync` so the synchronization logic can be exercised by
//! `cargo test` without a real target kernel.

use core::ffi::c_void;

pub type Tid = i32;

/// Entry point a spawned thread starts at. Matches the signature
/// `thread_fork`'s `fn` parameter is described by.
pub type ThreadEntry = unsafe extern "C" fn(arg: *mut c_void) -> i32;

/// Software exception handler signature, paired with [`swexn`].
pub type ExceptionHandler = unsafe extern "C" fn(arg: *mut c_void, ureg: *mut Ureg);

/// Minimal register-set snapshot delivered to a software exception handler.
/// Only the fields this library inspects are modeled.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct Ureg {
    pub cause: u32,
    pub fault_address: usize,
}

pub const CAUSE_PAGEFAULT: u32 = 14;

#[cfg(not(feature = "std-test-kernel"))]
pub use bare::*;

#[cfg(feature = "std-test-kernel")]
pub use host::*;

/// Declarations of the raw kernel calls. Linked against the target kernel's
/// C runtime; never called on a host build (see the `host` module below).
#[cfg(not(feature = "std-test-kernel"))]
mod bare {
    use super::*;

    unsafe extern "C" {
        #[link_name = "thread_fork"]
        fn sys_thread_fork(stack_top: *mut u8, entry: ThreadEntry, arg: *mut c_void) -> Tid;
        #[link_name = "deschedule"]
        fn sys_deschedule(flag: *mut i32) -> i32;
        #[link_name = "make_runnable"]
        fn sys_make_runnable(tid: Tid) -> i32;
        #[link_name = "yield"]
        fn sys_yield(tid: Tid) -> i32;
        #[link_name = "gettid"]
        fn sys_gettid() -> Tid;
        #[link_name = "vanish"]
        fn sys_vanish() -> !;
        #[link_name = "new_pages"]
        fn sys_new_pages(addr: *mut u8, len: usize) -> i32;
        #[link_name = "swexn"]
        fn sys_swexn(
            handler_stack: *mut u8,
            handler: Option<ExceptionHandler>,
            arg: *mut c_void,
            ureg: *mut Ureg,
        ) -> i32;
        #[link_name = "print"]
        fn sys_print(len: usize, buf: *const u8) -> i32;
    }

    /// Create a kernel thread whose stack pointer starts at `stack_top`,
    /// running `entry(arg)`. Returns the child's tid.
    pub fn thread_fork(stack_top: *mut u8, entry: ThreadEntry, arg: *mut c_void) -> Tid {
        unsafe { sys_thread_fork(stack_top, entry, arg) }
    }

    /// Block unless `*flag != 0`, in which case return immediately.
    pub fn deschedule(flag: *mut i32) -> i32 {
        unsafe { sys_deschedule(flag) }
    }

    pub fn make_runnable(tid: Tid) -> i32 {
        unsafe { sys_make_runnable(tid) }
    }

    pub fn yield_thread(tid: Tid) -> i32 {
        unsafe { sys_yield(tid) }
    }

    pub fn gettid() -> Tid {
        unsafe { sys_gettid() }
    }

    pub fn vanish() -> ! {
        unsafe { sys_vanish() }
    }

    pub fn new_pages(addr: *mut u8, len: usize) -> i32 {
        unsafe { sys_new_pages(addr, len) }
    }

    pub fn swexn(
        handler_stack: *mut u8,
        handler: Option<ExceptionHandler>,
        arg: *mut c_void,
        ureg: *mut Ureg,
    ) -> i32 {
        unsafe { sys_swexn(handler_stack, handler, arg, ureg) }
    }

    pub fn report(bytes: &[u8]) {
        unsafe {
            sys_print(bytes.len(), bytes.as_ptr());
        }
    }
}

/// Host backend for `std-test-kernel`: every primitive above, reimplemented
/// on `std::thread`/`std::sync` so this crate's own logic can be driven by
/// `cargo test` without a target kernel underneath it.
#[cfg(feature = "std-test-kernel")]
mod host {
    use super::*;
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::{Condvar, Mutex, OnceLock};

    static NEXT_TID: AtomicI32 = AtomicI32::new(1);

    thread_local! {
        static TID: Cell<Tid> = Cell::new(0);
    }

    struct ParkSlot {
        runnable: Mutex<bool>,
        cv: Condvar,
    }

    fn park_table() -> &'static Mutex<HashMap<Tid, std::sync::Arc<ParkSlot>>> {
        static TABLE: OnceLock<Mutex<HashMap<Tid, std::sync::Arc<ParkSlot>>>> = OnceLock::new();
        TABLE.get_or_init(|| Mutex::new(HashMap::new()))
    }

    fn slot_for(tid: Tid) -> std::sync::Arc<ParkSlot> {
        let mut table = park_table().lock().unwrap();
        table
            .entry(tid)
            .or_insert_with(|| {
                std::sync::Arc::new(ParkSlot {
                    runnable: Mutex::new(false),
                    cv: Condvar::new(),
                })
            })
            .clone()
    }

    /// Marker unwound by [`vanish`] and caught right here, giving a host
    /// thread a clean, early exit point that looks nothing like a panic to
    /// anything watching from outside this module.
    pub struct VanishUnwind;

    pub fn thread_fork(_stack_top: *mut u8, entry: ThreadEntry, arg: *mut c_void) -> Tid {
        let tid = NEXT_TID.fetch_add(1, Ordering::Relaxed);
        let arg_addr = arg as usize;
        std::thread::Builder::new()
            .spawn(move || {
                TID.with(|t| t.set(tid));
                let arg = arg_addr as *mut c_void;
                let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| unsafe {
                    entry(arg)
                }));
                if let Err(payload) = result {
                    if payload.downcast_ref::<VanishUnwind>().is_none() {
                        std::panic::resume_unwind(payload);
                    }
                }
            })
            .expect("failed to spawn host thread for thread_fork emulation");
        tid
    }

    pub fn deschedule(flag: *mut i32) -> i32 {
        // SAFETY: callers (CondVar) keep `flag` alive for the call's duration.
        if unsafe { core::ptr::read_volatile(flag) } != 0 {
            return 0;
        }
        let tid = gettid();
        let slot = slot_for(tid);
        let mut runnable = slot.runnable.lock().unwrap();
        while !*runnable {
            runnable = slot.cv.wait(runnable).unwrap();
        }
        *runnable = false;
        0
    }

    pub fn make_runnable(tid: Tid) -> i32 {
        let slot = slot_for(tid);
        let mut runnable = slot.runnable.lock().unwrap();
        *runnable = true;
        slot.cv.notify_all();
        0
    }

    pub fn yield_thread(_tid: Tid) -> i32 {
        std::thread::yield_now();
        0
    }

    pub fn gettid() -> Tid {
        let cached = TID.with(|t| t.get());
        if cached != 0 {
            return cached;
        }
        let tid = NEXT_TID.fetch_add(1, Ordering::Relaxed);
        TID.with(|t| t.set(tid));
        tid
    }

    pub fn vanish() -> ! {
        std::panic::resume_unwind(Box::new(VanishUnwind));
    }

    /// Host emulation has no real address space to grow; always succeeds so
    /// `AutoStack`'s bookkeeping can be exercised without mapping memory.
    pub fn new_pages(_addr: *mut u8, _len: usize) -> i32 {
        0
    }

    thread_local! {
        static HANDLER: Cell<Option<(Option<ExceptionHandler>, *mut c_void, *mut u8)>> =
            Cell::new(None);
    }

    /// Host emulation only tracks install/uninstall state; it never raises a
    /// real hardware fault, so the handler is never actually invoked here.
    pub fn swexn(
        handler_stack: *mut u8,
        handler: Option<ExceptionHandler>,
        arg: *mut c_void,
        _ureg: *mut Ureg,
    ) -> i32 {
        HANDLER.with(|h| h.set(Some((handler, arg, handler_stack))));
        0
    }

    pub fn report(bytes: &[u8]) {
        let _ = std::io::Write::write_all(&mut std::io::stderr(), bytes);
    }
}
