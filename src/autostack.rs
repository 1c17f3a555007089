//! Single-threaded stack-growth page-fault handler.
//!
//! Before `thr_init` runs, the initial thread's stack is grown on demand: a
//! page fault just below the current stack bottom triggers one more page of
//! `new_pages`, and the handler re-arms itself. Once the library goes
//! multi-threaded this is unsafe (another thread's stack may sit right below
//! the initial one), so `ThreadCore::init` uninstalls it and each spawned
//! thread gets a stub handler that dies on any fault instead.

use crate::sys::{self, Ureg, CAUSE_PAGEFAULT};
use alloc::boxed::Box;
use core::ffi::c_void;
use core::ptr;
use core::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

const EXCEPTION_STACK_SIZE: usize = 4096;
const PAGE_SIZE: usize = 4096;

static STACK_BOTTOM: AtomicUsize = AtomicUsize::new(0);
static EXCEPTION_STACK: AtomicPtr<u8> = AtomicPtr::new(ptr::null_mut());

/// Install the auto-growing stack handler. Called once by the entry wrapper
/// before the program's `main`, with the bounds of the stack the kernel gave
/// it at startup.
///
/// If the exception stack itself cannot be allocated, installation is
/// silently skipped: a subsequent overflow falls through to the kernel's
/// default handler (process kill), which is acceptable since there was no
/// way to report anything better.
pub fn install_autostack(_stack_high: *mut u8, stack_low: *mut u8) {
    STACK_BOTTOM.store(stack_low as usize, Ordering::SeqCst);
    let buf = Box::new([0u8; EXCEPTION_STACK_SIZE]);
    let raw = Box::into_raw(buf) as *mut u8;
    EXCEPTION_STACK.store(raw, Ordering::SeqCst);

    let handler_stack = unsafe { raw.add(EXCEPTION_STACK_SIZE) };
    sys::swexn(handler_stack, Some(seh), ptr::null_mut(), ptr::null_mut());
}

/// De-register the single-threaded handler. Called once, from
/// `ThreadCore::init`, when the library becomes multi-threaded.
pub fn uninstall_seh() {
    sys::swexn(ptr::null_mut(), None, ptr::null_mut(), ptr::null_mut());
}

/// Install the multi-threaded stub handler for the calling thread. If the
/// exception stack can't be allocated, the thread silently runs without one
/// and relies on the kernel's default handler on fault.
pub fn install_seh_multi() {
    let buf = Box::new([0u8; EXCEPTION_STACK_SIZE]);
    let raw = Box::into_raw(buf) as *mut u8;
    let handler_stack = unsafe { raw.add(EXCEPTION_STACK_SIZE) };
    sys::swexn(handler_stack, Some(seh_multi), ptr::null_mut(), ptr::null_mut());
}

unsafe extern "C" fn seh(_arg: *mut c_void, ureg: *mut Ureg) {
    let ureg = unsafe { &*ureg };
    if ureg.cause != CAUSE_PAGEFAULT {
        return;
    }
    let bottom = STACK_BOTTOM.load(Ordering::SeqCst);
    let new_bottom = bottom - PAGE_SIZE;
    if sys::new_pages(new_bottom as *mut u8, PAGE_SIZE) < 0 {
        crate::die!("Stack overflow error!");
    }
    STACK_BOTTOM.store(new_bottom, Ordering::SeqCst);

    let raw = EXCEPTION_STACK.load(Ordering::SeqCst);
    let handler_stack = unsafe { raw.add(EXCEPTION_STACK_SIZE) };
    sys::swexn(handler_stack, Some(seh), ptr::null_mut(), ureg as *const Ureg as *mut Ureg);
}

unsafe extern "C" fn seh_multi(_arg: *mut c_void, _ureg: *mut Ureg) {
    crate::die!("Thread caused a segmentation fault.");
}
