//! Fatal-error exit path.
//!
//! Four conditions are fatal by design: a failed `WaitNode`
//! allocation inside `cond_wait`, a failed page allocation while growing the
//! auto-stack, any exception reaching a multi-threaded thread's handler, and
//! any invariant violation the library itself detects. All of them funnel
//! through [`panic_exit`].

/// Print a diagnostic and terminate. Mirrors `panic.h`'s `die()` macro.
#[macro_export]
macro_rules! die {
    ($msg:expr) => {
        $crate::panic::panic_exit($msg, file!(), line!())
    };
}

/// Format and report a fatal diagnostic, then terminate the process.
///
/// Never returns. On the bare kernel backend this halts via the kernel's
/// terminate primitive; under `std-test-kernel` it panics the host thread
/// so `#[test]` harnesses observe the failure directly.
#[cold]
pub fn panic_exit(msg: &str, file: &str, line: u32) -> ! {
    crate::eprintln!("PANIC! `{}' at {}:{}. Program will exit", msg, file, line);
    imp::halt()
}

#[cfg(not(feature = "std-test-kernel"))]
mod imp {
    pub fn halt() -> ! {
        crate::sys::vanish()
    }
}

#[cfg(feature = "std-test-kernel")]
mod imp {
    pub fn halt() -> ! {
        panic!("thread library fatal error")
    }
}

#[cfg(not(feature = "std-test-kernel"))]
#[panic_handler]
fn on_panic(info: &core::panic::PanicInfo<'_>) -> ! {
    crate::eprintln!("PANIC! {}", info);
    crate::sys::vanish()
}
