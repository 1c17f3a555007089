//! Global allocator: the underlying bump/free-list allocator serialized
//! behind a single mutex, exactly as the reference allocator wraps its raw
//! `_malloc`/`_free` calls in one process-wide lock.

use crate::mutex::RawMutex;
use core::alloc::{GlobalAlloc, Layout};
use linked_list_allocator::Heap;

pub struct LockedHeap {
    mutex: RawMutex,
    heap: core::cell::UnsafeCell<Heap>,
}

// SAFETY: every access to `heap` happens while `mutex` is held.
unsafe impl Sync for LockedHeap {}

impl LockedHeap {
    pub const fn empty() -> Self {
        Self {
            mutex: RawMutex::new(),
            heap: core::cell::UnsafeCell::new(Heap::empty()),
        }
    }

    /// Must be called once, before any allocation, with a region of memory
    /// this allocator may hand out freely.
    ///
    /// # Safety
    /// `[addr, addr + size)` must be valid, unused, and not otherwise
    /// accessed for as long as this allocator is in use.
    pub unsafe fn init(&self, addr: *mut u8, size: usize) {
        self.mutex.lock();
        // SAFETY: forwarded from the caller's contract.
        unsafe { (*self.heap.get()).init(addr, size) };
        self.mutex.unlock();
    }
}

unsafe impl GlobalAlloc for LockedHeap {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        self.mutex.lock();
        // SAFETY: protected by mutex; pointer is returned or null, matching
        // GlobalAlloc's contract either way.
        let ptr = unsafe { (*self.heap.get()).allocate_first_fit(layout) }
            .map(|n| n.as_ptr())
            .unwrap_or(core::ptr::null_mut());
        self.mutex.unlock();
        ptr
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        self.mutex.lock();
        // SAFETY: caller upholds GlobalAlloc's dealloc contract.
        unsafe {
            (*self.heap.get()).deallocate(core::ptr::NonNull::new_unchecked(ptr), layout);
        }
        self.mutex.unlock();
    }
}

#[cfg(not(feature = "std-test-kernel"))]
#[global_allocator]
static ALLOCATOR: LockedHeap = LockedHeap::empty();

/// Supply the backing memory region for the library's global allocator.
///
/// Must be called once, by the program's entry wrapper, before any
/// allocation happens — in particular before [`crate::install_autostack`]
/// (which itself allocates a small exception stack) and before
/// [`crate::thr_init`]. Without this call every allocation on the real
/// target returns null and the process aborts at its first `Box`/`Vec`.
///
/// # Safety
/// `[addr, addr + size)` must be valid, unused, and not otherwise accessed
/// for as long as the allocator is in use.
#[cfg(not(feature = "std-test-kernel"))]
pub unsafe fn init(addr: *mut u8, size: usize) {
    // SAFETY: forwarded from the caller's contract.
    unsafe { ALLOCATOR.init(addr, size) };
}

/// No-op under `std-test-kernel`: the host's ordinary allocator backs
/// `alloc`/`Box`/`Vec` there instead of [`LockedHeap`] (see module docs),
/// so there is no region to hand over.
#[cfg(feature = "std-test-kernel")]
pub unsafe fn init(_addr: *mut u8, _size: usize) {}

#[cfg(all(test, feature = "std-test-kernel"))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    /// Concurrent alloc/dealloc from many threads must never corrupt the
    /// heap: every allocation gets a distinct, correctly-sized region, and
    /// writing then reading back a per-thread pattern through it never
    /// observes another thread's data.
    #[test]
    fn allocator_serializes_concurrent_access() {
        const REGION: usize = 1 << 20;
        let region = Box::leak(vec![0u8; REGION].into_boxed_slice());
        let heap = Arc::new(LockedHeap::empty());
        // SAFETY: `region` is a freshly leaked buffer used by nothing else.
        unsafe { heap.init(region.as_mut_ptr(), REGION) };

        let mut handles = Vec::new();
        for t in 0..16u8 {
            let heap = heap.clone();
            handles.push(thread::spawn(move || {
                let layout = Layout::from_size_align(64, 8).unwrap();
                for _ in 0..500 {
                    // SAFETY: layout is well-formed and non-zero-sized.
                    let ptr = unsafe { heap.alloc(layout) };
                    assert!(!ptr.is_null(), "allocator ran out of space under contention");
                    // SAFETY: ptr is a fresh allocation of `layout.size()` bytes.
                    unsafe {
                        core::ptr::write_bytes(ptr, t, layout.size());
                        for i in 0..layout.size() {
                            assert_eq!(*ptr.add(i), t, "heap corrupted by a racing thread");
                        }
                        heap.dealloc(ptr, layout);
                    }
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }
}
