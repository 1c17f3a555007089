//! Counting semaphore built from [`crate::mutex::RawMutex`] and
//! [`crate::cond::CondVar`].

use crate::cond::CondVar;
use crate::error::{Result, ThreadLibError};
use crate::mutex::RawMutex;
use core::cell::Cell;

pub struct Semaphore {
    mutex: RawMutex,
    cond: CondVar,
    count: Cell<i32>,
    valid: Cell<bool>,
}

unsafe impl Sync for Semaphore {}
unsafe impl Send for Semaphore {}

impl Semaphore {
    pub const fn new() -> Self {
        Self {
            mutex: RawMutex::new(),
            cond: CondVar::new(),
            count: Cell::new(0),
            valid: Cell::new(false),
        }
    }

    /// `count` must be strictly positive.
    pub fn init(&self, count: i32) -> Result<()> {
        if count <= 0 {
            return Err(ThreadLibError::invalid_argument());
        }
        self.cond.init();
        self.count.set(count);
        self.valid.set(true);
        Ok(())
    }

    pub fn destroy(&self) {
        self.valid.set(false);
    }

    /// Block until the count is positive, then decrement it.
    pub fn wait(&self) {
        if !self.valid.get() {
            return;
        }
        self.mutex.lock();
        while self.count.get() == 0 {
            // SAFETY: mutex is held, matching this cond's predicate.
            unsafe { self.cond.wait(&self.mutex) };
        }
        self.count.set(self.count.get() - 1);
        self.mutex.unlock();
    }

    /// Increment the count and wake one waiter.
    pub fn signal(&self) {
        if !self.valid.get() {
            return;
        }
        self.mutex.lock();
        self.count.set(self.count.get() + 1);
        self.cond.signal();
        self.mutex.unlock();
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(all(test, feature = "std-test-kernel"))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn counting_law() {
        let sem = Arc::new(Semaphore::new());
        sem.init(3).unwrap();

        let permits_in_use = Arc::new(crate::mutex::Mutex::new(0i32));
        let mut handles = std::vec::Vec::new();
        for _ in 0..20 {
            let (sem, permits) = (sem.clone(), permits_in_use.clone());
            handles.push(thread::spawn(move || {
                sem.wait();
                {
                    let mut n = permits.lock();
                    *n += 1;
                    assert!(*n <= 3);
                }
                thread::yield_now();
                *permits.lock() -= 1;
                sem.signal();
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn rejects_nonpositive_count() {
        let sem = Semaphore::new();
        assert!(sem.init(0).is_err());
        assert!(sem.init(-1).is_err());
    }
}
