//! Writer-preference reader/writer lock built from [`RawMutex`] and two
//! [`CondVar`]s.
//!
//! A writer increments `num_writers` before waiting, so readers that arrive
//! after a writer is already queued block behind it even if the lock is
//! currently read-held — this is the writer-preference property.

use crate::cond::CondVar;
use crate::mutex::RawMutex;
use core::cell::Cell;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Free,
    Read,
    Write,
    Invalid,
}

pub struct RwLock {
    mutex: RawMutex,
    readers: CondVar,
    writers: CondVar,
    mode: Cell<Mode>,
    num_writers: Cell<i32>,
    curr_readers: Cell<i32>,
}

unsafe impl Sync for RwLock {}
unsafe impl Send for RwLock {}

impl RwLock {
    pub const fn new() -> Self {
        Self {
            mutex: RawMutex::new(),
            readers: CondVar::new(),
            writers: CondVar::new(),
            mode: Cell::new(Mode::Free),
            num_writers: Cell::new(0),
            curr_readers: Cell::new(0),
        }
    }

    pub fn init(&self) {
        self.readers.init();
        self.writers.init();
        self.mode.set(Mode::Free);
        self.num_writers.set(0);
        self.curr_readers.set(0);
    }

    pub fn destroy(&self) {
        self.mode.set(Mode::Invalid);
    }

    pub fn lock_write(&self) {
        self.mutex.lock();
        self.num_writers.set(self.num_writers.get() + 1);
        while self.mode.get() != Mode::Free {
            // SAFETY: mutex held, matches this cond's predicate.
            unsafe { self.writers.wait(&self.mutex) };
        }
        self.mode.set(Mode::Write);
        self.mutex.unlock();
    }

    pub fn lock_read(&self) {
        self.mutex.lock();
        while self.mode.get() == Mode::Write || self.num_writers.get() > 0 {
            unsafe { self.readers.wait(&self.mutex) };
        }
        self.curr_readers.set(self.curr_readers.get() + 1);
        self.mode.set(Mode::Read);
        self.mutex.unlock();
    }

    /// Caller must currently hold either a read or a write lock obtained
    /// from this same `RwLock`; which one is recovered from the stored mode.
    pub fn unlock(&self) {
        self.mutex.lock();
        match self.mode.get() {
            Mode::Write => {
                self.num_writers.set(self.num_writers.get() - 1);
                self.mode.set(Mode::Free);
                self.readers.broadcast();
                self.writers.signal();
            }
            Mode::Read => {
                self.curr_readers.set(self.curr_readers.get() - 1);
                if self.curr_readers.get() == 0 {
                    self.mode.set(Mode::Free);
                    self.readers.broadcast();
                    self.writers.signal();
                }
            }
            Mode::Free | Mode::Invalid => {}
        }
        self.mutex.unlock();
    }

    /// Atomically convert a held write lock into a read lock. No-op if the
    /// lock is not currently write-held.
    pub fn downgrade(&self) {
        self.mutex.lock();
        if self.mode.get() != Mode::Write {
            self.mutex.unlock();
            return;
        }
        self.num_writers.set(self.num_writers.get() - 1);
        self.curr_readers.set(self.curr_readers.get() + 1);
        self.mode.set(Mode::Read);
        self.readers.broadcast();
        self.mutex.unlock();
    }
}

impl Default for RwLock {
    fn default() -> Self {
        Self::new()
    }
}
