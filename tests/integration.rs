//! End-to-end scenarios driven through the public API, against the
//! `std-test-kernel` host backend.

#![cfg(feature = "std-test-kernel")]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use threadlib::rwlock::RwLock;
use threadlib::{spawn, thr_init};

#[test]
fn bounded_buffer_in_order() {
    thr_init(16 * 1024).unwrap();

    const CAPACITY: usize = 4;
    const N: u32 = 10_000;

    struct Ring {
        buf: [u32; CAPACITY],
        head: usize,
        tail: usize,
        len: usize,
    }
    let mutex = Arc::new(threadlib::mutex::Mutex::new(Ring {
        buf: [0; CAPACITY],
        head: 0,
        tail: 0,
        len: 0,
    }));
    let not_full = Arc::new(threadlib::cond::CondVar::new());
    let not_empty = Arc::new(threadlib::cond::CondVar::new());
    not_full.init();
    not_empty.init();

    let (m2, nf2, ne2) = (mutex.clone(), not_full.clone(), not_empty.clone());
    let producer = spawn(move || {
        for i in 0..N {
            let mut guard = m2.lock();
            while guard.len == CAPACITY {
                unsafe { nf2.wait(m2.raw()) };
            }
            let tail = guard.tail;
            guard.buf[tail] = i;
            guard.tail = (tail + 1) % CAPACITY;
            guard.len += 1;
            drop(guard);
            ne2.signal();
        }
        0
    })
    .unwrap();

    let mut received = Vec::with_capacity(N as usize);
    for _ in 0..N {
        let mut guard = mutex.lock();
        while guard.len == 0 {
            unsafe { not_empty.wait(mutex.raw()) };
        }
        let head = guard.head;
        received.push(guard.buf[head]);
        guard.head = (head + 1) % CAPACITY;
        guard.len -= 1;
        drop(guard);
        not_full.signal();
    }

    assert_eq!(producer.join().unwrap(), 0);
    assert_eq!(received, (0..N).collect::<Vec<_>>());
}

#[test]
fn readers_writers_no_starvation_once_writer_arrives() {
    thr_init(16 * 1024).unwrap();

    let lock = Arc::new(RwLock::new());
    lock.init();
    let stop = Arc::new(AtomicBool::new(false));
    let reader_generations = Arc::new(AtomicU32::new(0));
    let writer_done = Arc::new(AtomicBool::new(false));

    let mut reader_handles = Vec::new();
    for _ in 0..8 {
        let (lock, stop, gens) = (lock.clone(), stop.clone(), reader_generations.clone());
        reader_handles.push(spawn(move || {
            while !stop.load(Ordering::Relaxed) {
                lock.lock_read();
                gens.fetch_add(1, Ordering::Relaxed);
                lock.unlock();
                std::thread::yield_now();
            }
            0
        }));
    }

    std::thread::sleep(Duration::from_millis(100));

    let (lock2, done2) = (lock.clone(), writer_done.clone());
    let writer = spawn(move || {
        lock2.lock_write();
        done2.store(true, Ordering::SeqCst);
        lock2.unlock();
        0
    })
    .unwrap();

    let start = Instant::now();
    while !writer_done.load(Ordering::SeqCst) {
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "writer starved past a generous bound"
        );
        std::thread::sleep(Duration::from_millis(1));
    }

    stop.store(true, Ordering::Relaxed);
    writer.join().unwrap();
    for h in reader_handles {
        h.unwrap().join().unwrap();
    }
}

#[test]
fn fault_in_one_thread_does_not_block_already_exited_threads() {
    thr_init(16 * 1024).unwrap();

    let first = spawn(|| 7).unwrap();
    assert_eq!(first.join().unwrap(), 7);

    let faulting = spawn(|| {
        let p: *const i32 = std::ptr::null();
        unsafe { *p }
    })
    .unwrap();

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| faulting.join()));
    assert!(result.is_err() || matches!(result, Ok(Err(_))));

    let after = spawn(|| 9).unwrap();
    assert_eq!(after.join().unwrap(), 9);
}
