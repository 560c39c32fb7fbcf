use kernel_sync::SpinLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::{panic, thread};

#[test]
fn guard_releases_on_drop() {
    let l = SpinLock::new(0_u32);
    {
        let mut g = l.lock();
        *g = 41;
    }
    {
        let mut g = l.lock_irq();
        *g += 1;
        assert_eq!(*g, 42);
    }
    assert!(l.try_lock().is_some());
}

#[test]
fn try_lock_fails_while_irq_guard_is_held() {
    let l = SpinLock::new(1u8);

    let g1 = l.lock_irq();
    assert!(l.try_lock().is_none());

    drop(g1);
    let g2 = l.try_lock();
    assert_eq!(g2.as_deref(), Some(&1));
}

#[test]
fn with_lock_irq_returns_closure_value() {
    let l = SpinLock::new(Vec::new());
    let len = l.with_lock_irq(|v| {
        v.extend_from_slice(&[1, 2, 3]);
        v.len()
    });
    assert_eq!(len, 3);
    assert_eq!(l.with_lock(|v| v.clone()), vec![1, 2, 3]);
}

#[test]
fn get_mut_bypasses_locking() {
    let mut l = SpinLock::new(Some(7_usize));
    *l.get_mut() = None;
    assert!(l.lock().is_none());
}

#[test]
fn contended_irq_sections_are_exclusive() {
    let threads = 8;
    let iters = 2_000;

    let lock = Arc::new(SpinLock::new(0usize));
    let in_cs = Arc::new(AtomicUsize::new(0));
    let start = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let lock = Arc::clone(&lock);
            let in_cs = Arc::clone(&in_cs);
            let start = Arc::clone(&start);
            thread::spawn(move || {
                start.wait();
                for _ in 0..iters {
                    lock.with_lock_irq(|v| {
                        let prev = in_cs.fetch_add(1, Ordering::SeqCst);
                        assert_eq!(prev, 0, "mutual exclusion violated");
                        *v += 1;
                        in_cs.fetch_sub(1, Ordering::SeqCst);
                    });
                    thread::yield_now();
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }

    assert_eq!(lock.with_lock(|v| *v), threads * iters);
}

#[test]
fn lock_is_released_on_panic() {
    let l = SpinLock::new(0u32);

    let res = panic::catch_unwind(panic::AssertUnwindSafe(|| {
        l.with_lock_irq(|v| {
            *v = 123;
            panic!("boom");
        });
    }));
    assert!(res.is_err(), "expected panic");
    assert_eq!(l.with_lock(|v| *v), 123);
}
