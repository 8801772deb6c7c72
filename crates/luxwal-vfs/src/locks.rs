//! Deadlock-free multi-lock acquisition (spec.md §4.4).
//!
//! `lock_all` acquires exclusive ownership of an arbitrary set of
//! reader/writer mutexes without risking the classic "everyone holds lock 1,
//! waits on lock 2" deadlock: only one lock is ever acquired with a
//! blocking wait at a time; the rest are opportunistic, and a failure backs
//! everything off and restarts from the lock that refused.

use parking_lot::{RwLock, RwLockWriteGuard};

/// Acquire exclusive ownership of every lock in `locks`, in whatever order
/// avoids blocking indefinitely behind a peer doing the same thing in a
/// different order.
///
/// Algorithm (spec.md §4.4): pick a starting index; acquire it blocking;
/// try-acquire the rest in rotation order. On the first failure, release
/// everything acquired since the start index, move the start index to the
/// lock that refused, and retry. Terminates once every lock in the set is
/// owned by the caller.
#[must_use]
pub fn lock_all<'a>(locks: &[&'a RwLock<()>]) -> Vec<RwLockWriteGuard<'a, ()>> {
    let n = locks.len();
    if n == 0 {
        return Vec::new();
    }

    let mut start = 0usize;
    loop {
        let mut guards: Vec<Option<RwLockWriteGuard<'a, ()>>> = (0..n).map(|_| None).collect();
        guards[start] = Some(locks[start].write());

        let mut failed_at = None;
        for step in 1..n {
            let idx = (start + step) % n;
            match locks[idx].try_write() {
                Some(guard) => guards[idx] = Some(guard),
                None => {
                    failed_at = Some(idx);
                    break;
                }
            }
        }

        if let Some(idx) = failed_at {
            drop(guards);
            start = idx;
            continue;
        }

        return guards.into_iter().map(|g| g.expect("all slots filled")).collect();
    }
}

/// Release every lock currently held via a [`lock_all`] call. Equivalent to
/// dropping the guard vector, spelled out for symmetry with `lock_all` at
/// call sites.
pub fn unlock_all(guards: Vec<RwLockWriteGuard<'_, ()>>) {
    drop(guards);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn lock_all_acquires_every_lock() {
        let a = RwLock::new(());
        let b = RwLock::new(());
        let c = RwLock::new(());
        let guards = lock_all(&[&a, &b, &c]);
        assert_eq!(guards.len(), 3);
        assert!(a.try_read().is_none());
        assert!(b.try_read().is_none());
        assert!(c.try_read().is_none());
        unlock_all(guards);
        assert!(a.try_read().is_some());
    }

    #[test]
    fn concurrent_opposite_order_does_not_deadlock() {
        let a = Arc::new(RwLock::new(()));
        let b = Arc::new(RwLock::new(()));

        let (a1, b1) = (Arc::clone(&a), Arc::clone(&b));
        let t1 = thread::spawn(move || {
            for _ in 0..200 {
                let guards = lock_all(&[&a1, &b1]);
                unlock_all(guards);
            }
        });

        let (a2, b2) = (Arc::clone(&a), Arc::clone(&b));
        let t2 = thread::spawn(move || {
            for _ in 0..200 {
                let guards = lock_all(&[&b2, &a2]);
                unlock_all(guards);
            }
        });

        t1.join().unwrap();
        t2.join().unwrap();
        // If we got here without hanging, no deadlock occurred.
        assert!(a.try_read().is_some());
        thread::sleep(Duration::from_millis(1));
    }
}
