//! Virtual-time driver for `embassy-time`.
//!
//! The discrete-event runner owns simulated time: it jumps the clock forward
//! to each event's due instant with [`set_virtual_now`]. `embassy_time::Instant::now()`
//! therefore reads simulated time, which is what log prefixes and reception
//! statistics report. Wakers registered through the driver fire as soon as the
//! clock reaches their deadline; nothing waits on the host clock.

use core::task::Waker;
use embassy_time::Instant;
use embassy_time_driver::{Driver, time_driver_impl};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

// Current virtual time in embassy ticks
static NOW_TICKS: AtomicU64 = AtomicU64::new(0);

// Map of virtual-timestamp -> list of wakers
static WAKERS: Mutex<BTreeMap<u64, Vec<Waker>>> = Mutex::new(BTreeMap::new());

fn wakers() -> MutexGuard<'static, BTreeMap<u64, Vec<Waker>>> {
    // A panicking waker cannot leave the map half-updated, so a poisoned lock is still usable.
    WAKERS.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Move the virtual clock to `instant` and wake everything due by then.
///
/// The clock may be moved backwards when a new scenario starts.
pub fn set_virtual_now(instant: Instant) {
    let now = instant.as_ticks();
    NOW_TICKS.store(now, Ordering::SeqCst);

    let ready: Vec<Waker> = {
        let mut queue = wakers();
        let later = queue.split_off(&now.saturating_add(1));
        let due = std::mem::replace(&mut *queue, later);
        due.into_values().flatten().collect()
    };
    // Wake outside the lock so wakers may reschedule themselves.
    for waker in ready {
        waker.wake();
    }
}

pub fn virtual_now() -> Instant {
    Instant::from_ticks(NOW_TICKS.load(Ordering::SeqCst))
}

struct VirtualDriver;

impl Driver for VirtualDriver {
    fn now(&self) -> u64 {
        NOW_TICKS.load(Ordering::SeqCst)
    }

    fn schedule_wake(&self, at: u64, waker: &Waker) {
        if at <= self.now() {
            waker.wake_by_ref();
            return;
        }
        wakers().entry(at).or_default().push(waker.clone());
    }
}

// Register as the global time driver for embassy-time
time_driver_impl!(static DRIVER: VirtualDriver = VirtualDriver);
