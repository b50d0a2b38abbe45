//! Process-shared synchronization objects embedded in the mapped segment.
//!
//! `nix` has no pthread coverage, so this module talks to `libc` directly.
//! The mutex is initialized `PTHREAD_PROCESS_SHARED`; both condition
//! variables are additionally bound to `CLOCK_MONOTONIC`, so absolute
//! timed waits share a time base with [`crate::MonotonicClock`].

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::time::Duration;

use libc::pthread_cond_t;
use libc::pthread_mutex_t;
use libc::timespec;

use crate::status::Status;
use crate::time::MonotonicClock;

const NSEC_PER_SEC: i64 = 1_000_000_000;

/// Initializes `mutex` in place with the process-shared attribute.
///
/// # Safety
///
/// `mutex` must point into mapped memory that stays valid and is not
/// concurrently accessed until initialization returns.
pub(crate) unsafe fn init_shared_mutex(mutex: *mut pthread_mutex_t) -> Result<(), Status> {
    unsafe {
        let mut attr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        if libc::pthread_mutexattr_init(attr.as_mut_ptr()) != 0 {
            return Err(Status::Error);
        }
        let attr = attr.as_mut_ptr();
        if libc::pthread_mutexattr_setpshared(attr, libc::PTHREAD_PROCESS_SHARED) != 0 {
            return Err(Status::Error);
        }
        if libc::pthread_mutex_init(mutex, attr) != 0 {
            return Err(Status::Error);
        }
    }
    Ok(())
}

/// Initializes `cond` in place, process-shared and bound to the monotonic
/// clock.
///
/// # Safety
///
/// Same contract as [`init_shared_mutex`].
pub(crate) unsafe fn init_shared_monotonic_cond(cond: *mut pthread_cond_t) -> Result<(), Status> {
    unsafe {
        let mut attr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
        if libc::pthread_condattr_init(attr.as_mut_ptr()) != 0 {
            return Err(Status::Error);
        }
        let attr = attr.as_mut_ptr();
        if libc::pthread_condattr_setclock(attr, libc::CLOCK_MONOTONIC) != 0 {
            return Err(Status::Error);
        }
        if libc::pthread_condattr_setpshared(attr, libc::PTHREAD_PROCESS_SHARED) != 0 {
            return Err(Status::Error);
        }
        if libc::pthread_cond_init(cond, attr) != 0 {
            return Err(Status::Error);
        }
    }
    Ok(())
}

/// Destroys a mutex previously set up by [`init_shared_mutex`].
///
/// # Safety
///
/// No thread in any process may hold or wait on the mutex afterwards.
pub(crate) unsafe fn destroy_mutex(mutex: *mut pthread_mutex_t) -> bool {
    unsafe { libc::pthread_mutex_destroy(mutex) == 0 }
}

/// Destroys a condition variable previously set up by
/// [`init_shared_monotonic_cond`].
///
/// # Safety
///
/// No thread in any process may be blocked on the variable afterwards.
pub(crate) unsafe fn destroy_cond(cond: *mut pthread_cond_t) -> bool {
    unsafe { libc::pthread_cond_destroy(cond) == 0 }
}

/// Wakes every waiter of `cond`. Waiters re-evaluate their predicate, so
/// over-signalling is harmless.
pub(crate) fn broadcast(cond: &UnsafeCell<pthread_cond_t>) {
    // SAFETY: the variable was initialized at segment creation and outlives
    // every mapped handle.
    unsafe {
        libc::pthread_cond_broadcast(cond.get());
    }
}

/// Outcome of a timed wait.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum WaitOutcome {
    Signalled,
    TimedOut,
}

/// RAII lock over the segment's API mutex; unlocks on drop, so every exit
/// path of an operation releases it.
pub(crate) struct SegmentMutexGuard<'a> {
    mutex: &'a UnsafeCell<pthread_mutex_t>,
}

impl<'a> SegmentMutexGuard<'a> {
    /// Blocks until the process-shared mutex is acquired.
    pub(crate) fn lock(mutex: &'a UnsafeCell<pthread_mutex_t>) -> Self {
        // SAFETY: the mutex was initialized process-shared at segment
        // creation and outlives every mapped handle.
        unsafe {
            libc::pthread_mutex_lock(mutex.get());
        }
        Self { mutex }
    }

    /// Atomically releases the mutex and blocks on `cond` until signalled.
    /// Spurious wake-ups are possible; callers re-check their predicate.
    pub(crate) fn wait(&self, cond: &UnsafeCell<pthread_cond_t>) -> Result<(), Status> {
        // SAFETY: `self` proves the mutex is held by this thread.
        let rc = unsafe { libc::pthread_cond_wait(cond.get(), self.mutex.get()) };
        if rc == 0 { Ok(()) } else { Err(Status::Error) }
    }

    /// As [`Self::wait`], giving up once the absolute monotonic `deadline`
    /// passes.
    pub(crate) fn wait_deadline(
        &self,
        cond: &UnsafeCell<pthread_cond_t>,
        deadline: &timespec,
    ) -> Result<WaitOutcome, Status> {
        // SAFETY: `self` proves the mutex is held by this thread.
        let rc = unsafe { libc::pthread_cond_timedwait(cond.get(), self.mutex.get(), deadline) };
        match rc {
            0 => Ok(WaitOutcome::Signalled),
            libc::ETIMEDOUT => Ok(WaitOutcome::TimedOut),
            _ => Err(Status::Error),
        }
    }
}

impl Drop for SegmentMutexGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: constructed only by `lock`, so the mutex is held.
        unsafe {
            libc::pthread_mutex_unlock(self.mutex.get());
        }
    }
}

/// Absolute monotonic deadline `timeout` from now, in the form
/// `pthread_cond_timedwait` expects. `None` when the clock fails.
pub(crate) fn deadline_after(clock: &MonotonicClock, timeout: Duration) -> Option<timespec> {
    let now = clock.now_timespec()?;
    let timeout_nsec = i64::try_from(timeout.as_nanos()).unwrap_or(i64::MAX);
    let total_nsec = (now.tv_sec as i64)
        .saturating_mul(NSEC_PER_SEC)
        .saturating_add(now.tv_nsec as i64)
        .saturating_add(timeout_nsec);
    Some(timespec {
        tv_sec: (total_nsec / NSEC_PER_SEC) as libc::time_t,
        tv_nsec: (total_nsec % NSEC_PER_SEC) as libc::c_long,
    })
}
