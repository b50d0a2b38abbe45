//! Monotonic-clock timestamps used for FIFO timeouts.
//!
//! Both entry points return 64-bit milliseconds since an unspecified
//! monotonic origin. The underlying clock function is a plain value so tests
//! can inject failures; on failure the result is the explicit `0` sentinel.

use std::fmt;

use libc::clockid_t;
use libc::timespec;

use crate::log_ctx::LogCtx;
use crate::log_ctx::loge;

#[cfg(target_os = "linux")]
const COARSE_CLOCK: clockid_t = libc::CLOCK_MONOTONIC_COARSE;
#[cfg(not(target_os = "linux"))]
const COARSE_CLOCK: clockid_t = libc::CLOCK_MONOTONIC;

/// Pluggable clock function: reads the given clock, `None` on failure.
pub type ClockGettimeFxn = fn(clock_id: clockid_t) -> Option<timespec>;

fn system_gettime(clock_id: clockid_t) -> Option<timespec> {
    let mut ts = timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: `ts` lives for the duration of the call and `clock_gettime`
    // only writes into it.
    let ret = unsafe { libc::clock_gettime(clock_id, &mut ts) };
    (ret == 0).then_some(ts)
}

/// A monotonic clock with a swappable time source.
///
/// The default source is the system monotonic clock. The clock is carried by
/// value through the APIs that need deadlines, so a test can hand a FIFO a
/// failing or frozen clock without touching process globals.
#[derive(Clone, Copy)]
pub struct MonotonicClock {
    gettime: ClockGettimeFxn,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new(system_gettime)
    }
}

impl MonotonicClock {
    /// Wraps an arbitrary clock function.
    pub fn new(gettime: ClockGettimeFxn) -> Self {
        Self { gettime }
    }

    /// Milliseconds from `CLOCK_MONOTONIC`; `0` when the clock fails.
    pub fn now_msecs(&self, log: Option<&LogCtx>) -> u64 {
        self.msecs(libc::CLOCK_MONOTONIC, log)
    }

    /// Milliseconds from the coarse monotonic clock (cheaper, lower
    /// resolution); `0` when the clock fails.
    pub fn now_coarse_msecs(&self, log: Option<&LogCtx>) -> u64 {
        self.msecs(COARSE_CLOCK, log)
    }

    fn msecs(&self, clock_id: clockid_t, log: Option<&LogCtx>) -> u64 {
        match (self.gettime)(clock_id) {
            Some(ts) => ts.tv_sec as u64 * 1000 + ts.tv_nsec as u64 / 1_000_000,
            None => {
                loge!(log, "monotonic clock read failed");
                0
            }
        }
    }

    /// Raw `CLOCK_MONOTONIC` reading for absolute deadline computation.
    pub(crate) fn now_timespec(&self) -> Option<timespec> {
        (self.gettime)(libc::CLOCK_MONOTONIC)
    }
}

impl fmt::Debug for MonotonicClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MonotonicClock")
            .field("gettime", &(self.gettime as usize))
            .finish()
    }
}

#[cfg(test)]
mod test {
    use libc::clockid_t;
    use libc::timespec;

    use super::MonotonicClock;

    #[test]
    fn default_clock_is_monotonic() {
        let clock = MonotonicClock::default();
        let t0 = clock.now_msecs(None);
        let t1 = clock.now_msecs(None);
        assert!(t0 > 0);
        assert!(t1 >= t0);
    }

    #[test]
    fn coarse_and_precise_agree_roughly() {
        let clock = MonotonicClock::default();
        let coarse = clock.now_coarse_msecs(None);
        let precise = clock.now_msecs(None);
        assert!(coarse > 0);
        // The coarse clock may lag by a scheduler tick, never by seconds.
        assert!(precise.abs_diff(coarse) < 1000);
    }

    fn broken_gettime(_clock_id: clockid_t) -> Option<timespec> {
        None
    }

    #[test]
    fn clock_failure_yields_zero_sentinel() {
        let clock = MonotonicClock::new(broken_gettime);
        assert_eq!(clock.now_msecs(None), 0);
        assert_eq!(clock.now_coarse_msecs(None), 0);
    }

    fn frozen_gettime(_clock_id: clockid_t) -> Option<timespec> {
        Some(timespec {
            tv_sec: 12,
            tv_nsec: 345_000_000,
        })
    }

    #[test]
    fn millisecond_conversion() {
        let clock = MonotonicClock::new(frozen_gettime);
        assert_eq!(clock.now_msecs(None), 12_345);
    }
}
