//! Integration tests for the shared-memory FIFO, including the forked
//! producer/consumer pair that exercises the cross-process path for real.

use std::mem::size_of;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use mediaproc::FifoFlags;
use mediaproc::LogCtx;
use mediaproc::MonotonicClock;
use mediaproc::ShmFifo;
use mediaproc::Status;
use nix::sys::wait::WaitStatus;
use nix::sys::wait::waitpid;
use nix::unistd::ForkResult;
use nix::unistd::fork;
use proptest::prelude::*;

const MESSAGE_MAX_LEN: usize = 17;

/// Pool sized for exactly one message of the maximum length.
fn one_message_pool() -> usize {
    size_of::<isize>() + MESSAGE_MAX_LEN
}

/// Unique name per test and test binary; parallel tests share the global
/// shm namespace. Unlinks any leftover from an aborted earlier run.
fn scratch_name(tag: &str) -> String {
    let name = format!("/mediaproc_utest_{tag}_{}", std::process::id());
    let _ = nix::sys::mman::shm_unlink(name.as_str());
    name
}

/// The canonical message list: NUL-terminated strings of varying lengths,
/// every one at most `MESSAGE_MAX_LEN` bytes once framed-terminated.
const MESSAGES: &[&str] = &[
    "Hello, world!.\0",
    "How are you?.\0",
    "abcdefghijklmno\0",
    "123456789\0",
    "__ABCD__1234_\0",
    "_            _\0",
    "_/)=:;.\"·#{+]\0",
    "{\"key\":\"val\"}\0",
    "Goodbye.\0",
    "_/)=:;.\"·#{+]\0",
    "{\"key\":\"varte\0",
    "_/)=:;.\\0\0",
    "{\"key\":####al\"}\0",
    " \0",
    "\0",
    "     \0",
    "\0",
    "################\0", // maximum length once the terminator is counted
    "_            _\0",
    "_/)=:;.\"·#{+]\0",
    "{\"key\":\"val\"}\0",
    "Goodbye.\0",
    "_/)=:;.\"·#{+]\0",
    "{\"key\":\"varte\0",
    "_/)=:;.\\0\0",
    "{\"key\":####al\"}\0",
    " \0",
    "\0",
    "     \0",
    "Goodbye.\0",
];

fn consumer_task(name: &str) {
    let fifo = ShmFifo::open(name, None).expect("consumer could not open the FIFO");
    for expected in MESSAGES {
        let elem = fifo.pull(None, None).expect("consumer pull failed");
        assert_eq!(&elem[..], expected.as_bytes());
    }
    fifo.close(None);
}

#[test]
fn happy_path_cross_process() {
    assert_eq!(MESSAGES.len(), 30);
    for msg in MESSAGES {
        assert!(msg.len() <= MESSAGE_MAX_LEN);
    }

    let name = scratch_name("happypath");
    let log = LogCtx::stdout();
    let fifo = ShmFifo::create(
        &name,
        one_message_pool(),
        FifoFlags::EXHAUST_CTRL,
        Some(&log),
    )
    .expect("could not create the FIFO");

    match unsafe { fork() }.expect("fork failed") {
        ForkResult::Child => {
            // The child must never unwind into the test harness, and must
            // not run the parent's destructors (its copy of `fifo` would
            // unlink the segment under the parent).
            let outcome = catch_unwind(AssertUnwindSafe(|| consumer_task(&name)));
            unsafe { libc::_exit(if outcome.is_ok() { 0 } else { 1 }) };
        }
        ForkResult::Parent { child } => {
            // The pool fits one maximum-length message, so most pushes block
            // until the consumer has pulled the previous one.
            for msg in MESSAGES {
                fifo.push(msg.as_bytes(), Some(&log)).expect("push failed");
            }
            match waitpid(child, None).expect("waitpid failed") {
                WaitStatus::Exited(_, 0) => {}
                status => panic!("consumer process failed: {status:?}"),
            }
            fifo.set_blocking_mode(false, Some(&log));
            fifo.release(Some(&log));
        }
    }
}

#[test]
fn release_unblocks_a_blocked_pull() {
    let name = scratch_name("release_unblocks");
    let fifo = ShmFifo::create(&name, one_message_pool(), FifoFlags::empty(), None).unwrap();

    match unsafe { fork() }.expect("fork failed") {
        ForkResult::Child => {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                let peer = ShmFifo::open(&name, None).expect("open failed");
                assert_eq!(peer.pull(None, None).unwrap_err(), Status::Interrupted);
            }));
            unsafe { libc::_exit(if outcome.is_ok() { 0 } else { 1 }) };
        }
        ForkResult::Parent { child } => {
            // Give the child time to block on the empty FIFO.
            thread::sleep(Duration::from_millis(200));
            fifo.release(None);
            match waitpid(child, None).expect("waitpid failed") {
                WaitStatus::Exited(_, 0) => {}
                status => panic!("blocked consumer did not exit cleanly: {status:?}"),
            }
        }
    }
}

#[test]
fn push_rejects_invalid_messages() {
    let name = scratch_name("invalid_push");
    let fifo = ShmFifo::create(&name, one_message_pool(), FifoFlags::empty(), None).unwrap();

    // 17 bytes of payload plus the terminator exceed the pool.
    let oversize = "IIIIIIIIIIIIIIIII\0";
    assert_eq!(oversize.len(), MESSAGE_MAX_LEN + 1);
    assert_eq!(
        fifo.push(oversize.as_bytes(), None).unwrap_err(),
        Status::Error
    );
    assert_eq!(fifo.push(&[], None).unwrap_err(), Status::Error);

    fifo.release(None);
}

#[test]
fn exact_fit_succeeds_and_one_byte_more_fails() {
    let name = scratch_name("exact_fit");
    let fifo = ShmFifo::create(&name, 64, FifoFlags::NONBLOCK, None).unwrap();

    fifo.push(&[0xAAu8; 10], None).unwrap();
    // Exactly the remaining room.
    let remaining_payload = 64 - fifo.buffer_level() - size_of::<isize>();
    fifo.push(&vec![0xBBu8; remaining_payload], None).unwrap();
    assert_eq!(fifo.buffer_level(), 64);
    // One byte over.
    assert_eq!(fifo.push(&[0xCCu8], None).unwrap_err(), Status::NoMem);

    fifo.release(None);
}

#[test]
fn push_overflow_nonblocking() {
    let name = scratch_name("overflow");
    let fifo = ShmFifo::create(&name, one_message_pool(), FifoFlags::empty(), None).unwrap();
    fifo.set_blocking_mode(false, None);

    fifo.push("abcdefghijklmno\0".as_bytes(), None).unwrap();
    assert_eq!(
        fifo.push("fail\0".as_bytes(), None).unwrap_err(),
        Status::NoMem
    );

    fifo.release(None);
}

#[test]
fn pull_underrun_nonblocking() {
    let name = scratch_name("underrun");
    let fifo = ShmFifo::create(&name, one_message_pool(), FifoFlags::empty(), None).unwrap();
    fifo.set_blocking_mode(false, None);
    fifo.empty(None);

    assert_eq!(fifo.pull(None, None).unwrap_err(), Status::Again);

    fifo.release(None);
}

#[test]
fn pull_times_out_on_the_monotonic_clock() {
    let clock = MonotonicClock::default();
    let t0 = clock.now_coarse_msecs(None);
    assert!(t0 > 0);

    let name = scratch_name("timeout");
    let fifo = ShmFifo::create(&name, one_message_pool(), FifoFlags::empty(), None).unwrap();

    // A push followed by a timed pull completes without consuming the
    // budget.
    fifo.push("abcdefghijklmno\0".as_bytes(), None).unwrap();
    let elem = fifo.pull(Some(Duration::from_secs(1)), None).unwrap();
    assert_eq!(elem.len(), 16);
    assert!(clock.now_coarse_msecs(None) >= t0);

    // An empty FIFO burns the whole time budget.
    assert_eq!(
        fifo.pull(Some(Duration::from_secs(1)), None).unwrap_err(),
        Status::TimedOut
    );
    let tcurr = clock.now_coarse_msecs(None);
    assert!(tcurr >= t0 && tcurr - t0 >= 1000);

    fifo.release(None);
}

#[test]
fn zero_timeout_distinguishes_modes() {
    let name = scratch_name("zero_timeout");
    let fifo = ShmFifo::create(&name, one_message_pool(), FifoFlags::NONBLOCK, None).unwrap();

    // Non-blocking and empty: immediate Again, deadline irrelevant.
    assert_eq!(
        fifo.pull(Some(Duration::ZERO), None).unwrap_err(),
        Status::Again
    );

    // Blocking and empty: the already-expired deadline reports TimedOut.
    fifo.set_blocking_mode(true, None);
    assert_eq!(
        fifo.pull(Some(Duration::ZERO), None).unwrap_err(),
        Status::TimedOut
    );

    fifo.set_blocking_mode(false, None);
    fifo.release(None);
}

#[test]
fn empty_discards_and_is_idempotent() {
    let name = scratch_name("empty");
    let fifo = ShmFifo::create(&name, one_message_pool(), FifoFlags::EXHAUST_CTRL, None).unwrap();

    fifo.push("abcdefghijklmno\0".as_bytes(), None).unwrap();
    fifo.empty(None);
    assert_eq!(fifo.buffer_level(), 0);
    assert_eq!(
        fifo.pull(Some(Duration::from_millis(1)), None).unwrap_err(),
        Status::TimedOut
    );

    fifo.empty(None);
    assert_eq!(fifo.buffer_level(), 0);
    assert_eq!(fifo.slots_used(), 0);

    fifo.set_blocking_mode(false, None);
    fifo.release(None);
}

#[test]
fn wrap_around_preserves_order_and_bytes() {
    let name = scratch_name("wrap");
    let fifo = ShmFifo::create(&name, 64, FifoFlags::empty(), None).unwrap();

    let frame_a: Vec<u8> = (0..12).collect();
    let frame_b: Vec<u8> = (100..112).collect();
    let frame_c: Vec<u8> = (200..210).collect();
    fifo.push(&frame_a, None).unwrap();
    fifo.push(&frame_b, None).unwrap();
    fifo.push(&frame_c, None).unwrap();

    assert_eq!(fifo.pull(None, None).unwrap(), frame_a);

    // The write cursor sits at byte 58 of 64; D's 20 framed bytes straddle
    // the pool boundary.
    let frame_d: Vec<u8> = (50..62).collect();
    fifo.push(&frame_d, None).unwrap();

    assert_eq!(fifo.pull(None, None).unwrap(), frame_b);
    assert_eq!(fifo.pull(None, None).unwrap(), frame_c);
    assert_eq!(fifo.pull(None, None).unwrap(), frame_d);
    assert_eq!(fifo.buffer_level(), 0);

    fifo.release(None);
}

#[test]
fn split_size_field_survives_the_wrap() {
    let pool = 32;
    let name = scratch_name("split_header");
    let fifo = ShmFifo::create(&name, pool, FifoFlags::EXHAUST_CTRL, None).unwrap();

    // Park the write cursor one byte before the pool end.
    let filler = vec![0x11u8; pool - size_of::<isize>() - 1];
    fifo.push(&filler, None).unwrap();
    assert_eq!(fifo.pull(None, None).unwrap(), filler);

    // The size field itself now splits 1 + 7 across the wrap point.
    let payload: Vec<u8> = (1..=10).collect();
    fifo.push(&payload, None).unwrap();
    assert_eq!(fifo.pull(None, None).unwrap(), payload);

    fifo.release(None);
}

#[test]
fn mode_change_wakes_a_blocked_consumer() {
    let name = scratch_name("mode_change");
    let fifo = ShmFifo::create(&name, one_message_pool(), FifoFlags::empty(), None).unwrap();

    thread::scope(|scope| {
        scope.spawn(|| {
            assert_eq!(fifo.pull(None, None).unwrap_err(), Status::Again);
        });
        thread::sleep(Duration::from_millis(100));
        fifo.set_blocking_mode(false, None);
    });

    fifo.release(None);
}

static PROP_CASE: AtomicUsize = AtomicUsize::new(0);

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Whatever the FIFO accepts it returns byte-identical and in order,
    /// and the level bookkeeping balances back to zero.
    #[test]
    fn accepted_frames_come_back_in_order(
        payloads in proptest::collection::vec(
            proptest::collection::vec(any::<u8>(), 1..=32),
            1..=20,
        )
    ) {
        let case = PROP_CASE.fetch_add(1, Ordering::Relaxed);
        let name = format!("/mediaproc_utest_prop_{case}_{}", std::process::id());
        let _ = nix::sys::mman::shm_unlink(name.as_str());
        let fifo = ShmFifo::create(&name, 256, FifoFlags::NONBLOCK, None).unwrap();

        let mut accepted = Vec::new();
        for payload in &payloads {
            match fifo.push(payload, None) {
                Ok(()) => accepted.push(payload.clone()),
                Err(Status::NoMem) => {}
                Err(status) => prop_assert!(false, "unexpected push status {status:?}"),
            }
            prop_assert_eq!(fifo.slots_used() == 0, fifo.buffer_level() == 0);
        }

        let expected_level: usize = accepted
            .iter()
            .map(|payload| payload.len() + size_of::<isize>())
            .sum();
        prop_assert_eq!(fifo.buffer_level(), expected_level);

        let mut pulled = Vec::new();
        loop {
            match fifo.pull(None, None) {
                Ok(elem) => pulled.push(elem),
                Err(Status::Again) => break,
                Err(status) => prop_assert!(false, "unexpected pull status {status:?}"),
            }
        }

        prop_assert_eq!(pulled, accepted);
        prop_assert_eq!(fifo.buffer_level(), 0);
        prop_assert_eq!(fifo.slots_used(), 0);
        fifo.release(None);
    }

    /// A push followed by a pull restores the level the FIFO started at.
    #[test]
    fn push_pull_restores_the_level(len in 1usize..=40) {
        let case = PROP_CASE.fetch_add(1, Ordering::Relaxed);
        let name = format!("/mediaproc_utest_prop_{case}_{}", std::process::id());
        let _ = nix::sys::mman::shm_unlink(name.as_str());
        let fifo = ShmFifo::create(&name, 64, FifoFlags::empty(), None).unwrap();

        fifo.push(&[0x5A], None).unwrap();
        let level_before = fifo.buffer_level();

        fifo.push(&vec![0xA5u8; len], None).unwrap();
        prop_assert_eq!(fifo.buffer_level(), level_before + len + size_of::<isize>());
        let elem = fifo.pull(None, None).unwrap();
        prop_assert_eq!(elem.len(), 1);

        // The first pull drains the probe frame pushed before measuring, so
        // pull once more and compare against an empty FIFO plus the frame.
        prop_assert_eq!(fifo.buffer_level(), len + size_of::<isize>());
        let elem = fifo.pull(None, None).unwrap();
        prop_assert_eq!(elem.len(), len);
        prop_assert_eq!(fifo.buffer_level(), 0);
        fifo.release(None);
    }
}
