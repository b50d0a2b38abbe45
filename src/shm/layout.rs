//! Binary layout of the shared segment.
//!
//! A FIFO maps as `[ShmHeader][pool bytes]`, contiguous, no padding between.
//! The header carries the synchronization objects and the ring bookkeeping;
//! the pool carries size-prefixed frames. This layout is the only
//! compatibility contract between producer and consumer processes, so every
//! type here is `repr(C)` and field order is ABI.

use std::cell::UnsafeCell;
use std::mem::size_of;
use std::str;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use bitflags::bitflags;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

/// Maximum FIFO name length, matching the POSIX `NAME_MAX` bound on
/// shared-memory object names.
pub const SHM_NAME_MAX: usize = 255;

/// Value of [`ShmHeader::ready`] once creation has fully completed.
/// Openers spin until they observe it, so a peer can never see a segment
/// whose size or sync objects are still being set up.
pub(crate) const READY_MAGIC: u32 = 0xcafe_f1f0;

bitflags! {
    /// Behavior flags of a shared-memory FIFO.
    ///
    /// Bit positions are ABI; future flags must preserve them.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct FifoFlags: u32 {
        /// Push and pull fail immediately (`NoMem`/`Again`) instead of
        /// blocking when the pool is full or empty.
        const NONBLOCK = 1 << 0;
        /// Exhaustive pool checking: pull zeroes the consumed frame bytes
        /// and push verifies its size slot reads as zero, so stale data is
        /// never observable and corruption is caught early.
        const EXHAUST_CTRL = 1 << 1;
    }
}

/// Wire header preceding every payload in the pool.
///
/// `size` is the platform's pointer-width signed type; all peers of one
/// segment are built for the same target, so the width matches by
/// construction. A frame occupies `size_of::<FrameHeader>() + size` pool
/// bytes and may straddle the wrap point.
#[derive(Clone, Copy, Debug, Eq, PartialEq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub(crate) struct FrameHeader {
    pub(crate) size: isize,
}

/// Number of pool bytes a frame of `payload_len` bytes occupies.
pub(crate) const fn framed_size(payload_len: usize) -> usize {
    size_of::<FrameHeader>() + payload_len
}

/// Segment header resident at offset 0 of the shared-memory object.
///
/// `flags` and `exit_flag` are read without the lock as hints; every
/// decision based on them is re-checked under `api_mutex`. All remaining
/// mutable fields are only ever touched with `api_mutex` held, which is what
/// makes the `UnsafeCell` accesses in the FIFO sound.
#[repr(C)]
pub(crate) struct ShmHeader {
    /// FIFO name, NUL-terminated inside a fixed buffer.
    pub(crate) name: [u8; SHM_NAME_MAX],
    /// `FifoFlags` bits.
    pub(crate) flags: AtomicU32,
    /// Non-zero once teardown has begun; blocking operations unblock and
    /// fail gracefully.
    pub(crate) exit_flag: AtomicI32,
    /// Pool bytes following this header. Set once before `ready` is
    /// published, immutable afterwards.
    pub(crate) pool_size: usize,
    /// Process-shared mutex guarding the pool and every mutable field.
    pub(crate) api_mutex: UnsafeCell<libc::pthread_mutex_t>,
    pub(crate) api_mutex_init: AtomicI32,
    /// Signalled after each successful push.
    pub(crate) put_signal: UnsafeCell<libc::pthread_cond_t>,
    pub(crate) put_signal_init: AtomicI32,
    /// Signalled after each successful pull.
    pub(crate) get_signal: UnsafeCell<libc::pthread_cond_t>,
    pub(crate) get_signal_init: AtomicI32,
    /// Frames currently enqueued.
    pub(crate) slots_used: UnsafeCell<isize>,
    /// Sum of framed sizes of all enqueued frames.
    pub(crate) buf_level: UnsafeCell<isize>,
    /// Pool byte offset where the next push starts writing.
    pub(crate) input_idx: UnsafeCell<usize>,
    /// Pool byte offset of the next frame to pull.
    pub(crate) output_idx: UnsafeCell<usize>,
    /// [`READY_MAGIC`] once creation has completed; stored last.
    pub(crate) ready: AtomicU32,
}

impl ShmHeader {
    /// The FIFO name as a string slice, up to the NUL terminator.
    pub(crate) fn name_str(&self) -> &str {
        let end = memchr::memchr(0, &self.name).unwrap_or(self.name.len());
        str::from_utf8(&self.name[..end]).unwrap_or("<non-utf8>")
    }

    /// Unlocked flag read; a hint only.
    pub(crate) fn flags(&self) -> FifoFlags {
        FifoFlags::from_bits_truncate(self.flags.load(Ordering::Relaxed))
    }

    /// Unlocked exit-flag read; a hint only.
    pub(crate) fn exiting(&self) -> bool {
        self.exit_flag.load(Ordering::Relaxed) != 0
    }
}
