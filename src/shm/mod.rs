//! Named, cross-process FIFO over a POSIX shared-memory segment.
//!
//! One process creates a FIFO by name; any number of peers open it and
//! exchange variable-size byte frames through a single circular pool. The
//! synchronization objects live inside the shared segment itself (a
//! process-shared mutex and two condition variables bound to the monotonic
//! clock), so producers and consumers in different address spaces coordinate
//! without an intermediate daemon.
//!
//! Frames are stored size-prefixed and adjacent; the frame at the tail may
//! wrap across the physical end of the pool. Pulled frames are copied into a
//! fresh owned buffer, so a consumer never borrows pool memory.

mod layout;
mod sync;

use std::cell::UnsafeCell;
use std::ffi::c_void;
use std::mem::MaybeUninit;
use std::mem::size_of;
use std::num::NonZeroUsize;
use std::os::fd::AsRawFd;
use std::os::fd::OwnedFd;
use std::ptr;
use std::ptr::NonNull;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;

use nix::fcntl::OFlag;
use nix::sys::mman::MapFlags;
use nix::sys::mman::ProtFlags;
use nix::sys::mman::mmap;
use nix::sys::mman::munmap;
use nix::sys::mman::shm_open;
use nix::sys::mman::shm_unlink;
use nix::sys::stat::Mode;
use nix::unistd::ftruncate;
use smallvec::SmallVec;
use zerocopy::FromBytes;
use zerocopy::IntoBytes;

pub use self::layout::FifoFlags;
pub use self::layout::SHM_NAME_MAX;
use self::layout::FrameHeader;
use self::layout::READY_MAGIC;
use self::layout::ShmHeader;
use self::layout::framed_size;
use self::sync::SegmentMutexGuard;
use self::sync::WaitOutcome;
use self::sync::broadcast;
use self::sync::deadline_after;
use self::sync::destroy_cond;
use self::sync::destroy_mutex;
use self::sync::init_shared_monotonic_cond;
use self::sync::init_shared_mutex;
use crate::log_ctx::LogCtx;
use crate::log_ctx::logd;
use crate::log_ctx::loge;
use crate::log_ctx::logw;
use crate::proc_if::DequeueFxn;
use crate::proc_if::EnqueueFxn;
use crate::status::Status;
use crate::time::MonotonicClock;

/// Staging buffer for one framed element; frames up to a typical message
/// size assemble without touching the heap.
type FrameBuf = SmallVec<[u8; 64]>;

/// How often and how long `open` polls for a segment still being created.
const OPEN_READY_MAX_TRIES: u32 = 50;
const OPEN_READY_BACKOFF: Duration = Duration::from_millis(2);

/// Which side of the FIFO this handle represents.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Role {
    /// Created the segment; tears it down and unlinks the name on drop.
    Creator,
    /// Opened an existing segment; only unmaps on drop.
    Opener,
}

/// A named FIFO living in a POSIX shared-memory segment.
///
/// Created by one process with [`ShmFifo::create`] and opened by peers with
/// [`ShmFifo::open`]. All operations are safe to call from multiple threads
/// and processes concurrently; the segment's own mutex serializes them.
///
/// Dropping a creator handle releases the FIFO (unblocks waiters, destroys
/// the sync objects, unlinks the name); dropping an opener handle just
/// unmaps. The explicit [`release`](Self::release) and
/// [`close`](Self::close) methods do the same with a log context in hand.
#[derive(Debug)]
pub struct ShmFifo {
    header: NonNull<ShmHeader>,
    map_len: usize,
    role: Role,
    clock: MonotonicClock,
    released: bool,
}

// SAFETY: the handle is only a pointer into the mapped segment; every access
// to shared mutable state goes through the segment's process-shared mutex,
// and the hint fields are atomics.
unsafe impl Send for ShmFifo {}
unsafe impl Sync for ShmFifo {}

impl ShmFifo {
    /// Creates a new shared-memory FIFO.
    ///
    /// The name must be a `/`-prefixed POSIX shared-memory object name of at
    /// most [`SHM_NAME_MAX`] bytes, and must not already exist. `pool_size`
    /// is the number of bytes available for framed payloads; a single frame
    /// can never exceed it. The object is created with owner read/write
    /// permissions.
    pub fn create(
        name: &str,
        pool_size: usize,
        flags: FifoFlags,
        log: Option<&LogCtx>,
    ) -> Result<ShmFifo, Status> {
        if name.is_empty() || pool_size == 0 {
            loge!(log, "a FIFO needs a non-empty name and a non-zero pool");
            return Err(Status::InvalidArg);
        }
        if name.len() > SHM_NAME_MAX {
            loge!(
                log,
                "maximum FIFO name length exceeded; the name is limited to {SHM_NAME_MAX} characters"
            );
            return Err(Status::InvalidArg);
        }

        // O_CREAT|O_EXCL makes the existence check and the creation atomic.
        let fd = match shm_open(
            name,
            OFlag::O_CREAT | OFlag::O_EXCL | OFlag::O_RDWR,
            Mode::S_IRUSR | Mode::S_IWUSR,
        ) {
            Ok(fd) => fd,
            Err(nix::errno::Errno::EEXIST) => {
                loge!(log, "trying to create an SHM-FIFO that already exists: '{name}'");
                return Err(Status::Error);
            }
            Err(errno) => {
                loge!(log, "could not create SHM-FIFO '{name}' (errno {errno})");
                return Err(Status::Error);
            }
        };

        let map_len = size_of::<ShmHeader>() + pool_size;
        // Resizing a brand-new object zero-fills it, so counters, indices
        // and the pool all start cleared.
        if let Err(errno) = ftruncate(&fd, map_len as libc::off_t) {
            loge!(log, "could not size SHM-FIFO '{name}' (errno {errno})");
            let _ = shm_unlink(name);
            return Err(Status::Error);
        }

        let base = match Self::map_segment(&fd, map_len) {
            Ok(base) => base,
            Err(status) => {
                loge!(log, "could not map SHM-FIFO '{name}'");
                let _ = shm_unlink(name);
                return Err(status);
            }
        };
        let header = base.cast::<ShmHeader>();

        // SAFETY: the mapping is fresh and private to this thread until the
        // ready magic is published below.
        let init_result = unsafe { Self::init_header(header, name, pool_size, flags, log) };
        if let Err(status) = init_result {
            loge!(log, "could not initialize SHM-FIFO '{name}'");
            unsafe { Self::teardown_segment(header, map_len) };
            return Err(status);
        }
        drop(fd); // the descriptor is not needed once mapped

        logd!(log, "FIFO '{name}' created with a pool of {pool_size} bytes");
        Ok(ShmFifo {
            header,
            map_len,
            role: Role::Creator,
            clock: MonotonicClock::default(),
            released: false,
        })
    }

    /// Opens an existing shared-memory FIFO by name.
    ///
    /// If the creator is still mid-construction, waits with a bounded
    /// backoff until the segment publishes its ready marker, then maps the
    /// header to learn the pool size and remaps the full segment.
    pub fn open(name: &str, log: Option<&LogCtx>) -> Result<ShmFifo, Status> {
        if name.is_empty() || name.len() > SHM_NAME_MAX {
            loge!(log, "invalid FIFO name");
            return Err(Status::InvalidArg);
        }

        let fd = match shm_open(name, OFlag::O_RDWR, Mode::S_IRUSR | Mode::S_IWUSR) {
            Ok(fd) => fd,
            Err(errno) => {
                loge!(log, "could not open SHM-FIFO '{name}' (errno {errno})");
                return Err(Status::from(errno));
            }
        };

        let header_len = size_of::<ShmHeader>();
        let mut published_pool_size = None;
        for attempt in 0..OPEN_READY_MAX_TRIES {
            if Self::object_size(&fd)? >= header_len as u64 {
                let probe = Self::map_segment(&fd, header_len)?;
                let probe_header = probe.cast::<ShmHeader>();
                // SAFETY: the probe mapping covers the whole header.
                let (is_ready, pool_size) = unsafe {
                    let h = probe_header.as_ref();
                    (h.ready.load(Ordering::Acquire) == READY_MAGIC, h.pool_size)
                };
                // SAFETY: `probe` is an active mapping of `header_len` bytes.
                if let Err(errno) = unsafe { munmap(probe, header_len) } {
                    loge!(log, "could not unmap SHM-FIFO '{name}' header probe (errno {errno})");
                    return Err(Status::Error);
                }
                if is_ready {
                    published_pool_size = Some(pool_size);
                    break;
                }
            }
            thread::sleep(OPEN_READY_BACKOFF * (attempt + 1));
        }
        let Some(pool_size) = published_pool_size else {
            loge!(log, "SHM-FIFO '{name}' did not become ready in time");
            return Err(Status::TimedOut);
        };
        if pool_size == 0 {
            loge!(log, "SHM-FIFO '{name}' advertises an empty pool; segment is corrupted");
            return Err(Status::Error);
        }

        let map_len = header_len + pool_size;
        let base = Self::map_segment(&fd, map_len)?;
        logd!(log, "opened FIFO '{name}' with a pool of {pool_size} bytes");
        Ok(ShmFifo {
            header: base.cast(),
            map_len,
            role: Role::Opener,
            clock: MonotonicClock::default(),
            released: false,
        })
    }

    /// Releases the FIFO: unblocks every waiter in every process, destroys
    /// the synchronization objects, unmaps the segment and unlinks the name.
    ///
    /// This is the only operation that unlinks. Any holder may call it, but
    /// only one should; a second unlink is reported and otherwise ignored.
    pub fn release(mut self, log: Option<&LogCtx>) {
        let name = self.name().to_owned();
        // SAFETY: consumes the handle; the mapping is valid until here.
        unsafe { Self::teardown_segment(self.header, self.map_len) };
        self.released = true;
        logd!(log, "release of FIFO '{name}' completed");
    }

    /// Unmaps the segment without touching the shared state. The FIFO keeps
    /// existing for other processes until its creator releases it.
    pub fn close(mut self, log: Option<&LogCtx>) {
        logd!(log, "closing FIFO '{}'", self.name());
        // SAFETY: consumes the handle; the mapping is valid until here.
        unsafe { self.unmap() };
        self.released = true;
    }

    /// Switches the FIFO between blocking and non-blocking mode and wakes
    /// every waiter so it re-evaluates its predicate under the new mode.
    pub fn set_blocking_mode(&self, blocking: bool, _log: Option<&LogCtx>) {
        let h = self.header();
        let guard = SegmentMutexGuard::lock(&h.api_mutex);
        let mut flags = h.flags();
        flags.set(FifoFlags::NONBLOCK, !blocking);
        h.flags.store(flags.bits(), Ordering::Relaxed);
        broadcast(&h.put_signal);
        broadcast(&h.get_signal);
        drop(guard);
    }

    /// Pushes one frame into the FIFO.
    ///
    /// A frame whose framed size (payload plus size field) exceeds the pool
    /// fails with `Error`. When the pool is too full, a blocking FIFO waits
    /// for consumers; a non-blocking one fails with `NoMem`.
    pub fn push(&self, elem: &[u8], log: Option<&LogCtx>) -> Result<(), Status> {
        if elem.is_empty() {
            loge!(log, "cannot push an empty element");
            return Err(Status::Error);
        }
        let h = self.header();
        let pool_size = h.pool_size;
        let framed = framed_size(elem.len());
        if framed > pool_size {
            loge!(
                log,
                "input element size can not exceed the FIFO overall pool size ({pool_size} bytes)"
            );
            return Err(Status::Error);
        }

        logd!(
            log,
            "push: {} (size field) + {} (payload) = {} framed bytes",
            size_of::<FrameHeader>(),
            elem.len(),
            framed
        );

        let guard = SegmentMutexGuard::lock(&h.api_mutex);

        // Blocking mode waits until consumers free enough room; the extra
        // broadcast wakes any peer about to give up on its own wait.
        loop {
            let level = self.buf_level(&guard) as usize;
            if level + framed <= pool_size
                || h.flags().contains(FifoFlags::NONBLOCK)
                || h.exiting()
            {
                break;
            }
            logw!(log, "SHM-FIFO buffer '{}' overflow", h.name_str());
            broadcast(&h.put_signal);
            guard.wait(&h.get_signal)?;
        }
        if self.buf_level(&guard) as usize + framed > pool_size {
            if h.flags().contains(FifoFlags::NONBLOCK) {
                logw!(log, "SHM-FIFO buffer '{}' overflow", h.name_str());
                return Err(Status::NoMem);
            }
            // Woken by teardown with the frame still not fitting.
            logd!(log, "push unblocked by FIFO teardown");
            return Err(Status::Interrupted);
        }

        let input_idx = self.input_idx(&guard);
        let frame_header = FrameHeader {
            size: elem.len() as isize,
        };
        if input_idx + framed > pool_size {
            // The frame straddles the pool end: assemble it contiguously,
            // then copy the two fragments.
            let mut staged = FrameBuf::with_capacity(framed);
            staged.extend_from_slice(frame_header.as_bytes());
            staged.extend_from_slice(elem);
            // SAFETY: the guard is held and `input_idx < pool_size`.
            unsafe { self.pool_write(input_idx, &staged) };
        } else {
            if h.flags().contains(FifoFlags::EXHAUST_CTRL) {
                let mut slot = [0u8; size_of::<FrameHeader>()];
                // SAFETY: the guard is held and the slot fits contiguously.
                unsafe { self.pool_read(input_idx, &mut slot) };
                let stale = FrameHeader::read_from_bytes(&slot).map_err(|_| Status::Error)?;
                if stale.size != 0 {
                    loge!(
                        log,
                        "size slot at pool byte {input_idx} of '{}' is not clear; FIFO state is corrupted",
                        h.name_str()
                    );
                    return Err(Status::Error);
                }
            }
            // SAFETY: the guard is held and both writes fit contiguously.
            unsafe {
                self.pool_write(input_idx, frame_header.as_bytes());
                self.pool_write(input_idx + size_of::<FrameHeader>(), elem);
            }
        }

        // SAFETY: the guard is held.
        unsafe {
            *h.slots_used.get() += 1;
            *h.buf_level.get() += framed as isize;
            *h.input_idx.get() = (input_idx + framed) % pool_size;
        }
        logd!(log, "pushed; buffer level is now {}", self.buf_level(&guard));
        broadcast(&h.put_signal);
        Ok(())
    }

    /// Pulls one frame out of the FIFO into a freshly allocated buffer the
    /// caller owns.
    ///
    /// On an empty FIFO a non-blocking pull fails with `Again`; a blocking
    /// pull waits for a producer, up to `timeout` if one is given (`None`
    /// waits indefinitely). An expired deadline fails with `TimedOut` and
    /// consumes nothing.
    pub fn pull(&self, timeout: Option<Duration>, log: Option<&LogCtx>) -> Result<Vec<u8>, Status> {
        let h = self.header();
        let pool_size = h.pool_size;

        let guard = SegmentMutexGuard::lock(&h.api_mutex);

        // Absolute deadline on the monotonic clock, the same time base the
        // condition variables are bound to.
        let deadline = match timeout {
            Some(timeout) => Some(deadline_after(&self.clock, timeout).ok_or(Status::Error)?),
            None => None,
        };

        loop {
            if self.buf_level(&guard) > 0
                || h.flags().contains(FifoFlags::NONBLOCK)
                || h.exiting()
            {
                break;
            }
            logd!(log, "SHM-FIFO buffer '{}' underrun", h.name_str());
            broadcast(&h.get_signal);
            match &deadline {
                Some(deadline) => {
                    if guard.wait_deadline(&h.put_signal, deadline)? == WaitOutcome::TimedOut {
                        logw!(log, "FIFO pulling timed out on an empty buffer");
                        return Err(Status::TimedOut);
                    }
                }
                None => guard.wait(&h.put_signal)?,
            }
        }
        if self.buf_level(&guard) <= 0 {
            if h.flags().contains(FifoFlags::NONBLOCK) {
                logd!(log, "SHM-FIFO buffer '{}' underrun", h.name_str());
                return Err(Status::Again);
            }
            // Woken by teardown with the buffer still empty.
            logd!(log, "pull unblocked by FIFO teardown");
            return Err(Status::Interrupted);
        }

        let output_idx = self.output_idx(&guard);

        // The size field may itself straddle the wrap point; reassemble it
        // before trusting it.
        let mut header_buf = [0u8; size_of::<FrameHeader>()];
        // SAFETY: the guard is held and `output_idx < pool_size`.
        unsafe { self.pool_read(output_idx, &mut header_buf) };
        let frame_header = FrameHeader::read_from_bytes(&header_buf).map_err(|_| Status::Error)?;
        if frame_header.size <= 0 {
            loge!(
                log,
                "decoded a non-positive frame size at pool byte {output_idx} of '{}'; pool is corrupted",
                h.name_str()
            );
            return Err(Status::Error);
        }
        let payload_len = frame_header.size as usize;
        let framed = framed_size(payload_len);
        if framed > pool_size {
            loge!(
                log,
                "decoded frame size {payload_len} exceeds the pool of '{}'; pool is corrupted",
                h.name_str()
            );
            return Err(Status::Error);
        }

        let mut elem = vec![0u8; payload_len];
        // SAFETY: the guard is held; the start offset is reduced modulo the
        // pool and `framed <= pool_size` bounds the read.
        unsafe {
            self.pool_read((output_idx + size_of::<FrameHeader>()) % pool_size, &mut elem);
        }

        if h.flags().contains(FifoFlags::EXHAUST_CTRL) {
            // Flush the consumed frame so stale data is never observable.
            // SAFETY: the guard is held and the region is the decoded frame.
            unsafe { self.pool_zero(output_idx, framed) };
        }

        // SAFETY: the guard is held.
        unsafe {
            *h.slots_used.get() -= 1;
            *h.buf_level.get() -= framed as isize;
            *h.output_idx.get() = (output_idx + framed) % pool_size;
        }
        broadcast(&h.get_signal);
        logd!(
            log,
            "pulled {payload_len} bytes; buffer level is now {}",
            self.buf_level(&guard)
        );
        Ok(elem)
    }

    /// Discards every enqueued frame, zeroes the pool and resets the ring
    /// indices. Waiting producers are woken; there is nothing to wake
    /// consumers for.
    pub fn empty(&self, log: Option<&LogCtx>) {
        let h = self.header();
        let guard = SegmentMutexGuard::lock(&h.api_mutex);
        // SAFETY: the guard is held.
        unsafe {
            self.pool_zero(0, h.pool_size);
            *h.slots_used.get() = 0;
            *h.buf_level.get() = 0;
            *h.input_idx.get() = 0;
            *h.output_idx.get() = 0;
        }
        broadcast(&h.get_signal);
        logd!(log, "FIFO '{}' emptied", h.name_str());
        drop(guard);
    }

    /// Bytes currently occupied by enqueued frames, including their size
    /// fields.
    pub fn buffer_level(&self) -> usize {
        let h = self.header();
        let guard = SegmentMutexGuard::lock(&h.api_mutex);
        self.buf_level(&guard) as usize
    }

    /// Number of frames currently enqueued.
    pub fn slots_used(&self) -> usize {
        let h = self.header();
        let guard = SegmentMutexGuard::lock(&h.api_mutex);
        // SAFETY: the guard is held.
        (unsafe { *h.slots_used.get() }) as usize
    }

    /// The FIFO name the segment was created with.
    pub fn name(&self) -> &str {
        self.header().name_str()
    }

    /// Pool bytes available for framed payloads.
    pub fn pool_size(&self) -> usize {
        self.header().pool_size
    }

    /// Current behavior flags.
    pub fn flags(&self) -> FifoFlags {
        self.header().flags()
    }

    /// Replaces the clock used for pull deadlines. Intended for tests that
    /// need to inject clock failures or frozen time.
    pub fn set_clock(&mut self, clock: MonotonicClock) {
        self.clock = clock;
    }

    /// Pushes one logical element, letting `enqueue` marshal it into the
    /// frame bytes. This is the entry the processor interface uses when a
    /// descriptor carries an output-FIFO hook.
    ///
    /// # Safety
    ///
    /// `src` and `opaque` must satisfy the contract of `enqueue`; for the
    /// default hooks `src` must point to a live
    /// [`MediaFrame`](crate::MediaFrame).
    pub unsafe fn push_with(
        &self,
        src: *const c_void,
        size: usize,
        enqueue: EnqueueFxn,
        opaque: *mut c_void,
        log: Option<&LogCtx>,
    ) -> Result<(), Status> {
        if src.is_null() || size == 0 {
            loge!(log, "cannot marshal a null or empty element");
            return Err(Status::InvalidArg);
        }
        let mut staged = vec![0u8; size];
        // SAFETY: forwarded caller contract.
        unsafe { enqueue(opaque, &mut staged, src, log) }.ok_or(Status::Error)?;
        self.push(&staged, log)
    }

    /// Pulls one logical element, letting `dequeue` recover it from the
    /// frame bytes. Counterpart of [`push_with`](Self::push_with) for
    /// descriptors carrying an input-FIFO hook.
    ///
    /// # Safety
    ///
    /// `opaque` must satisfy the contract of `dequeue`, and the caller takes
    /// over whatever ownership the hook's return value represents.
    pub unsafe fn pull_with(
        &self,
        dequeue: DequeueFxn,
        opaque: *mut c_void,
        timeout: Option<Duration>,
        log: Option<&LogCtx>,
    ) -> Result<(*mut c_void, usize), Status> {
        let elem = self.pull(timeout, log)?;
        // SAFETY: forwarded caller contract.
        unsafe { dequeue(opaque, &elem, log) }
    }

    fn header(&self) -> &ShmHeader {
        // SAFETY: the mapping lives as long as the handle.
        unsafe { self.header.as_ref() }
    }

    /// First pool byte, right after the header.
    fn pool(&self) -> *mut u8 {
        // SAFETY: in-bounds pointer arithmetic within the mapping.
        unsafe { self.header.as_ptr().add(1).cast::<u8>() }
    }

    fn buf_level(&self, _guard: &SegmentMutexGuard<'_>) -> isize {
        // SAFETY: the guard proves the segment mutex is held.
        unsafe { *self.header().buf_level.get() }
    }

    fn input_idx(&self, _guard: &SegmentMutexGuard<'_>) -> usize {
        // SAFETY: the guard proves the segment mutex is held.
        unsafe { *self.header().input_idx.get() }
    }

    fn output_idx(&self, _guard: &SegmentMutexGuard<'_>) -> usize {
        // SAFETY: the guard proves the segment mutex is held.
        unsafe { *self.header().output_idx.get() }
    }

    /// Copies `src` into the pool at byte `at`, wrapping at the pool end.
    ///
    /// # Safety
    ///
    /// The segment mutex must be held, `at < pool_size` and
    /// `src.len() <= pool_size`.
    unsafe fn pool_write(&self, at: usize, src: &[u8]) {
        let pool = self.pool();
        let first = src.len().min(self.header().pool_size - at);
        unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), pool.add(at), first);
            if first < src.len() {
                ptr::copy_nonoverlapping(src.as_ptr().add(first), pool, src.len() - first);
            }
        }
    }

    /// Copies pool bytes starting at `at` into `dst`, wrapping at the pool
    /// end.
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::pool_write`].
    unsafe fn pool_read(&self, at: usize, dst: &mut [u8]) {
        let pool = self.pool();
        let first = dst.len().min(self.header().pool_size - at);
        unsafe {
            ptr::copy_nonoverlapping(pool.add(at), dst.as_mut_ptr(), first);
            if first < dst.len() {
                ptr::copy_nonoverlapping(pool, dst.as_mut_ptr().add(first), dst.len() - first);
            }
        }
    }

    /// Zeroes `len` pool bytes starting at `at`, wrapping at the pool end.
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::pool_write`].
    unsafe fn pool_zero(&self, at: usize, len: usize) {
        let pool = self.pool();
        let first = len.min(self.header().pool_size - at);
        unsafe {
            ptr::write_bytes(pool.add(at), 0, first);
            if first < len {
                ptr::write_bytes(pool, 0, len - first);
            }
        }
    }

    /// Current size of the shared-memory object behind `fd`. A creator that
    /// has not reached its `ftruncate` yet reports zero.
    fn object_size(fd: &OwnedFd) -> Result<u64, Status> {
        let mut stat = MaybeUninit::<libc::stat>::uninit();
        // SAFETY: `stat` outlives the call and `fstat` only writes into it.
        let rc = unsafe { libc::fstat(fd.as_raw_fd(), stat.as_mut_ptr()) };
        if rc != 0 {
            return Err(Status::Error);
        }
        // SAFETY: `fstat` filled the buffer.
        Ok(unsafe { stat.assume_init() }.st_size as u64)
    }

    fn map_segment(fd: &OwnedFd, len: usize) -> Result<NonNull<c_void>, Status> {
        let len = NonZeroUsize::new(len).ok_or(Status::Error)?;
        // SAFETY: shared file-backed mapping with no placement constraints.
        unsafe {
            mmap(
                None,
                len,
                ProtFlags::PROT_READ | ProtFlags::PROT_WRITE,
                MapFlags::MAP_SHARED,
                fd,
                0,
            )
        }
        .map_err(Status::from)
    }

    /// Initializes the freshly mapped header and publishes the ready magic.
    ///
    /// # Safety
    ///
    /// `header` must be a fresh zero-filled mapping of at least
    /// `size_of::<ShmHeader>() + pool_size` bytes, not yet visible to any
    /// peer.
    unsafe fn init_header(
        header: NonNull<ShmHeader>,
        name: &str,
        pool_size: usize,
        flags: FifoFlags,
        log: Option<&LogCtx>,
    ) -> Result<(), Status> {
        let h = header.as_ptr();
        unsafe {
            ptr::copy_nonoverlapping(name.as_ptr(), (*h).name.as_mut_ptr(), name.len());
            (*h).flags = AtomicU32::new(flags.bits());
            (*h).pool_size = pool_size;

            init_shared_mutex(UnsafeCell::raw_get(&raw const (*h).api_mutex))?;
            (*h).api_mutex_init.store(1, Ordering::Relaxed);

            init_shared_monotonic_cond(UnsafeCell::raw_get(&raw const (*h).put_signal))?;
            (*h).put_signal_init.store(1, Ordering::Relaxed);

            init_shared_monotonic_cond(UnsafeCell::raw_get(&raw const (*h).get_signal))?;
            (*h).get_signal_init.store(1, Ordering::Relaxed);

            logd!(
                log,
                "exhaustive circular buffer checking mode {} on fifo '{name}'",
                if flags.contains(FifoFlags::EXHAUST_CTRL) { "on" } else { "off" }
            );

            (*h).ready.store(READY_MAGIC, Ordering::Release);
        }
        Ok(())
    }

    /// Full owner teardown: exit flag, wake every waiter, destroy whatever
    /// synchronization objects were initialized, unmap and unlink.
    ///
    /// Shutdown paths have no log context in hand (`Drop` takes none), so
    /// failures are reported through the `log` facade.
    ///
    /// # Safety
    ///
    /// `header` must be a live mapping of `map_len` bytes; no further access
    /// through it may happen afterwards.
    unsafe fn teardown_segment(header: NonNull<ShmHeader>, map_len: usize) {
        // SAFETY: the mapping is still valid here.
        let h = unsafe { header.as_ref() };
        let name = h.name_str().to_owned();
        let mutex_init = h.api_mutex_init.load(Ordering::Relaxed) != 0;
        let put_init = h.put_signal_init.load(Ordering::Relaxed) != 0;
        let get_init = h.get_signal_init.load(Ordering::Relaxed) != 0;

        // Unblock every waiter; each re-evaluates its predicate under the
        // lock, observes the exit flag and fails gracefully.
        h.exit_flag.store(1, Ordering::SeqCst);
        if mutex_init {
            let guard = SegmentMutexGuard::lock(&h.api_mutex);
            if put_init {
                broadcast(&h.put_signal);
            }
            if get_init {
                broadcast(&h.get_signal);
            }
            drop(guard);
        }

        if mutex_init {
            // SAFETY: waiters were woken above and hold the mutex only
            // transiently to observe the exit flag.
            if !unsafe { destroy_mutex(h.api_mutex.get()) } {
                log::warn!("could not destroy the API mutex of FIFO '{name}'");
            }
            h.api_mutex_init.store(0, Ordering::Relaxed);
        }
        if put_init {
            // SAFETY: as above.
            if !unsafe { destroy_cond(h.put_signal.get()) } {
                log::warn!("could not destroy the put signal of FIFO '{name}'");
            }
            h.put_signal_init.store(0, Ordering::Relaxed);
        }
        if get_init {
            // SAFETY: as above.
            if !unsafe { destroy_cond(h.get_signal.get()) } {
                log::warn!("could not destroy the get signal of FIFO '{name}'");
            }
            h.get_signal_init.store(0, Ordering::Relaxed);
        }

        // SAFETY: `header` is an active mapping of `map_len` bytes.
        if let Err(errno) = unsafe { munmap(header.cast(), map_len) } {
            log::error!("could not unmap FIFO '{name}' (errno {errno})");
        }
        if let Err(errno) = shm_unlink(name.as_str()) {
            log::warn!(
                "could not unlink FIFO '{name}' (errno {errno}); possibly already released by a peer"
            );
        }
    }

    /// # Safety
    ///
    /// No further access through the mapping may happen afterwards.
    unsafe fn unmap(&self) {
        // SAFETY: `header` is an active mapping of `map_len` bytes.
        if let Err(errno) = unsafe { munmap(self.header.cast(), self.map_len) } {
            log::error!("could not unmap FIFO segment (errno {errno})");
        }
    }
}

impl Drop for ShmFifo {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match self.role {
            // SAFETY: the handle is going away; nothing accesses the
            // mapping afterwards.
            Role::Creator => unsafe { Self::teardown_segment(self.header, self.map_len) },
            Role::Opener => unsafe { self.unmap() },
        }
    }
}
