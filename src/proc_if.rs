//! Processor interface descriptor.
//!
//! Each processor implementation registers one descriptor binding its name
//! and type to the callbacks the pipeline drives it through. The descriptor
//! is a plain value: duplicating it deep-copies the strings, comparing it
//! compares strings byte-wise and every callback by function-pointer
//! address.
//!
//! The two optional marshalling hooks customize how a logical element enters
//! and leaves a FIFO pool, which is what lets a FIFO transport media-frame
//! handles instead of raw bytes.

use std::any::Any;
use std::ffi::c_void;
use std::mem::size_of;
use std::ptr::fn_addr_eq;

use crate::frame::MediaFrame;
use crate::log_ctx::LogCtx;
use crate::log_ctx::loge;
use crate::shm::ShmFifo;
use crate::status::Status;

/// Opaque per-instance processor state produced by an [`OpenFxn`].
pub type ProcState = Box<dyn Any + Send>;

/// Instantiates the processor. `settings` is an opaque configuration string
/// this crate never interprets. Mandatory.
pub type OpenFxn = fn(proc_if: &ProcIf, settings: &str, log: Option<&LogCtx>) -> Option<ProcState>;

/// Releases a processor instance. Mandatory.
pub type CloseFxn = fn(state: ProcState);

/// Applies new settings to a running processor. Optional.
pub type PutFxn = fn(state: &mut (dyn Any + Send), settings: &str) -> Status;

/// Returns the processor's representational state as a string. Optional.
pub type GetFxn = fn(state: &(dyn Any + Send)) -> Result<String, Status>;

/// Processes one frame: reads from the input FIFO, writes any produced
/// frame to the output FIFO. Mandatory.
pub type ProcessFrameFxn = fn(
    state: &mut (dyn Any + Send),
    input: &ShmFifo,
    output: &ShmFifo,
    log: Option<&LogCtx>,
) -> Status;

/// Processor-specific option request, selected by `tag`. Optional.
pub type OptFxn = fn(state: &mut (dyn Any + Send), tag: &str, arg: &mut dyn Any) -> Status;

/// Marshals the element at `src` into the `dst` frame bytes about to enter
/// a FIFO pool. Returns `None` on failure, in which case nothing is pushed.
///
/// # Safety
///
/// `src` and `opaque` carry whatever contract the concrete hook documents.
pub type EnqueueFxn = unsafe fn(
    opaque: *mut c_void,
    dst: &mut [u8],
    src: *const c_void,
    log: Option<&LogCtx>,
) -> Option<()>;

/// Recovers an owned element from the `src` frame bytes just pulled out of
/// a FIFO pool, returning it with its size.
///
/// # Safety
///
/// `opaque` carries whatever contract the concrete hook documents; the
/// caller takes over the returned ownership.
pub type DequeueFxn = unsafe fn(
    opaque: *mut c_void,
    src: &[u8],
    log: Option<&LogCtx>,
) -> Result<(*mut c_void, usize), Status>;

macro_rules! opt_fn_eq {
    ($a:expr, $b:expr) => {
        match (&$a, &$b) {
            (Some(a), Some(b)) => fn_addr_eq(*a, *b),
            (None, None) => true,
            _ => false,
        }
    };
}

/// Processor interface descriptor.
///
/// Built with [`ProcIf::new`] from the three mandatory callbacks; the
/// optional ones are attached with the `with_*` builders. `Clone` produces
/// an independent deep copy.
#[derive(Clone, Debug)]
pub struct ProcIf {
    name: String,
    kind: String,
    open: OpenFxn,
    close: CloseFxn,
    put: Option<PutFxn>,
    get: Option<GetFxn>,
    process_frame: ProcessFrameFxn,
    opt: Option<OptFxn>,
    ififo_hook: Option<DequeueFxn>,
    ofifo_hook: Option<EnqueueFxn>,
}

impl ProcIf {
    /// Creates a descriptor from the unambiguous processor `name`, its
    /// `kind` and the mandatory callbacks.
    pub fn new(
        name: &str,
        kind: &str,
        open: OpenFxn,
        close: CloseFxn,
        process_frame: ProcessFrameFxn,
    ) -> Self {
        Self {
            name: name.to_owned(),
            kind: kind.to_owned(),
            open,
            close,
            put: None,
            get: None,
            process_frame,
            opt: None,
            ififo_hook: None,
            ofifo_hook: None,
        }
    }

    /// Attaches the optional settings-update callback.
    pub fn with_put(mut self, put: PutFxn) -> Self {
        self.put = Some(put);
        self
    }

    /// Attaches the optional state-query callback.
    pub fn with_get(mut self, get: GetFxn) -> Self {
        self.get = Some(get);
        self
    }

    /// Attaches the optional option-request callback.
    pub fn with_opt(mut self, opt: OptFxn) -> Self {
        self.opt = Some(opt);
        self
    }

    /// Attaches the hook that dequeues logical elements from the input
    /// FIFO. Without it the processor consumes raw byte frames.
    pub fn with_ififo_hook(mut self, hook: DequeueFxn) -> Self {
        self.ififo_hook = Some(hook);
        self
    }

    /// Attaches the hook that enqueues logical elements into the output
    /// FIFO. Without it the processor produces raw byte frames.
    pub fn with_ofifo_hook(mut self, hook: EnqueueFxn) -> Self {
        self.ofifo_hook = Some(hook);
        self
    }

    /// Unambiguous processor identifier name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Processor type.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// The mandatory instantiation callback.
    pub fn open(&self) -> OpenFxn {
        self.open
    }

    /// The mandatory release callback.
    pub fn close(&self) -> CloseFxn {
        self.close
    }

    /// The optional settings-update callback.
    pub fn put(&self) -> Option<PutFxn> {
        self.put
    }

    /// The optional state-query callback.
    pub fn get(&self) -> Option<GetFxn> {
        self.get
    }

    /// The mandatory frame-processing callback.
    pub fn process_frame(&self) -> ProcessFrameFxn {
        self.process_frame
    }

    /// The optional option-request callback.
    pub fn opt(&self) -> Option<OptFxn> {
        self.opt
    }

    /// The optional input-FIFO dequeue hook.
    pub fn ififo_hook(&self) -> Option<DequeueFxn> {
        self.ififo_hook
    }

    /// The optional output-FIFO enqueue hook.
    pub fn ofifo_hook(&self) -> Option<EnqueueFxn> {
        self.ofifo_hook
    }
}

impl PartialEq for ProcIf {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.kind == other.kind
            && fn_addr_eq(self.open, other.open)
            && fn_addr_eq(self.close, other.close)
            && opt_fn_eq!(self.put, other.put)
            && opt_fn_eq!(self.get, other.get)
            && fn_addr_eq(self.process_frame, other.process_frame)
            && opt_fn_eq!(self.opt, other.opt)
            && opt_fn_eq!(self.ififo_hook, other.ififo_hook)
            && opt_fn_eq!(self.ofifo_hook, other.ofifo_hook)
    }
}

impl Eq for ProcIf {}

/// Default output-FIFO hook: deep-copies the [`MediaFrame`] at `src` and
/// ships the duplicate's address through the pool.
///
/// This is the single-process fast path: a peer in another address space
/// cannot dereference the shipped address. Cross-process transport uses the
/// plain byte-copy path (no hooks) or an arena scheme layered above this
/// crate.
///
/// # Safety
///
/// `src` must point to a live [`MediaFrame`] and `dst` must be exactly one
/// pointer wide. The receiving side must reclaim the duplicate with
/// [`reclaim_frame_handle`] or it leaks.
pub unsafe fn enqueue_frame_default(
    _opaque: *mut c_void,
    dst: &mut [u8],
    src: *const c_void,
    log: Option<&LogCtx>,
) -> Option<()> {
    if dst.len() != size_of::<usize>() || src.is_null() {
        loge!(log, "frame handle slot has the wrong width");
        return None;
    }
    // SAFETY: caller guarantees `src` points to a live frame.
    let frame = unsafe { &*src.cast::<MediaFrame>() };
    let duplicate = Box::new(frame.clone());
    dst.copy_from_slice(&(Box::into_raw(duplicate) as usize).to_ne_bytes());
    Some(())
}

/// Default input-FIFO hook: recovers the frame handle shipped by
/// [`enqueue_frame_default`]. The receiver owns the frame and reclaims it
/// with [`reclaim_frame_handle`].
///
/// # Safety
///
/// `src` must hold an address produced by [`enqueue_frame_default`] in this
/// process.
pub unsafe fn dequeue_frame_default(
    _opaque: *mut c_void,
    src: &[u8],
    log: Option<&LogCtx>,
) -> Result<(*mut c_void, usize), Status> {
    let Ok(raw) = <[u8; size_of::<usize>()]>::try_from(src) else {
        loge!(log, "dequeued element is not a frame handle");
        return Err(Status::Error);
    };
    let addr = usize::from_ne_bytes(raw);
    if addr == 0 {
        loge!(log, "dequeued a null frame handle");
        return Err(Status::Error);
    }
    Ok((addr as *mut c_void, src.len()))
}

/// Takes back ownership of a frame shipped through a FIFO by
/// [`enqueue_frame_default`].
///
/// # Safety
///
/// `handle` must come from [`dequeue_frame_default`] in the same process and
/// must not be reclaimed twice.
pub unsafe fn reclaim_frame_handle(handle: *mut c_void) -> Box<MediaFrame> {
    // SAFETY: caller guarantees the handle originates from `Box::into_raw`
    // in `enqueue_frame_default`.
    unsafe { Box::from_raw(handle.cast::<MediaFrame>()) }
}
