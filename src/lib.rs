//! Cross-process media FIFO toolkit.
//!
//! The transport core of a media-processing pipeline: a named,
//! blocking/non-blocking ring buffer living in a POSIX shared-memory
//! segment, plus the processor-interface descriptor through which the
//! pipeline attaches concrete processors to it. Synchronization is embedded
//! in the shared segment itself (a process-shared mutex and two condition
//! variables bound to the monotonic clock), so producers and consumers in
//! different address spaces coordinate without an intermediate daemon.
//!
//! A producer [`push`](ShmFifo::push)es variable-size byte frames; the FIFO
//! stores them size-prefixed in a single circular pool, splitting across the
//! wrap point when needed. A consumer [`pull`](ShmFifo::pull)s them back in
//! order, each as a fresh owned buffer, optionally with a deadline on the
//! monotonic clock. Every operation reports through the closed [`Status`]
//! taxonomy and traces through an optional [`LogCtx`].

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub use crate::frame::MediaFrame;
pub use crate::frame::Plane;
pub use crate::log_ctx::ExtTraceFxn;
pub use crate::log_ctx::Level;
pub use crate::log_ctx::LogCtx;
pub use crate::log_ctx::OpaqueLoggerData;
pub use crate::proc_if::CloseFxn;
pub use crate::proc_if::DequeueFxn;
pub use crate::proc_if::EnqueueFxn;
pub use crate::proc_if::GetFxn;
pub use crate::proc_if::OpenFxn;
pub use crate::proc_if::OptFxn;
pub use crate::proc_if::ProcIf;
pub use crate::proc_if::ProcState;
pub use crate::proc_if::ProcessFrameFxn;
pub use crate::proc_if::PutFxn;
pub use crate::proc_if::dequeue_frame_default;
pub use crate::proc_if::enqueue_frame_default;
pub use crate::proc_if::reclaim_frame_handle;
pub use crate::shm::FifoFlags;
pub use crate::shm::SHM_NAME_MAX;
pub use crate::shm::ShmFifo;
pub use crate::status::Status;
pub use crate::time::ClockGettimeFxn;
pub use crate::time::MonotonicClock;

mod frame;
mod log_ctx;
mod proc_if;
mod shm;
mod status;
mod time;
