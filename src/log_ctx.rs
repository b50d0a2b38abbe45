//! Trace context threaded through every API of the crate.
//!
//! The FIFO stays silent in production and chatty in tests without
//! recompilation: callers hand an optional [`LogCtx`] to each operation, and
//! the context either prints level-colored traces to stdout, or delegates to
//! an external callback together with an opaque user pointer.

use std::any::Any;
use std::fmt;
use std::io;
use std::io::Write;
use std::sync::Arc;

use num_enum::IntoPrimitive;
use num_enum::TryFromPrimitive;

/// Trace levels, ordered from chattiest to most severe.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, IntoPrimitive, TryFromPrimitive)]
#[repr(i32)]
pub enum Level {
    /// Normal progress traces.
    Debug = 0,
    /// Recoverable anomalies (overflow, underrun, double teardown).
    Warn,
    /// Fatal failures of the traced operation.
    Error,
}

/// ANSI terminal color per level; the `Debug` entry doubles as the reset.
const LEVEL_COLOR: [&str; 3] = ["\x1B[0m", "\x1B[33m", "\x1B[1;31m"];

/// Opaque user data handed back verbatim to an external trace callback.
pub type OpaqueLoggerData = Arc<dyn Any + Send + Sync>;

/// External trace callback.
///
/// Receives the opaque user data the context was created with, the call-site
/// coordinates, and the message as a [`fmt::Arguments`] payload that can be
/// formatted once into any sink.
pub type ExtTraceFxn = fn(
    opaque: Option<&(dyn Any + Send + Sync)>,
    level: Level,
    file: &str,
    line: u32,
    func: &str,
    args: fmt::Arguments<'_>,
);

/// A logging context.
///
/// Cloning is cheap (the user data is reference-counted); dropping the last
/// clone releases the user data.
#[derive(Clone)]
pub struct LogCtx {
    opaque: Option<OpaqueLoggerData>,
    ext_trace: Option<ExtTraceFxn>,
}

impl LogCtx {
    /// Creates a context with optional user data and an optional external
    /// trace callback. Without a callback, traces go to stdout.
    pub fn new(opaque: Option<OpaqueLoggerData>, ext_trace: Option<ExtTraceFxn>) -> Self {
        Self { opaque, ext_trace }
    }

    /// Creates a context that prints level-colored traces to stdout.
    pub fn stdout() -> Self {
        Self::new(None, None)
    }

    /// Creates a context whose callback forwards every trace into the `log`
    /// facade, so binaries can route the crate through `env_logger` or any
    /// other `log` backend.
    pub fn forwarding_to_log() -> Self {
        Self::new(None, Some(facade_trace))
    }

    /// Emits one trace line.
    ///
    /// With no callback configured the line is printed to stdout as
    /// `<color><file>-<line>: <message><reset>` and flushed; otherwise the
    /// callback receives the raw pieces and formats them itself.
    pub fn trace(&self, level: Level, file: &str, line: u32, func: &str, args: fmt::Arguments<'_>) {
        match self.ext_trace {
            Some(ext_trace) => ext_trace(self.opaque.as_deref(), level, file, line, func, args),
            None => {
                let mut out = io::stdout().lock();
                let _ = writeln!(
                    out,
                    "{}{}-{}: {}{}",
                    LEVEL_COLOR[level as usize],
                    file,
                    line,
                    args,
                    LEVEL_COLOR[Level::Debug as usize],
                );
                let _ = out.flush();
            }
        }
    }
}

impl fmt::Debug for LogCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogCtx")
            .field("opaque", &self.opaque.is_some())
            .field("ext_trace", &self.ext_trace.map(|fxn| fxn as usize))
            .finish()
    }
}

fn facade_trace(
    _opaque: Option<&(dyn Any + Send + Sync)>,
    level: Level,
    file: &str,
    line: u32,
    _func: &str,
    args: fmt::Arguments<'_>,
) {
    match level {
        Level::Debug => log::debug!("{file}-{line}: {args}"),
        Level::Warn => log::warn!("{file}-{line}: {args}"),
        Level::Error => log::error!("{file}-{line}: {args}"),
    }
}

/// Forwards to [`LogCtx::trace`] when a context is present; the null context
/// discards the trace.
pub(crate) fn trace_opt(
    log: Option<&LogCtx>,
    level: Level,
    file: &str,
    line: u32,
    func: &str,
    args: fmt::Arguments<'_>,
) {
    if let Some(log_ctx) = log {
        log_ctx.trace(level, file, line, func, args);
    }
}

macro_rules! logd {
    ($log:expr, $($arg:tt)+) => {
        $crate::log_ctx::trace_opt(
            $log,
            $crate::log_ctx::Level::Debug,
            file!(),
            line!(),
            module_path!(),
            format_args!($($arg)+),
        )
    };
}

macro_rules! logw {
    ($log:expr, $($arg:tt)+) => {
        $crate::log_ctx::trace_opt(
            $log,
            $crate::log_ctx::Level::Warn,
            file!(),
            line!(),
            module_path!(),
            format_args!($($arg)+),
        )
    };
}

macro_rules! loge {
    ($log:expr, $($arg:tt)+) => {
        $crate::log_ctx::trace_opt(
            $log,
            $crate::log_ctx::Level::Error,
            file!(),
            line!(),
            module_path!(),
            format_args!($($arg)+),
        )
    };
}

pub(crate) use logd;
pub(crate) use loge;
pub(crate) use logw;

#[cfg(test)]
mod test {
    use std::any::Any;
    use std::fmt;
    use std::sync::Arc;
    use std::sync::Mutex;

    use super::Level;
    use super::LogCtx;

    /// Collects every trace line pushed through the external callback.
    type Captured = Mutex<Vec<(Level, String)>>;

    fn capture_trace(
        opaque: Option<&(dyn Any + Send + Sync)>,
        level: Level,
        file: &str,
        line: u32,
        _func: &str,
        args: fmt::Arguments<'_>,
    ) {
        let captured = opaque
            .and_then(|opaque| opaque.downcast_ref::<Captured>())
            .expect("callback invoked without its capture buffer");
        captured
            .lock()
            .unwrap()
            .push((level, format!("{file}-{line}: {args}")));
    }

    #[test]
    fn callback_receives_call_site_and_message() {
        let captured: Arc<Captured> = Arc::new(Mutex::new(Vec::new()));
        let log_ctx = LogCtx::new(Some(captured.clone()), Some(capture_trace));

        log_ctx.trace(
            Level::Warn,
            "myfile.rs",
            22,
            "myfxn",
            format_args!("this is a test trace line"),
        );

        let lines = captured.lock().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].0, Level::Warn);
        assert_eq!(lines[0].1, "myfile.rs-22: this is a test trace line");
    }

    #[test]
    fn null_context_discards_traces() {
        // The macro must neither panic nor evaluate eagerly into a sink.
        super::logd!(None, "discarded {}", 42);
        super::loge!(None, "also discarded");
    }

    #[test]
    fn stdout_sink_accepts_all_levels() {
        let log_ctx = LogCtx::stdout();
        log_ctx.trace(Level::Debug, "myfile.rs", 1, "myfxn", format_args!("dbg"));
        log_ctx.trace(Level::Warn, "myfile.rs", 2, "myfxn", format_args!("warn"));
        log_ctx.trace(Level::Error, "myfile.rs", 3, "myfxn", format_args!("err"));
    }

    #[test]
    fn foreign_level_values_are_bounded() {
        assert_eq!(Level::try_from(0).unwrap(), Level::Debug);
        assert_eq!(Level::try_from(2).unwrap(), Level::Error);
        assert!(Level::try_from(3).is_err());
        assert!(Level::try_from(-1).is_err());
    }
}
