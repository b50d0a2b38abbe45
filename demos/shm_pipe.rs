//! Producer/consumer demonstration over a named shared-memory FIFO.
//!
//! Run the producer in one terminal and the consumer in another:
//!
//! ```sh
//! cargo run --example shm_pipe -- produce /demo_fifo --count 100
//! cargo run --example shm_pipe -- consume /demo_fifo
//! ```
//!
//! Set `RUST_LOG=debug` to watch the FIFO traces through `env_logger`.

use std::time::Duration;

use clap::Parser;
use clap::Subcommand;
use mediaproc::FifoFlags;
use mediaproc::LogCtx;
use mediaproc::ShmFifo;
use mediaproc::Status;

#[derive(Parser)]
#[command(version, about = "Shared-memory FIFO demo")]
struct Args {
    #[command(subcommand)]
    role: RoleCmd,
}

#[derive(Subcommand)]
enum RoleCmd {
    /// Create the FIFO and push numbered messages through it.
    Produce {
        /// FIFO name, e.g. /demo_fifo
        name: String,
        /// Pool size in bytes.
        #[arg(long, default_value_t = 4096)]
        pool: usize,
        /// Number of messages to push.
        #[arg(long, default_value_t = 100)]
        count: usize,
    },
    /// Open an existing FIFO and pull until it stays silent.
    Consume {
        /// FIFO name, e.g. /demo_fifo
        name: String,
        /// Give up after this many milliseconds without a frame.
        #[arg(long, default_value_t = 5000)]
        idle_ms: u64,
    },
}

fn produce(name: &str, pool: usize, count: usize, log: &LogCtx) -> Result<(), Status> {
    let fifo = ShmFifo::create(name, pool, FifoFlags::EXHAUST_CTRL, Some(log))?;
    for seq in 0..count {
        let message = format!("frame #{seq:06}");
        fifo.push(message.as_bytes(), Some(log))?;
    }
    println!("pushed {count} messages into '{name}'");
    // Give consumers a moment to drain before the segment is unlinked.
    while fifo.buffer_level() > 0 {
        std::thread::sleep(Duration::from_millis(50));
    }
    fifo.release(Some(log));
    Ok(())
}

fn consume(name: &str, idle_ms: u64, log: &LogCtx) -> Result<(), Status> {
    let fifo = ShmFifo::open(name, Some(log))?;
    let idle = Duration::from_millis(idle_ms);
    let mut received = 0usize;
    loop {
        match fifo.pull(Some(idle), Some(log)) {
            Ok(elem) => {
                received += 1;
                println!("{}", String::from_utf8_lossy(&elem));
            }
            Err(Status::TimedOut) | Err(Status::Interrupted) => break,
            Err(status) => {
                fifo.close(Some(log));
                return Err(status);
            }
        }
    }
    println!("pulled {received} messages from '{name}'");
    fifo.close(Some(log));
    Ok(())
}

fn main() -> Result<(), Status> {
    env_logger::init();
    let log = LogCtx::forwarding_to_log();
    match Args::parse().role {
        RoleCmd::Produce { name, pool, count } => produce(&name, pool, count, &log),
        RoleCmd::Consume { name, idle_ms } => consume(&name, idle_ms, &log),
    }
}
