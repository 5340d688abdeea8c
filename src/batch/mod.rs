//! Batch process protocol engine.
//!
//! Drives long-lived exiftool processes in `-stay_open` mode: commands are
//! pipelined to each worker and answered in order, and the Nth sentinel-terminated
//! block a worker prints is matched to the Nth request still waiting for output.
//!
//! # Architecture
//!
//! ```text
//!     Pool (handles) ──commands──▶ Supervisor task ◀──events── stream readers
//!                                      │
//!                    ┌─────────────────┼─────────────────┐
//!               ┌────▼─────┐      ┌────▼─────┐      ┌────▼─────┐
//!               │ Worker 1 │      │ Worker 2 │      │ Worker N │
//!               │ pending  │      │ pending  │      │ pending  │
//!               │ FIFO     │      │ FIFO     │      │ FIFO     │
//!               └──────────┘      └──────────┘      └──────────┘
//! ```
//!
//! # Features
//!
//! - **Pipelining**: several commands may be in flight per worker
//! - **Local failures**: timeouts and crashes fail one request, never the pool
//! - **Recycling**: workers retire after a task quota and are replaced lazily
//! - **Late output**: a response that arrives after its timeout is discarded

mod pending;
mod pool;
mod process;
mod protocol;
mod signals;
mod task;
#[cfg(test)]
pub(crate) mod testing;
mod worker;

pub use pool::{Pool, PoolConfig, PoolStats};
pub use protocol::{DEFAULT_SENTINEL, ResponseBuffer, ToolProtocol};
pub use signals::TerminationReason;
pub use task::{Diagnostics, Response, SubmitOptions, Task, VersionTask};
pub use worker::{WorkerInfo, WorkerState};
