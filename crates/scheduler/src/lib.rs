//! Update scheduling engine for an electrophoretic display controller.
//!
//! Accepts partial-screen update requests, resolves spatial overlaps
//! between in-flight updates, allocates the fixed pool of hardware LUT
//! slots, and tracks completion for callers blocking on markers. All state
//! here is single-threaded; the `epdc` crate serializes access behind one
//! mutex and owns the worker thread and the interrupt boundary.

mod engine;
mod entry;
mod error;
mod lut;
mod pool;
mod power;
mod queue;

pub use engine::{
    CoreConfig, DispatchOrder, LutCompleteOutcome, ProcessOutcome, SchedulerCore, SchedulerStats,
    WorkingBufferOutcome, TEMP_USE_AMBIENT,
};
pub use entry::MarkerSignal;
pub use error::{RegionError, UpdateError};
pub use power::{PowerManager, PowerState};
