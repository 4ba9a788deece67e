//! # coloc-events
//!
//! Event type definitions and sinks for the coloc scheduler.
//!
//! Every state transition the scheduler makes (job start, pause, unpause,
//! core re-pin, completion, failure, latency-service affinity change) is
//! recorded as an [`Event`] carrying a wall-clock timestamp and the
//! parameters relevant to that transition. Events are written through an
//! [`EventSink`]; the default sink appends JSON lines to a file so the
//! record can be converted into a time-ordered event log for analysis
//! after a run.
//!
//! ## Design Principles
//!
//! - Events are immutable records of transitions that already happened
//! - Recording an event never fails a scheduling decision
//! - One event per lifecycle call, in the order the calls were made

mod error;
mod sink;
mod types;

pub use error::EventError;
pub use sink::{EventSink, JsonlEventLog, MemoryEventLog};
pub use types::{Event, EventKind};
