//! Event sinks.
//!
//! A sink receives every event the scheduler emits. Recording is
//! deliberately infallible from the caller's point of view: a sink that
//! cannot persist an event logs a warning and drops it rather than
//! failing the scheduling decision that produced it.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use tracing::warn;

use crate::error::EventError;
use crate::types::Event;

/// Destination for scheduler events.
pub trait EventSink: Send + Sync {
    /// Record one event.
    fn record(&self, event: Event);
}

/// Appends events as JSON lines to a file.
///
/// One line per event, in emission order, suitable for conversion into a
/// time-ordered event log after the run.
pub struct JsonlEventLog {
    file: Mutex<File>,
}

impl JsonlEventLog {
    /// Open (or create) the log file at `path`, appending to it.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, EventError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

impl EventSink for JsonlEventLog {
    fn record(&self, event: Event) {
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, kind = %event.kind, "Failed to serialize event");
                return;
            }
        };

        let mut file = self.file.lock().expect("event log lock poisoned");
        if let Err(e) = writeln!(file, "{}", line) {
            warn!(error = %e, kind = %event.kind, "Failed to write event");
        }
    }
}

/// Collects events in memory. Used in tests and dry runs.
#[derive(Default)]
pub struct MemoryEventLog {
    events: Mutex<Vec<Event>>,
}

impl MemoryEventLog {
    /// Create an empty in-memory log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy out everything recorded so far, in emission order.
    pub fn snapshot(&self) -> Vec<Event> {
        self.events.lock().expect("event log lock poisoned").clone()
    }

    /// Number of events recorded so far.
    pub fn len(&self) -> usize {
        self.events.lock().expect("event log lock poisoned").len()
    }

    /// True if nothing has been recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl EventSink for MemoryEventLog {
    fn record(&self, event: Event) {
        self.events
            .lock()
            .expect("event log lock poisoned")
            .push(event);
    }
}
