//! Per-transaction change journal.
//!
//! Every write operation that should be observable appends a record here;
//! the journal is flushed to the configured sink only after the storage
//! transaction committed, and simply dropped on rollback, so events are
//! emitted at most once per committed change.

use oxrdf::{NamedNode, Triple};
use time::OffsetDateTime;

/// What happened to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    Create,
    Update,
    Delete,
}

/// One committed change to a resource.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub event_type: EventType,
    pub timestamp: OffsetDateTime,
    /// Triples removed by the change.
    pub removed: Vec<Triple>,
    /// Triples added by the change.
    pub added: Vec<Triple>,
    /// RDF types of the changed resource at the time of the change.
    pub resource_types: Vec<NamedNode>,
    /// The agent the resource was created by, when known.
    pub actor: Option<String>,
}

/// Receives events after a successful commit. The transport behind it is
/// not this crate's concern.
pub trait EventSink: Send + Sync {
    fn dispatch(&self, event: ChangeEvent);
}

/// Collects the change records of one write transaction.
#[derive(Debug, Default)]
pub struct EventJournal {
    records: Vec<ChangeEvent>,
}

impl EventJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, event: ChangeEvent) {
        self.records.push(event);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Hands every record to the sink, in append order.
    pub fn flush(self, sink: &dyn EventSink) {
        for record in self.records {
            sink.dispatch(record);
        }
    }
}
