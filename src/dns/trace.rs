//! Diagnostic sink for resolution traces.
//!
//! A sink observes each step of a resolution. It never influences the outcome.

use parking_lot::Mutex;
use std::net::SocketAddr;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    /// The answer was served from the general cache.
    CacheHit { qname: String, qtype: String },
    /// A query is about to be sent to `nameserver`.
    Query {
        qname: String,
        qtype: String,
        nameserver: SocketAddr,
    },
    Answer { nameserver: SocketAddr, records: usize },
    /// The nameserver delegated to a zone closer to the query name.
    Referral { nameserver: SocketAddr, zone: String },
    Failure { nameserver: SocketAddr, error: String },
    /// Every candidate was tried without an answer.
    Exhausted { qname: String, qtype: String },
}

pub trait TraceSink: Send + Sync {
    fn record(&self, event: &TraceEvent);
}

/// Forwards trace events to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TraceSink for TracingSink {
    fn record(&self, event: &TraceEvent) {
        debug!(?event, "resolution step");
    }
}

/// Keeps every event in memory, in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TraceEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.lock().clone()
    }

    /// Nameservers queried so far, in query order.
    pub fn queried(&self) -> Vec<SocketAddr> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                TraceEvent::Query { nameserver, .. } => Some(*nameserver),
                _ => None,
            })
            .collect()
    }
}

impl TraceSink for RecordingSink {
    fn record(&self, event: &TraceEvent) {
        self.events.lock().push(event.clone());
    }
}
