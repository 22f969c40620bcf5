//! Console line to [`ConsoleEvent`] conversion

use crate::flavor::FlavorRegistry;
use scriptserver_core::{Clock, ConsoleEvent, EventKind, EventPayload, SystemClock};
use std::sync::Arc;
use tracing::trace;

/// Derives at most one event per console line
pub struct EventParser {
    flavors: FlavorRegistry,
    clock: Arc<dyn Clock>,
    /// Timestamp of the last emitted event
    last_timestamp: u64,
}

impl EventParser {
    pub fn new(flavors: FlavorRegistry) -> Self {
        Self::with_clock(flavors, Arc::new(SystemClock))
    }

    pub fn with_clock(flavors: FlavorRegistry, clock: Arc<dyn Clock>) -> Self {
        Self {
            flavors,
            clock,
            last_timestamp: 0,
        }
    }

    /// Parse and timestamp a line. Timestamps never go backwards, even if
    /// the clock does.
    pub fn parse(&mut self, line: &str) -> Option<ConsoleEvent> {
        let payload = self.match_line(line)?;

        let timestamp = self.clock.now_millis().max(self.last_timestamp);
        self.last_timestamp = timestamp;

        trace!("{} event from {:?}", payload.kind(), line);
        Some(ConsoleEvent::new(timestamp, payload))
    }

    /// First matching payload for `line`, without a timestamp
    pub fn match_line(&self, line: &str) -> Option<EventPayload> {
        EventKind::ALL.iter().find_map(|&kind| {
            self.flavors
                .matcher(kind)
                .and_then(|matcher| matcher(line))
        })
    }

    /// Whether `line` signals that the server accepts RCON connections
    pub fn is_ready_line(&self, line: &str) -> bool {
        self.flavors
            .ready_pattern()
            .is_some_and(|ready| ready.is_match(line))
    }

    pub fn flavors(&self) -> &FlavorRegistry {
        &self.flavors
    }
}
