use core::fmt;
use core::time::Duration;

use crate::line::LineState;

/// Renders a [`Duration`] as seconds with millisecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seconds(pub Duration);

impl fmt::Display for Seconds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.0.as_secs(), self.0.subsec_millis())
    }
}

/// A recorded line transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventLogEntry {
    /// Logical sequence number, counting every transition ever recorded.
    pub sequence: u64,
    /// Identifier of the line.
    pub line_id: u8,
    /// State the line moved to.
    pub state: LineState,
    /// Time spent in the previous state.
    pub elapsed: Duration,
    /// Time at which the transition was recorded.
    pub at: Duration,
}

impl fmt::Display for EventLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GPIO{} {} AFTER t={} AT t={}",
            self.line_id,
            self.state.label(),
            Seconds(self.elapsed),
            Seconds(self.at)
        )
    }
}

/// A circular log holding the last `M` transitions.
///
/// Entry `k` is stored in slot `k mod M`. Slot positions say nothing about
/// age: chronological order is rebuilt from the write cursor.
#[derive(Debug, Clone)]
pub struct EventLog<const M: usize> {
    slots: [Option<EventLogEntry>; M],
    written: u64,
}

impl<const M: usize> Default for EventLog<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const M: usize> EventLog<M> {
    /// Creates an empty [`EventLog`].
    #[must_use]
    pub const fn new() -> Self {
        const { assert!(M > 0, "An event log needs at least one slot") };
        Self {
            slots: [None; M],
            written: 0,
        }
    }

    /// Appends a transition, overwriting the oldest one once full.
    pub fn push(
        &mut self,
        line_id: u8,
        state: LineState,
        elapsed: Duration,
        at: Duration,
    ) -> EventLogEntry {
        let entry = EventLogEntry {
            sequence: self.written,
            line_id,
            state,
            elapsed,
            at,
        };
        self.slots[self.cursor()] = Some(entry);
        self.written = self.written.wrapping_add(1);
        entry
    }

    /// Number of entries currently held.
    #[must_use]
    pub fn len(&self) -> usize {
        usize::try_from(self.written).map_or(M, |written| written.min(M))
    }

    /// Checks whether no transition has been recorded.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.written == 0
    }

    /// Total number of transitions ever recorded.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.written
    }

    /// Returns the most recent entry.
    #[must_use]
    pub fn latest(&self) -> Option<&EventLogEntry> {
        self.iter().last()
    }

    /// Iterates over the held entries from the oldest to the newest.
    pub fn iter(&self) -> impl Iterator<Item = &EventLogEntry> {
        // Once the log has wrapped, the slot under the cursor is the oldest.
        let start = if self.len() < M { 0 } else { self.cursor() };
        self.slots[start..]
            .iter()
            .chain(&self.slots[..start])
            .filter_map(Option::as_ref)
    }

    /// Forgets every entry.
    pub fn clear(&mut self) {
        self.slots = [None; M];
        self.written = 0;
    }

    /// Writes one line per entry, oldest first, prefixed by its sequence
    /// number.
    ///
    /// # Errors
    ///
    /// The writer failed.
    pub fn render(&self, out: &mut impl fmt::Write) -> fmt::Result {
        if self.is_empty() {
            return out.write_str("No events recorded\n");
        }
        for entry in self.iter() {
            writeln!(out, "{}: {entry}", entry.sequence)?;
        }
        Ok(())
    }

    #[inline]
    fn cursor(&self) -> usize {
        // `M` fits in `u64`, so the remainder fits in `usize`.
        (self.written % M as u64) as usize
    }
}
