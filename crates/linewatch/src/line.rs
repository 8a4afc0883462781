use alloc::format;

use core::time::Duration;

use embedded_hal::digital::InputPin;

use heapless::Vec;

use log::{info, warn};

use crate::error::{Error, ErrorKind, Result};
use crate::history::{EventLog, EventLogEntry};

/// Logical level of a monitored line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LineState {
    /// The line has not been sampled yet.
    #[default]
    Unknown,
    /// The line reads low: the switch is closed.
    Low,
    /// The line reads high: the switch is open.
    High,
}

impl LineState {
    /// Returns the label used in reports and notifications.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Low => "CLOSED",
            Self::High => "OPEN",
        }
    }
}

impl From<bool> for LineState {
    fn from(is_high: bool) -> Self {
        if is_high { Self::High } else { Self::Low }
    }
}

/// State tracked for one monitored line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitoredLine {
    id: u8,
    state: LineState,
    last_change_at: Duration,
}

impl MonitoredLine {
    const fn new(id: u8) -> Self {
        Self {
            id,
            state: LineState::Unknown,
            last_change_at: Duration::ZERO,
        }
    }

    /// Returns the stable line identifier.
    #[must_use]
    pub const fn id(&self) -> u8 {
        self.id
    }

    /// Returns the last sampled state.
    #[must_use]
    pub const fn state(&self) -> LineState {
        self.state
    }

    /// Returns the time of the last transition.
    #[must_use]
    pub const fn last_change_at(&self) -> Duration {
        self.last_change_at
    }

    /// Returns the time spent in the current state.
    #[must_use]
    pub const fn elapsed(&self, now: Duration) -> Duration {
        now.saturating_sub(self.last_change_at)
    }
}

/// A transition detected by [`LineMonitor::sample_all`].
pub type LineChange = EventLogEntry;

/// Samples a fixed arena of lines and logs their transitions.
///
/// At most `N` lines can be monitored and the last `M` transitions are kept.
/// Lines are registered once, at startup, and are addressed by their position
/// in the arena.
pub struct LineMonitor<P, const N: usize, const M: usize>
where
    P: InputPin,
{
    pins: Vec<P, N>,
    lines: Vec<MonitoredLine, N>,
    history: EventLog<M>,
}

impl<P, const N: usize, const M: usize> Default for LineMonitor<P, N, M>
where
    P: InputPin,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<P, const N: usize, const M: usize> LineMonitor<P, N, M>
where
    P: InputPin,
{
    /// Creates a [`LineMonitor`] without lines.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            pins: Vec::new(),
            lines: Vec::new(),
            history: EventLog::new(),
        }
    }

    /// Adds a line to monitor.
    ///
    /// # Errors
    ///
    /// - The arena is full
    /// - A line with the same identifier is already monitored
    pub fn line(mut self, id: u8, pin: P) -> Result<Self> {
        if self.lines.iter().any(|line| line.id == id) {
            return Err(Error::new(
                ErrorKind::InvalidInput,
                format!("Line GPIO{id} is already monitored"),
            ));
        }

        if self.lines.push(MonitoredLine::new(id)).is_err() {
            return Err(Error::new(
                ErrorKind::Capacity,
                format!("No more than {N} lines can be monitored"),
            ));
        }

        // Both arenas have the same capacity and length.
        let _ = self.pins.push(pin);
        Ok(self)
    }

    /// Samples every line and returns the transitions since the previous
    /// sample.
    ///
    /// The first sample of a line moves it out of [`LineState::Unknown`] and
    /// sets its timestamp, but it is not a transition: it is neither logged
    /// nor returned.
    ///
    /// A line whose read fails keeps its previous state until the next tick.
    pub fn sample_all(&mut self, now: Duration) -> Vec<LineChange, N> {
        let mut changes = Vec::new();

        for (pin, line) in self.pins.iter_mut().zip(self.lines.iter_mut()) {
            let state = match pin.is_high() {
                Ok(is_high) => LineState::from(is_high),
                Err(e) => {
                    warn!("Unable to read line GPIO{}: {e:?}", line.id);
                    continue;
                }
            };

            if state == line.state {
                continue;
            }

            let previous = line.state;
            let elapsed = line.elapsed(now);
            line.state = state;
            line.last_change_at = now;

            if previous == LineState::Unknown {
                info!("Line GPIO{} starts {}", line.id, state.label());
                continue;
            }

            let entry = self.history.push(line.id, state, elapsed, now);
            info!("{entry}");

            // At most one change per line.
            let _ = changes.push(entry);
        }

        changes
    }

    /// Returns the monitored lines in arena order.
    #[must_use]
    pub fn lines(&self) -> &[MonitoredLine] {
        &self.lines
    }

    /// Returns the event log.
    #[must_use]
    pub const fn history(&self) -> &EventLog<M> {
        &self.history
    }

    /// Forgets every sampled state and logged transition.
    ///
    /// The next sample of each line is treated as a startup sample.
    pub fn reset(&mut self) {
        for line in &mut self.lines {
            *line = MonitoredLine::new(line.id);
        }
        self.history.clear();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    extern crate std;

    use core::cell::Cell;
    use core::convert::Infallible;
    use core::time::Duration;

    use alloc::rc::Rc;

    use embedded_hal::digital::{ErrorType, InputPin};

    use embedded_hal_mock::eh1::MockError;
    use embedded_hal_mock::eh1::digital::{Mock as PinMock, State, Transaction};

    use crate::error::ErrorKind;

    use super::{LineMonitor, LineState};

    /// A pin whose level is driven by the test through a shared cell.
    #[derive(Clone, Default)]
    pub(crate) struct FakePin(Rc<Cell<bool>>);

    impl FakePin {
        pub(crate) fn set(&self, is_high: bool) {
            self.0.set(is_high);
        }
    }

    impl ErrorType for FakePin {
        type Error = Infallible;
    }

    impl InputPin for FakePin {
        fn is_high(&mut self) -> Result<bool, Self::Error> {
            Ok(self.0.get())
        }

        fn is_low(&mut self) -> Result<bool, Self::Error> {
            Ok(!self.0.get())
        }
    }

    fn secs(value: u64) -> Duration {
        Duration::from_secs(value)
    }

    #[test]
    fn startup_sample_is_not_a_change() {
        let pin = PinMock::new(&[Transaction::get(State::High)]);
        let mut handle = pin.clone();
        let mut monitor = LineMonitor::<_, 4, 8>::new().line(2, pin).unwrap();

        let changes = monitor.sample_all(secs(1));

        assert!(changes.is_empty());
        assert!(monitor.history().is_empty());
        assert_eq!(monitor.lines()[0].state(), LineState::High);
        assert_eq!(monitor.lines()[0].last_change_at(), secs(1));
        handle.done();
    }

    #[test]
    fn one_change_per_level_difference() {
        let pin = PinMock::new(&[
            Transaction::get(State::High),
            Transaction::get(State::High),
            Transaction::get(State::Low),
            Transaction::get(State::Low),
            Transaction::get(State::High),
        ]);
        let mut handle = pin.clone();
        let mut monitor = LineMonitor::<_, 4, 8>::new().line(2, pin).unwrap();

        let counts: [usize; 5] =
            core::array::from_fn(|tick| monitor.sample_all(secs(tick as u64)).len());

        assert_eq!(counts, [0, 0, 1, 0, 1]);
        assert_eq!(monitor.history().len(), 2);
        handle.done();
    }

    #[test]
    fn change_reports_time_in_previous_state() {
        let pin = PinMock::new(&[Transaction::get(State::High), Transaction::get(State::Low)]);
        let mut handle = pin.clone();
        let mut monitor = LineMonitor::<_, 4, 8>::new().line(2, pin).unwrap();

        let _ = monitor.sample_all(secs(3));
        let changes = monitor.sample_all(secs(10));

        assert_eq!(changes.len(), 1);
        let change = changes[0];
        assert_eq!(change.line_id, 2);
        assert_eq!(change.state, LineState::Low);
        assert_eq!(change.elapsed, secs(7));
        assert_eq!(change.at, secs(10));
        assert_eq!(
            alloc::format!("{change}"),
            "GPIO2 CLOSED AFTER t=7.000 AT t=10.000"
        );
        handle.done();
    }

    #[test]
    fn every_line_is_sampled_every_tick() {
        let first = FakePin::default();
        let second = FakePin::default();
        let mut monitor = LineMonitor::<_, 4, 8>::new()
            .line(4, first.clone())
            .unwrap()
            .line(5, second.clone())
            .unwrap();

        let _ = monitor.sample_all(secs(0));
        first.set(true);
        second.set(true);
        let changes = monitor.sample_all(secs(1));

        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].line_id, 4);
        assert_eq!(changes[1].line_id, 5);
        assert!(
            monitor
                .lines()
                .iter()
                .all(|line| line.state() == LineState::High)
        );
    }

    #[test]
    fn read_error_keeps_previous_state() {
        let pin = PinMock::new(&[
            Transaction::get(State::High),
            Transaction::get(State::Low).with_error(MockError::Io(std::io::ErrorKind::Other)),
            Transaction::get(State::High),
        ]);
        let mut handle = pin.clone();
        let mut monitor = LineMonitor::<_, 4, 8>::new().line(2, pin).unwrap();

        let _ = monitor.sample_all(secs(0));
        assert!(monitor.sample_all(secs(1)).is_empty());
        assert!(monitor.sample_all(secs(2)).is_empty());
        assert_eq!(monitor.lines()[0].state(), LineState::High);
        handle.done();
    }

    #[test]
    fn arena_limits() {
        let monitor = LineMonitor::<FakePin, 1, 8>::new()
            .line(1, FakePin::default())
            .unwrap();

        let error = monitor
            .line(2, FakePin::default())
            .err()
            .map(|error| error.kind());
        assert_eq!(error, Some(ErrorKind::Capacity));

        let error = LineMonitor::<FakePin, 4, 8>::new()
            .line(1, FakePin::default())
            .unwrap()
            .line(1, FakePin::default())
            .err()
            .map(|error| error.kind());
        assert_eq!(error, Some(ErrorKind::InvalidInput));
    }

    #[test]
    fn reset_restarts_from_unknown() {
        let pin = FakePin::default();
        let mut monitor = LineMonitor::<_, 4, 8>::new().line(2, pin.clone()).unwrap();

        let _ = monitor.sample_all(secs(0));
        pin.set(true);
        let _ = monitor.sample_all(secs(1));
        monitor.reset();

        assert!(monitor.history().is_empty());
        assert_eq!(monitor.lines()[0].state(), LineState::Unknown);
        assert!(monitor.sample_all(secs(2)).is_empty());
    }
}
