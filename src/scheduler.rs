//! Two named periodic tasks sharing one loop.

use embassy_time::{Duration, Instant};

use crate::config::{CONTROL_TICK_PERIOD, INPUT_TICK_PERIOD};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Task {
    /// Input polling and command handling.
    Input,
    /// Telemetry and the control loops.
    Control,
}

#[derive(Clone, Copy, Debug)]
struct Periodic {
    period: Duration,
    next: Instant,
}

impl Periodic {
    /// Advance past `now`. Ticks missed while the loop was busy are dropped.
    fn advance(&mut self, now: Instant) {
        self.next += self.period;
        if self.next <= now {
            self.next = now + self.period;
        }
    }
}

/// Hands out due tasks; the caller sleeps until [`TickScheduler::next_deadline`] in
/// between. Both tasks are due immediately after construction.
#[derive(Clone, Copy, Debug)]
pub struct TickScheduler {
    input: Periodic,
    control: Periodic,
}

impl TickScheduler {
    pub fn new(now: Instant) -> Self {
        Self::with_periods(now, INPUT_TICK_PERIOD, CONTROL_TICK_PERIOD)
    }

    pub fn with_periods(now: Instant, input: Duration, control: Duration) -> Self {
        Self {
            input: Periodic { period: input, next: now },
            control: Periodic { period: control, next: now },
        }
    }

    pub fn next_deadline(&self) -> Instant {
        self.input.next.min(self.control.next)
    }

    /// The next task due at `now`, input first when both are. Call until `None`.
    pub fn due(&mut self, now: Instant) -> Option<Task> {
        if self.input.next <= now {
            self.input.advance(now);
            Some(Task::Input)
        } else if self.control.next <= now {
            self.control.advance(now);
            Some(Task::Control)
        } else {
            None
        }
    }
}
