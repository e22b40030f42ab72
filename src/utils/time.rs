use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// return seconds since the epoch, with sub-second precision
pub(crate) fn unix_now_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// The single time source behind every interval policy of the engine.
///
/// A simulated clock only moves through [`Clock::advance`], which is how
/// trace replay and tests drive timeouts and staleness deterministically.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Clock {
    Real,
    Simulated { now: f64 },
}

impl Clock {
    pub fn new(use_real_time: bool) -> Self {
        if use_real_time {
            Clock::Real
        } else {
            Clock::Simulated { now: 0.0 }
        }
    }

    pub fn now(&self) -> f64 {
        match self {
            Clock::Real => unix_now_secs(),
            Clock::Simulated { now } => *now,
        }
    }

    pub fn is_simulated(&self) -> bool {
        matches!(self, Clock::Simulated { .. })
    }

    /// Moves a simulated clock forward to `t`. Returns false (and leaves the
    /// clock untouched) for a real clock or when `t` lies in the past.
    pub fn advance(
        &mut self,
        t: f64,
    ) -> bool {
        match self {
            Clock::Simulated { now } if t >= *now => {
                *now = t;
                true
            }
            _ => false,
        }
    }
}
