use crate::error::{ConfigError, SimError};
use serde::{Deserialize, Serialize};

/// Simulated time in milliseconds since the simulation epoch.
pub type SimTime = u64;

pub const MS_PER_SECOND: u64 = 1000;
pub const MS_PER_MINUTE: u64 = 60 * MS_PER_SECOND;
pub const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;
pub const MS_PER_DAY: u64 = 24 * MS_PER_HOUR;

/// Largest accepted step size.
pub const MAX_STEP_MS: u64 = 7 * MS_PER_DAY;

/// Logical clock. Only the driver advances it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationClock {
    now_ms: SimTime,
    step_ms: u64,
    steps: u64,
}

impl SimulationClock {
    pub fn new(step_ms: u64) -> Result<Self, ConfigError> {
        validate_step_ms(step_ms)?;
        Ok(Self {
            now_ms: 0,
            step_ms,
            steps: 0,
        })
    }

    pub fn now(&self) -> SimTime {
        self.now_ms
    }

    pub fn step_ms(&self) -> u64 {
        self.step_ms
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn set_step_ms(&mut self, step_ms: u64) -> Result<(), ConfigError> {
        validate_step_ms(step_ms)?;
        self.step_ms = step_ms;
        Ok(())
    }

    /// Advance by one step and return the half-open window `(previous, now]`.
    /// The clock is left untouched if the new time does not fit in [`SimTime`].
    pub fn advance(&mut self) -> Result<(SimTime, SimTime), SimError> {
        let previous = self.now_ms;
        let now = previous.checked_add(self.step_ms).ok_or(SimError::TimeOverflow {
            now_ms: previous,
            step_ms: self.step_ms,
        })?;
        self.now_ms = now;
        self.steps += 1;
        Ok((previous, now))
    }

    /// Undo the last `advance`. Used when a step aborts before committing.
    pub(crate) fn rewind(&mut self, previous: SimTime) {
        debug_assert!(previous <= self.now_ms);
        self.now_ms = previous;
        self.steps = self.steps.saturating_sub(1);
    }

    pub fn reset(&mut self) {
        self.now_ms = 0;
        self.steps = 0;
    }
}

/// Step sizes must lie in `1..=MAX_STEP_MS`.
pub fn validate_step_ms(step_ms: u64) -> Result<(), ConfigError> {
    if step_ms == 0 {
        return Err(ConfigError::NonPositiveStepSize);
    }
    if step_ms > MAX_STEP_MS {
        return Err(ConfigError::StepSizeTooLarge {
            step_ms,
            max_ms: MAX_STEP_MS,
        });
    }
    Ok(())
}
