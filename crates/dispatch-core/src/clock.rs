//! Simulation clock.
//!
//! Wall-clock ticks stay `tick_interval_ms` apart; each tick advances
//! simulated time by `tick_interval_ms * speed`. Snapshot timestamps are the
//! simulated time, so they are reproducible regardless of wall-clock jitter.
//! All arithmetic is checked.

/// Errors that can occur during clock operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClockError {
    /// Tick counter or elapsed time would overflow.
    #[error("clock overflow at tick {tick}")]
    Overflow {
        /// Tick at which advancing failed.
        tick: u64,
    },

    /// Zero interval or speed.
    #[error("invalid clock parameter: {reason}")]
    InvalidConfig {
        /// Explanation of what is wrong.
        reason: String,
    },
}

/// Logical time of the simulation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimClock {
    /// Ticks completed so far.
    tick: u64,
    /// Simulated milliseconds elapsed.
    elapsed_ms: u64,
    /// Wall-clock milliseconds per tick.
    tick_interval_ms: u64,
    /// Simulated-time multiplier.
    speed: u32,
}

impl SimClock {
    /// A clock at tick 0.
    pub fn new(tick_interval_ms: u64, speed: u32) -> Result<Self, ClockError> {
        if tick_interval_ms == 0 {
            return Err(ClockError::InvalidConfig {
                reason: "tick_interval_ms must be at least 1".to_owned(),
            });
        }
        if speed == 0 {
            return Err(ClockError::InvalidConfig {
                reason: "speed must be at least 1".to_owned(),
            });
        }
        Ok(Self {
            tick: 0,
            elapsed_ms: 0,
            tick_interval_ms,
            speed,
        })
    }

    /// Simulated milliseconds one tick covers at the current speed.
    pub fn dt_ms(&self) -> Result<u64, ClockError> {
        self.tick_interval_ms
            .checked_mul(u64::from(self.speed))
            .ok_or(ClockError::Overflow { tick: self.tick })
    }

    /// Advance by one tick. Returns the simulated milliseconds covered.
    pub fn advance(&mut self) -> Result<u64, ClockError> {
        let overflow = ClockError::Overflow { tick: self.tick };
        let dt = self.dt_ms()?;
        let tick = self.tick.checked_add(1).ok_or_else(|| overflow.clone())?;
        let elapsed = self.elapsed_ms.checked_add(dt).ok_or(overflow)?;
        self.tick = tick;
        self.elapsed_ms = elapsed;
        Ok(dt)
    }

    /// Change the multiplier. Returns the previous one.
    ///
    /// A speed whose tick span does not fit in `u64` is refused and the
    /// clock keeps its old speed.
    pub fn set_speed(&mut self, speed: u32) -> Result<u32, ClockError> {
        if speed == 0 {
            return Err(ClockError::InvalidConfig {
                reason: "speed must be at least 1".to_owned(),
            });
        }
        if self.tick_interval_ms.checked_mul(u64::from(speed)).is_none() {
            return Err(ClockError::InvalidConfig {
                reason: format!("speed {speed} overflows a {} ms tick", self.tick_interval_ms),
            });
        }
        Ok(std::mem::replace(&mut self.speed, speed))
    }

    /// Ticks completed.
    pub const fn tick(&self) -> u64 {
        self.tick
    }

    /// Simulated milliseconds elapsed.
    pub const fn now_ms(&self) -> u64 {
        self.elapsed_ms
    }

    /// Current multiplier.
    pub const fn speed(&self) -> u32 {
        self.speed
    }

    /// Wall-clock milliseconds per tick.
    pub const fn tick_interval_ms(&self) -> u64 {
        self.tick_interval_ms
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn advance_scales_by_speed() {
        let mut clock = SimClock::new(200, 1).unwrap();
        assert_eq!(clock.advance().unwrap(), 200);
        assert_eq!(clock.set_speed(3).unwrap(), 1);
        assert_eq!(clock.advance().unwrap(), 600);
        assert_eq!(clock.tick(), 2);
        assert_eq!(clock.now_ms(), 800);
    }

    #[test]
    fn zero_parameters_are_rejected() {
        assert!(SimClock::new(0, 1).is_err());
        assert!(SimClock::new(200, 0).is_err());
        let mut clock = SimClock::new(200, 2).unwrap();
        assert!(clock.set_speed(0).is_err());
        assert_eq!(clock.speed(), 2);
    }

    #[test]
    fn speed_that_overflows_the_tick_is_refused() {
        let mut clock = SimClock::new(u64::MAX / 2, 1).unwrap();
        assert!(matches!(clock.set_speed(3), Err(ClockError::InvalidConfig { .. })));
        assert_eq!(clock.speed(), 1);
        assert_eq!(clock.set_speed(2).unwrap(), 1);
    }

    #[test]
    fn overflow_is_reported_without_mutation() {
        let mut clock = SimClock::new(u64::MAX, 2).unwrap();
        assert_eq!(clock.advance(), Err(ClockError::Overflow { tick: 0 }));
        assert_eq!(clock.tick(), 0);
        assert_eq!(clock.now_ms(), 0);
    }
}
