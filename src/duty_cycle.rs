use crate::clock::{SimTime, MS_PER_HOUR};
use crate::error::{ClockRegression, ConfigError, LedgerError};
use heapless::Deque;
use serde::{Deserialize, Serialize};

/// Upper bound on `max_messages`; the ledger never holds more entries than the quota.
pub const LEDGER_CAPACITY: usize = 64;

const DEFAULT_WINDOW_MS: u64 = MS_PER_HOUR;
const DEFAULT_MAX_MESSAGES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DutyCycleConfig {
    pub window_ms: u64,
    pub max_messages: usize,
}

impl Default for DutyCycleConfig {
    fn default() -> Self {
        Self {
            window_ms: DEFAULT_WINDOW_MS,
            max_messages: DEFAULT_MAX_MESSAGES,
        }
    }
}

impl DutyCycleConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_ms == 0 {
            return Err(ConfigError::InvalidDutyCycle("window must be positive".into()));
        }
        if self.max_messages == 0 || self.max_messages > LEDGER_CAPACITY {
            return Err(ConfigError::InvalidDutyCycle(format!(
                "max_messages {} outside 1..={}",
                self.max_messages, LEDGER_CAPACITY
            )));
        }
        Ok(())
    }
}

/// Sliding-window record of one device's transmissions.
#[derive(Debug, Clone)]
pub struct DutyCycleLedger {
    config: DutyCycleConfig,
    entries: Deque<SimTime, LEDGER_CAPACITY>,
    last_seen: SimTime,
}

impl DutyCycleLedger {
    pub fn new(config: DutyCycleConfig) -> Self {
        Self {
            config,
            entries: Deque::new(),
            last_seen: 0,
        }
    }

    pub fn config(&self) -> &DutyCycleConfig {
        &self.config
    }

    fn observe(&mut self, now: SimTime) -> Result<(), ClockRegression> {
        if now < self.last_seen {
            return Err(ClockRegression {
                last_ms: self.last_seen,
                now_ms: now,
            });
        }
        self.last_seen = now;
        self.evict(now);
        Ok(())
    }

    /// The window is closed: an entry exactly `window_ms` old still counts.
    fn evict(&mut self, now: SimTime) {
        while let Some(&oldest) = self.entries.front() {
            if now - oldest > self.config.window_ms {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// Evicts entries that left the window, then reports whether the quota has room.
    pub fn may_transmit(&mut self, now: SimTime) -> Result<bool, ClockRegression> {
        self.observe(now)?;
        Ok(self.entries.len() < self.config.max_messages)
    }

    /// Consume one unit of quota at `now`. Only valid after `may_transmit(now)` returned true.
    pub fn record_transmission(&mut self, now: SimTime) -> Result<(), LedgerError> {
        self.observe(now)?;
        if self.entries.len() >= self.config.max_messages {
            return Err(LedgerError::QuotaExhausted {
                max_messages: self.config.max_messages,
                now_ms: now,
            });
        }
        // capacity >= max_messages, checked by DutyCycleConfig::validate
        self.entries.push_back(now).map_err(|_| LedgerError::QuotaExhausted {
            max_messages: self.config.max_messages,
            now_ms: now,
        })
    }

    /// Transmissions inside `[now - window, now]`, without mutating the ledger.
    pub fn transmissions_in_window(&self, now: SimTime) -> usize {
        self.entries
            .iter()
            .filter(|&&ts| ts <= now && now - ts <= self.config.window_ms)
            .count()
    }

    /// Earliest time the quota frees up again, if it is currently exhausted.
    pub fn next_available_at(&self) -> Option<SimTime> {
        if self.entries.len() < self.config.max_messages {
            return None;
        }
        self.entries
            .front()
            .map(|&oldest| oldest.saturating_add(self.config.window_ms).saturating_add(1))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.last_seen = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MS_PER_MINUTE;

    fn ledger(max_messages: usize) -> DutyCycleLedger {
        DutyCycleLedger::new(DutyCycleConfig {
            window_ms: MS_PER_HOUR,
            max_messages,
        })
    }

    #[test]
    fn test_quota_blocks_after_max() {
        let mut ledger = ledger(3);
        for i in 0..3 {
            let now = i * MS_PER_MINUTE;
            assert!(ledger.may_transmit(now).unwrap());
            ledger.record_transmission(now).unwrap();
        }
        assert!(!ledger.may_transmit(3 * MS_PER_MINUTE).unwrap());
        assert_eq!(ledger.next_available_at(), Some(MS_PER_HOUR + 1));
        assert!(matches!(
            ledger.record_transmission(3 * MS_PER_MINUTE),
            Err(LedgerError::QuotaExhausted { max_messages: 3, .. })
        ));
    }

    #[test]
    fn test_eviction_uses_exact_window() {
        let mut ledger = ledger(1);
        ledger.record_transmission(1000).unwrap();
        assert!(!ledger.may_transmit(MS_PER_HOUR + 999).unwrap());
        // exactly one window old is still inside the window
        assert!(!ledger.may_transmit(MS_PER_HOUR + 1000).unwrap());
        assert_eq!(ledger.len(), 1);
        assert!(ledger.may_transmit(MS_PER_HOUR + 1001).unwrap());
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_clock_regression_fails_fast() {
        let mut ledger = ledger(5);
        ledger.record_transmission(5000).unwrap();
        let err = ledger.may_transmit(4000).unwrap_err();
        assert_eq!(err, ClockRegression { last_ms: 5000, now_ms: 4000 });
        assert!(matches!(
            ledger.record_transmission(10),
            Err(LedgerError::ClockRegression(_))
        ));
        // the failed queries left the ledger untouched
        assert_eq!(ledger.len(), 1);
        assert!(ledger.may_transmit(5000).unwrap());
    }

    #[test]
    fn test_window_count_and_clear() {
        let mut ledger = ledger(10);
        for minute in [0, 10, 20, 70] {
            ledger.record_transmission(minute * MS_PER_MINUTE).unwrap();
        }
        // the 10 min entry is exactly one hour old at 70 min and stays
        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger.transmissions_in_window(70 * MS_PER_MINUTE), 3);
        assert_eq!(ledger.transmissions_in_window(75 * MS_PER_MINUTE), 2);
        assert_eq!(ledger.transmissions_in_window(125 * MS_PER_MINUTE), 1);
        ledger.clear();
        assert!(ledger.is_empty());
        assert!(ledger.may_transmit(0).unwrap());
    }

    #[test]
    fn test_config_validation() {
        assert!(DutyCycleConfig::default().validate().is_ok());
        assert!(DutyCycleConfig { window_ms: 0, max_messages: 1 }.validate().is_err());
        assert!(DutyCycleConfig { window_ms: 1, max_messages: 0 }.validate().is_err());
        assert!(DutyCycleConfig {
            window_ms: 1,
            max_messages: LEDGER_CAPACITY + 1
        }
        .validate()
        .is_err());
    }
}
