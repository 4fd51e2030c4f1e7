use crate::clock::SimTime;
use crate::duty_cycle::{DutyCycleConfig, DutyCycleLedger};
use crate::error::ConfigError;
use crate::outcome::{FailureReason, StatusChange, TransmissionOutcome};
use crate::radio::{GeoPoint, SpreadingFactor};
use serde::{Deserialize, Serialize};

pub const MIN_TX_POWER_DBM: f64 = 0.0;
pub const MAX_TX_POWER_DBM: f64 = 30.0;

/// Roster entry as supplied by device management. Unvalidated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub id: u32,
    #[serde(default)]
    pub name: String,
    pub location: GeoPoint,
    pub spreading_factor: u8,
    pub tx_power_dbm: f64,
    /// Falls back to the simulation-wide transmission interval.
    #[serde(default)]
    pub interval_ms: Option<u64>,
    #[serde(default)]
    pub phase_ms: u64,
    /// Falls back to the simulation-wide duty-cycle maximum.
    #[serde(default)]
    pub max_messages: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceStatus {
    Online,
    Offline,
}

/// Validated, immutable device configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: u32,
    pub name: String,
    pub location: GeoPoint,
    pub distance_m: f64,
    pub spreading_factor: SpreadingFactor,
    pub tx_power_dbm: f64,
    pub interval_ms: u64,
    pub phase_ms: u64,
    pub duty_cycle: DutyCycleConfig,
}

impl Device {
    pub fn from_config(
        config: &DeviceConfig,
        gateway: &GeoPoint,
        default_interval_ms: u64,
        default_duty_cycle: DutyCycleConfig,
    ) -> Result<Self, ConfigError> {
        let spreading_factor = SpreadingFactor::try_from(config.spreading_factor)?;

        if !config.tx_power_dbm.is_finite()
            || config.tx_power_dbm < MIN_TX_POWER_DBM
            || config.tx_power_dbm > MAX_TX_POWER_DBM
        {
            return Err(ConfigError::InvalidTxPower(config.tx_power_dbm));
        }

        if !config.location.is_valid() {
            return Err(ConfigError::InvalidLocation {
                device_id: config.id,
                latitude: config.location.latitude,
                longitude: config.location.longitude,
            });
        }

        let interval_ms = config.interval_ms.unwrap_or(default_interval_ms);
        if interval_ms == 0 {
            return Err(ConfigError::InvalidSchedule {
                device_id: config.id,
                reason: "interval must be positive".into(),
            });
        }
        if config.phase_ms >= interval_ms {
            return Err(ConfigError::InvalidSchedule {
                device_id: config.id,
                reason: format!("phase {} ms not below interval {} ms", config.phase_ms, interval_ms),
            });
        }

        let duty_cycle = DutyCycleConfig {
            max_messages: config.max_messages.unwrap_or(default_duty_cycle.max_messages),
            ..default_duty_cycle
        };
        duty_cycle.validate()?;

        let name = if config.name.is_empty() {
            format!("device-{}", config.id)
        } else {
            config.name.clone()
        };

        Ok(Self {
            id: config.id,
            name,
            location: config.location,
            distance_m: config.location.distance_m(gateway),
            spreading_factor,
            tx_power_dbm: config.tx_power_dbm,
            interval_ms,
            phase_ms: config.phase_ms,
            duty_cycle,
        })
    }

    /// Scheduled transmission times in `(after, until]`. Time 0 is never a
    /// transmission since `after` is never below the epoch.
    pub fn scheduled_between(&self, after: SimTime, until: SimTime) -> impl Iterator<Item = SimTime> {
        let interval = self.interval_ms;
        std::iter::successors(self.first_after(after), move |&t| t.checked_add(interval))
            .take_while(move |&t| t <= until)
    }

    /// Number of scheduled times in `(after, until]`, without walking them.
    pub fn scheduled_count(&self, after: SimTime, until: SimTime) -> u64 {
        match self.first_after(after) {
            Some(first) if first <= until => (until - first) / self.interval_ms + 1,
            _ => 0,
        }
    }

    /// First scheduled time strictly after `after`, or `None` past the end of time.
    fn first_after(&self, after: SimTime) -> Option<SimTime> {
        if after < self.phase_ms {
            return Some(self.phase_ms);
        }
        let periods = (after - self.phase_ms) / self.interval_ms + 1;
        periods
            .checked_mul(self.interval_ms)
            .and_then(|offset| offset.checked_add(self.phase_ms))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceStats {
    pub attempts: u32,
    pub delivered: u32,
    pub blocked_by_duty_cycle: u32,
    pub collided: u32,
    pub channel_errors: u32,
}

impl DeviceStats {
    pub fn record(&mut self, outcome: &TransmissionOutcome) {
        self.attempts = self.attempts.saturating_add(1);
        let counter = match outcome.failure_reason {
            FailureReason::None => &mut self.delivered,
            FailureReason::DutyCycle => &mut self.blocked_by_duty_cycle,
            FailureReason::Collision => &mut self.collided,
            FailureReason::ChannelError => &mut self.channel_errors,
        };
        *counter = counter.saturating_add(1);
    }
}

/// Mutable per-device record owned by the driver.
#[derive(Debug, Clone)]
pub struct DeviceState {
    device: Device,
    ledger: DutyCycleLedger,
    status: DeviceStatus,
    last_success: Option<SimTime>,
    stats: DeviceStats,
}

impl DeviceState {
    pub fn new(device: Device) -> Self {
        let ledger = DutyCycleLedger::new(device.duty_cycle);
        Self {
            device,
            ledger,
            status: DeviceStatus::Online,
            last_success: None,
            stats: DeviceStats::default(),
        }
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn ledger(&self) -> &DutyCycleLedger {
        &self.ledger
    }

    pub fn status(&self) -> DeviceStatus {
        self.status
    }

    pub fn last_success(&self) -> Option<SimTime> {
        self.last_success
    }

    pub fn stats(&self) -> &DeviceStats {
        &self.stats
    }

    pub(crate) fn replace_ledger(&mut self, ledger: DutyCycleLedger) {
        self.ledger = ledger;
    }

    pub(crate) fn apply_outcome(&mut self, outcome: &TransmissionOutcome) {
        self.stats.record(outcome);
        if outcome.success {
            self.last_success = Some(self.last_success.map_or(outcome.timestamp_ms, |t| t.max(outcome.timestamp_ms)));
        }
    }

    /// Status implied by the last delivery. A device that never delivered is
    /// measured from the simulation epoch.
    pub fn derived_status(&self, now: SimTime, offline_threshold_ms: u64) -> DeviceStatus {
        let reference = self.last_success.unwrap_or(0);
        if now.saturating_sub(reference) > offline_threshold_ms {
            DeviceStatus::Offline
        } else {
            DeviceStatus::Online
        }
    }

    /// Recompute status once for this step, reporting a transition if any.
    pub(crate) fn update_status(&mut self, now: SimTime, offline_threshold_ms: u64) -> Option<StatusChange> {
        let next = self.derived_status(now, offline_threshold_ms);
        if next == self.status {
            return None;
        }
        let change = StatusChange {
            device_id: self.device.id,
            timestamp_ms: now,
            from: self.status,
            to: next,
        };
        self.status = next;
        Some(change)
    }

    /// Back to the initial state; static configuration is kept.
    pub fn reset(&mut self) {
        self.ledger.clear();
        self.status = DeviceStatus::Online;
        self.last_success = None;
        self.stats = DeviceStats::default();
    }
}
