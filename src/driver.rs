use crate::clock::{SimTime, SimulationClock};
use crate::config::SimulationConfig;
use crate::contention::{ContentionResolver, ContentionSummary};
use crate::device::{Device, DeviceConfig, DeviceState, DeviceStats, DeviceStatus};
use crate::duty_cycle::DutyCycleLedger;
use crate::error::{ConfigError, LedgerError, SimError};
use crate::outcome::{FailureReason, OutcomeSink, StatusChange, TransmissionAttempt, TransmissionOutcome};
use crate::radio::{ChannelModel, SpreadingFactor};
use crate::traffic::{MeasurementSource, WaterLevelGenerator};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

/// Upper bound on the transmissions a single step may schedule across the roster.
pub const MAX_ATTEMPTS_PER_STEP: u64 = 100_000;

/// Network-wide counters since the last reset.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SimulationStats {
    pub steps: u64,
    pub attempts: u64,
    pub delivered: u64,
    pub blocked_by_duty_cycle: u64,
    pub collided: u64,
    pub channel_errors: u64,
}

impl SimulationStats {
    fn record(&mut self, outcome: &TransmissionOutcome) {
        self.attempts += 1;
        match outcome.failure_reason {
            FailureReason::None => self.delivered += 1,
            FailureReason::DutyCycle => self.blocked_by_duty_cycle += 1,
            FailureReason::Collision => self.collided += 1,
            FailureReason::ChannelError => self.channel_errors += 1,
        }
    }

    /// Delivered over all attempts, including blocked ones. Zero before any attempt.
    pub fn delivery_ratio(&self) -> f64 {
        if self.attempts == 0 {
            0.0
        } else {
            self.delivered as f64 / self.attempts as f64
        }
    }
}

/// Everything one step produced, in emission order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub step: u64,
    pub from_ms: SimTime,
    pub to_ms: SimTime,
    pub outcomes: Vec<TransmissionOutcome>,
    pub status_changes: Vec<StatusChange>,
    pub contention: ContentionSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSummary {
    pub id: u32,
    pub name: String,
    pub spreading_factor: SpreadingFactor,
    pub distance_m: f64,
    pub status: DeviceStatus,
    pub last_success_ms: Option<SimTime>,
    pub transmissions_in_window: usize,
    pub stats: DeviceStats,
}

/// Point-in-time snapshot for control clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationStatus {
    pub running: bool,
    pub sim_time_ms: SimTime,
    pub step_ms: u64,
    pub steps: u64,
    pub online: usize,
    pub offline: usize,
    pub stats: SimulationStats,
    pub devices: Vec<DeviceSummary>,
}

/// Owns the clock, the roster and every ledger, and advances them one step at a time.
pub struct SimulationDriver {
    config: SimulationConfig,
    channel: ChannelModel,
    resolver: ContentionResolver,
    clock: SimulationClock,
    devices: Vec<DeviceState>,
    traffic: Box<dyn MeasurementSource>,
    sinks: Vec<Box<dyn OutcomeSink>>,
    rng: ChaCha8Rng,
    running: bool,
    stats: SimulationStats,
}

impl SimulationDriver {
    /// Validates the configuration and every roster entry. Nothing invalid is clamped.
    pub fn new(config: SimulationConfig, roster: &[DeviceConfig]) -> Result<Self, ConfigError> {
        config.validate()?;
        let channel = ChannelModel::new(config.channel.clone())?;
        let clock = SimulationClock::new(config.step_ms)?;
        let rng = ChaCha8Rng::seed_from_u64(config.seed);

        let mut driver = Self {
            config,
            channel,
            resolver: ContentionResolver::new(),
            clock,
            devices: Vec::with_capacity(roster.len()),
            traffic: Box::new(WaterLevelGenerator::new()),
            sinks: Vec::new(),
            rng,
            running: false,
            stats: SimulationStats::default(),
        };
        for device in roster {
            driver.register_device(device)?;
        }
        Ok(driver)
    }

    pub fn with_measurement_source(mut self, source: impl MeasurementSource + 'static) -> Self {
        self.traffic = Box::new(source);
        self
    }

    pub fn add_sink(&mut self, sink: impl OutcomeSink + 'static) {
        self.sinks.push(Box::new(sink));
    }

    pub fn register_device(&mut self, config: &DeviceConfig) -> Result<(), ConfigError> {
        if self.devices.iter().any(|state| state.device().id == config.id) {
            return Err(ConfigError::DuplicateDevice(config.id));
        }
        let device = Device::from_config(
            config,
            &self.config.gateway,
            self.config.lora.transmission_interval_ms,
            self.config.lora.duty_cycle,
        )?;
        info!(
            "registered device {} ({}) at {:.0} m, {}, {} dBm",
            device.id, device.name, device.distance_m, device.spreading_factor, device.tx_power_dbm
        );
        self.devices.push(DeviceState::new(device));
        Ok(())
    }

    pub fn start(&mut self) {
        if !self.running {
            info!("simulation started at {} ms", self.clock.now());
        }
        self.running = true;
    }

    pub fn pause(&mut self) {
        if self.running {
            info!("simulation paused at {} ms", self.clock.now());
        }
        self.running = false;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Clears clock, ledgers, statuses and counters and re-seeds the random
    /// stream. The roster, step size and run state are kept.
    pub fn reset(&mut self) {
        self.clock.reset();
        for state in &mut self.devices {
            state.reset();
        }
        self.traffic.reset();
        self.rng = ChaCha8Rng::seed_from_u64(self.config.seed);
        self.stats = SimulationStats::default();
        info!("simulation reset ({} devices)", self.devices.len());
    }

    pub fn set_step_size(&mut self, step_ms: u64) -> Result<(), ConfigError> {
        self.clock.set_step_ms(step_ms)?;
        info!("step size set to {} ms", step_ms);
        Ok(())
    }

    /// Auto-run hook: advances only while started.
    pub fn tick(&mut self) -> Result<Option<StepReport>, SimError> {
        if !self.running {
            return Ok(None);
        }
        self.advance_one_step().map(Some)
    }

    /// Executes exactly one step regardless of the run state. On error the
    /// clock is rolled back and no device state has changed.
    pub fn advance_one_step(&mut self) -> Result<StepReport, SimError> {
        let (from, to) = self.clock.advance()?;
        self.execute_step(from, to).map_err(|err| {
            self.clock.rewind(from);
            err
        })
    }

    pub fn run_steps(&mut self, count: u64) -> Result<Vec<StepReport>, SimError> {
        (0..count).map(|_| self.advance_one_step()).collect()
    }

    fn execute_step(&mut self, from: SimTime, to: SimTime) -> Result<StepReport, SimError> {
        let attempts = self
            .devices
            .iter()
            .map(|state| state.device().scheduled_count(from, to))
            .fold(0u64, u64::saturating_add);
        if attempts > MAX_ATTEMPTS_PER_STEP {
            return Err(SimError::StepTooLarge {
                attempts,
                max: MAX_ATTEMPTS_PER_STEP,
            });
        }

        // Gate every due transmission against a staged copy of its ledger. This
        // touches neither the random stream nor committed state, so a regression
        // aborts the step cleanly. Ledgers only ever see times from this clock,
        // so a ledger error here means an internal invariant was broken.
        let mut staged: Vec<DutyCycleLedger> = Vec::with_capacity(self.devices.len());
        let mut due: Vec<(usize, SimTime, bool)> = Vec::new();
        for (owner, state) in self.devices.iter().enumerate() {
            let device_id = state.device().id;
            let ledger_error = |source: LedgerError| SimError::Ledger { device_id, source };
            let mut ledger = state.ledger().clone();
            for timestamp in state.device().scheduled_between(from, to) {
                let permitted = ledger
                    .may_transmit(timestamp)
                    .map_err(|e| ledger_error(e.into()))?;
                if permitted {
                    ledger.record_transmission(timestamp).map_err(ledger_error)?;
                }
                due.push((owner, timestamp, permitted));
            }
            staged.push(ledger);
        }

        let payload_bytes = self.config.lora.payload_bytes;
        let mut owners = Vec::with_capacity(due.len());
        let mut batch = Vec::with_capacity(due.len());
        for &(owner, timestamp, permitted) in &due {
            let device = self.devices[owner].device();
            let shadowing_db = self.channel.sample_shadowing(&mut self.rng);
            let link = self.channel.evaluate(
                device.distance_m,
                device.tx_power_dbm,
                device.spreading_factor,
                shadowing_db,
            );
            let measurement = self.traffic.next_measurement(device.id, timestamp, &mut self.rng);
            owners.push(owner);
            batch.push(TransmissionAttempt {
                device_id: device.id,
                timestamp_ms: timestamp,
                spreading_factor: device.spreading_factor,
                payload_bytes,
                airtime_ms: self.config.lora.airtime.airtime_ms(device.spreading_factor, payload_bytes),
                measurement,
                link,
                duty_cycle_ok: permitted,
                collided: false,
                channel_error: false,
            });
        }

        let contention = self.resolver.resolve(&mut batch);

        // one draw per on-air attempt, collided or not
        for attempt in batch.iter_mut().filter(|attempt| attempt.on_air()) {
            attempt.channel_error = self.rng.gen::<f64>() < attempt.link.per;
        }

        for (state, ledger) in self.devices.iter_mut().zip(staged) {
            state.replace_ledger(ledger);
        }

        let mut outcomes = Vec::with_capacity(batch.len());
        for (attempt, owner) in batch.into_iter().zip(owners) {
            trace!(
                "device {} at {} ms: {:?} (snr {:.1} dB, per {:.3})",
                attempt.device_id,
                attempt.timestamp_ms,
                attempt.phase(),
                attempt.link.snr_db,
                attempt.link.per
            );
            let outcome = attempt.into_outcome();
            self.devices[owner].apply_outcome(&outcome);
            self.stats.record(&outcome);
            outcomes.push(outcome);
        }

        let threshold = self.config.offline_threshold_ms;
        let mut status_changes = Vec::new();
        for state in &mut self.devices {
            if let Some(change) = state.update_status(to, threshold) {
                match change.to {
                    DeviceStatus::Offline => warn!(
                        "device {} went offline at {} ms (last delivery {:?})",
                        change.device_id,
                        to,
                        state.last_success()
                    ),
                    DeviceStatus::Online => info!("device {} back online at {} ms", change.device_id, to),
                }
                status_changes.push(change);
            }
        }

        self.stats.steps += 1;
        self.publish(&outcomes, &status_changes);

        debug!(
            "step {} ({}..{} ms]: {} attempts, {} on air, {} collided",
            self.clock.steps(),
            from,
            to,
            outcomes.len(),
            contention.on_air,
            contention.collided
        );

        Ok(StepReport {
            step: self.clock.steps(),
            from_ms: from,
            to_ms: to,
            outcomes,
            status_changes,
            contention,
        })
    }

    /// Sink failures are logged and otherwise ignored; state is already committed.
    fn publish(&mut self, outcomes: &[TransmissionOutcome], changes: &[StatusChange]) {
        for (index, sink) in self.sinks.iter_mut().enumerate() {
            for outcome in outcomes {
                if let Err(e) = sink.publish(outcome) {
                    warn!("sink {} rejected outcome of device {}: {}", index, outcome.device_id, e);
                }
            }
            for change in changes {
                if let Err(e) = sink.status_changed(change) {
                    warn!("sink {} rejected status change of device {}: {}", index, change.device_id, e);
                }
            }
            if let Err(e) = sink.flush() {
                warn!("sink {} failed to flush: {}", index, e);
            }
        }
    }

    pub fn status(&self) -> SimulationStatus {
        let now = self.clock.now();
        let devices: Vec<DeviceSummary> = self
            .devices
            .iter()
            .map(|state| {
                let device = state.device();
                DeviceSummary {
                    id: device.id,
                    name: device.name.clone(),
                    spreading_factor: device.spreading_factor,
                    distance_m: device.distance_m,
                    status: state.status(),
                    last_success_ms: state.last_success(),
                    transmissions_in_window: state.ledger().transmissions_in_window(now),
                    stats: *state.stats(),
                }
            })
            .collect();
        let offline = devices.iter().filter(|d| d.status == DeviceStatus::Offline).count();

        SimulationStatus {
            running: self.running,
            sim_time_ms: now,
            step_ms: self.clock.step_ms(),
            steps: self.clock.steps(),
            online: devices.len() - offline,
            offline,
            stats: self.stats,
            devices,
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn channel(&self) -> &ChannelModel {
        &self.channel
    }

    pub fn clock(&self) -> &SimulationClock {
        &self.clock
    }

    pub fn now(&self) -> SimTime {
        self.clock.now()
    }

    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    pub fn devices(&self) -> &[DeviceState] {
        &self.devices
    }

    pub fn device(&self, id: u32) -> Option<&DeviceState> {
        self.devices.iter().find(|state| state.device().id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{MAX_STEP_MS, MS_PER_MINUTE};
    use crate::error::ClockRegression;
    use crate::radio::GeoPoint;
    use crate::traffic::ConstantMeasurement;

    fn quiet_config() -> SimulationConfig {
        let mut config = SimulationConfig::default();
        config.channel.shadowing_sigma_db = 0.0;
        config
    }

    fn sensor(id: u32, meters: f64, sf: u8) -> DeviceConfig {
        DeviceConfig {
            id,
            name: String::new(),
            location: GeoPoint::new(23.8103, 90.4125).north_by(meters),
            spreading_factor: sf,
            tx_power_dbm: 14.0,
            interval_ms: None,
            phase_ms: 0,
            max_messages: None,
        }
    }

    #[test]
    fn test_duplicate_and_invalid_devices_rejected() {
        let roster = vec![sensor(1, 1000.0, 7), sensor(1, 2000.0, 8)];
        assert_eq!(
            SimulationDriver::new(quiet_config(), &roster).err(),
            Some(ConfigError::DuplicateDevice(1))
        );
        let roster = vec![sensor(2, 1000.0, 6)];
        assert_eq!(
            SimulationDriver::new(quiet_config(), &roster).err(),
            Some(ConfigError::InvalidSpreadingFactor(6))
        );
    }

    #[test]
    fn test_tick_requires_start() {
        let mut driver = SimulationDriver::new(quiet_config(), &[sensor(1, 1000.0, 7)]).unwrap();
        assert_eq!(driver.tick().unwrap(), None);
        assert_eq!(driver.now(), 0);

        driver.start();
        let report = driver.tick().unwrap().unwrap();
        assert_eq!((report.from_ms, report.to_ms), (0, 5 * MS_PER_MINUTE));
        assert_eq!(report.outcomes.len(), 1);

        driver.pause();
        assert!(driver.tick().unwrap().is_none());
        assert!(driver.advance_one_step().is_ok());
        assert_eq!(driver.clock().steps(), 2);
    }

    #[test]
    fn test_coarse_step_produces_every_scheduled_attempt() {
        let mut driver = SimulationDriver::new(quiet_config(), &[sensor(1, 1000.0, 7)])
            .unwrap()
            .with_measurement_source(ConstantMeasurement(1.0));
        driver.set_step_size(20 * MS_PER_MINUTE).unwrap();
        let report = driver.advance_one_step().unwrap();
        let times: Vec<u64> = report.outcomes.iter().map(|o| o.timestamp_ms).collect();
        assert_eq!(
            times,
            vec![5 * MS_PER_MINUTE, 10 * MS_PER_MINUTE, 15 * MS_PER_MINUTE, 20 * MS_PER_MINUTE]
        );
        assert!(report.outcomes.iter().all(|o| o.measurement == 1.0));
        assert_eq!(driver.set_step_size(0), Err(ConfigError::NonPositiveStepSize));
    }

    #[test]
    fn test_status_snapshot_counts() {
        let mut driver = SimulationDriver::new(quiet_config(), &[sensor(1, 1000.0, 7), sensor(2, 1500.0, 9)]).unwrap();
        driver.run_steps(3).unwrap();
        let status = driver.status();
        assert_eq!(status.sim_time_ms, 15 * MS_PER_MINUTE);
        assert_eq!(status.steps, 3);
        assert_eq!(status.online, 2);
        assert_eq!(status.stats.attempts, 6);
        assert_eq!(status.devices[0].transmissions_in_window, 3);
        assert_eq!(status.devices[1].stats.attempts, 3);
        assert!(status.stats.delivery_ratio() > 0.99);
    }

    #[test]
    fn test_oversized_step_is_refused_before_advancing() {
        let mut fast = sensor(1, 1000.0, 7);
        fast.interval_ms = Some(1000);
        let mut driver = SimulationDriver::new(quiet_config(), &[fast]).unwrap();

        assert!(matches!(
            driver.set_step_size(u64::MAX),
            Err(ConfigError::StepSizeTooLarge { .. })
        ));
        assert_eq!(driver.clock().step_ms(), 5 * MS_PER_MINUTE);

        driver.set_step_size(MAX_STEP_MS).unwrap();
        assert_eq!(
            driver.advance_one_step().err(),
            Some(SimError::StepTooLarge {
                attempts: MAX_STEP_MS / 1000,
                max: MAX_ATTEMPTS_PER_STEP
            })
        );
        assert_eq!(driver.now(), 0);
        assert_eq!(driver.clock().steps(), 0);
        assert_eq!(driver.stats().attempts, 0);

        driver.set_step_size(MS_PER_MINUTE).unwrap();
        assert_eq!(driver.advance_one_step().unwrap().outcomes.len(), 60);
    }

    #[test]
    fn test_ledger_error_rolls_back_the_step() {
        let roster = [sensor(1, 1000.0, 7)];
        let mut driver = SimulationDriver::new(quiet_config(), &roster).unwrap();
        let duty_cycle = driver.devices[0].device().duty_cycle;

        // a ledger that has already seen a later time than the clock will reach
        let mut ahead = DutyCycleLedger::new(duty_cycle);
        ahead.record_transmission(60 * MS_PER_MINUTE).unwrap();
        driver.devices[0].replace_ledger(ahead.clone());

        assert_eq!(
            driver.advance_one_step().err(),
            Some(SimError::Ledger {
                device_id: 1,
                source: LedgerError::ClockRegression(ClockRegression {
                    last_ms: 60 * MS_PER_MINUTE,
                    now_ms: 5 * MS_PER_MINUTE
                })
            })
        );
        assert_eq!(driver.now(), 0);
        assert_eq!(driver.clock().steps(), 0);
        assert_eq!(driver.devices[0].ledger().len(), 1);
        assert_eq!(
            driver.devices[0].ledger().next_available_at(),
            ahead.next_available_at()
        );
        assert_eq!(driver.stats().attempts, 0);
        assert_eq!(driver.devices[0].stats().attempts, 0);

        // the aborted step drew nothing from the random stream
        driver.devices[0].replace_ledger(DutyCycleLedger::new(duty_cycle));
        let mut fresh = SimulationDriver::new(quiet_config(), &roster).unwrap();
        assert_eq!(driver.run_steps(4).unwrap(), fresh.run_steps(4).unwrap());
    }
}
