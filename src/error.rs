use crate::clock::SimTime;
use thiserror::Error;

/// Misconfiguration detected while building a simulation. Always fatal.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid spreading factor SF{0} (expected SF7..SF12)")]
    InvalidSpreadingFactor(u8),
    #[error("transmit power {0} dBm outside 0..=30 dBm")]
    InvalidTxPower(f64),
    #[error("step size must be positive")]
    NonPositiveStepSize,
    #[error("step size {step_ms} ms exceeds {max_ms} ms")]
    StepSizeTooLarge { step_ms: u64, max_ms: u64 },
    #[error("duplicate device id {0}")]
    DuplicateDevice(u32),
    #[error("invalid channel parameter {name}: {value}")]
    InvalidChannelParameter { name: &'static str, value: f64 },
    #[error("invalid duty cycle: {0}")]
    InvalidDutyCycle(String),
    #[error("invalid schedule for device {device_id}: {reason}")]
    InvalidSchedule { device_id: u32, reason: String },
    #[error("invalid location for device {device_id}: ({latitude}, {longitude})")]
    InvalidLocation {
        device_id: u32,
        latitude: f64,
        longitude: f64,
    },
    #[error("invalid payload size: {0} bytes")]
    InvalidPayload(usize),
    #[error("failed to load configuration: {0}")]
    Load(String),
}

/// A ledger was queried with a time earlier than one it has already seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("clock moved backwards: ledger at {last_ms} ms, queried at {now_ms} ms")]
pub struct ClockRegression {
    pub last_ms: SimTime,
    pub now_ms: SimTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error(transparent)]
    ClockRegression(#[from] ClockRegression),
    #[error("duty-cycle quota of {max_messages} exhausted at {now_ms} ms")]
    QuotaExhausted { max_messages: usize, now_ms: SimTime },
}

/// Errors that abort a simulation operation. Delivery failures are never errors.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SimError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("device {device_id}: {source}")]
    Ledger {
        device_id: u32,
        #[source]
        source: LedgerError,
    },
    #[error("simulated time overflows: {now_ms} ms + {step_ms} ms")]
    TimeOverflow { now_ms: SimTime, step_ms: u64 },
    #[error("step would produce {attempts} attempts, more than {max}")]
    StepTooLarge { attempts: u64, max: u64 },
}

/// Failure reported by an outcome sink. Never affects simulation state.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink closed")]
    Closed,
    #[error("sink i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("sink encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}
