use crate::clock::{validate_step_ms, MS_PER_MINUTE};
use crate::duty_cycle::DutyCycleConfig;
use crate::error::ConfigError;
use crate::radio::{AirtimeModel, ChannelParams, GeoPoint};
use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_STEP_MS: u64 = 5 * MS_PER_MINUTE;
const DEFAULT_INTERVAL_MS: u64 = 5 * MS_PER_MINUTE;
const DEFAULT_OFFLINE_THRESHOLD_MS: u64 = 30 * MS_PER_MINUTE;
const DEFAULT_PAYLOAD_BYTES: usize = 12;
const MAX_PAYLOAD_BYTES: usize = 222;
const DEFAULT_SEED: u64 = 42;
const DEFAULT_GATEWAY: GeoPoint = GeoPoint::new(23.8103, 90.4125);

/// Settings of the LoRa MAC layer shared by all devices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoraConfig {
    pub airtime: AirtimeModel,
    pub payload_bytes: usize,
    /// Default transmission interval for devices that do not set their own.
    pub transmission_interval_ms: u64,
    pub duty_cycle: DutyCycleConfig,
}

impl Default for LoraConfig {
    fn default() -> Self {
        Self {
            airtime: AirtimeModel::default(),
            payload_bytes: DEFAULT_PAYLOAD_BYTES,
            transmission_interval_ms: DEFAULT_INTERVAL_MS,
            duty_cycle: DutyCycleConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub channel: ChannelParams,
    pub lora: LoraConfig,
    pub gateway: GeoPoint,
    pub step_ms: u64,
    pub offline_threshold_ms: u64,
    /// Seed of the single random stream used for shadowing, errors and traffic.
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            channel: ChannelParams::default(),
            lora: LoraConfig::default(),
            gateway: DEFAULT_GATEWAY,
            step_ms: DEFAULT_STEP_MS,
            offline_threshold_ms: DEFAULT_OFFLINE_THRESHOLD_MS,
            seed: DEFAULT_SEED,
        }
    }
}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_step_ms(self.step_ms)?;
        self.channel.validate()?;
        self.lora.airtime.validate()?;
        self.lora.duty_cycle.validate()?;
        if self.lora.payload_bytes == 0 || self.lora.payload_bytes > MAX_PAYLOAD_BYTES {
            return Err(ConfigError::InvalidPayload(self.lora.payload_bytes));
        }
        if self.lora.transmission_interval_ms == 0 {
            return Err(ConfigError::InvalidChannelParameter {
                name: "transmission_interval_ms",
                value: 0.0,
            });
        }
        if self.offline_threshold_ms == 0 {
            return Err(ConfigError::InvalidChannelParameter {
                name: "offline_threshold_ms",
                value: 0.0,
            });
        }
        if !self.gateway.is_valid() {
            return Err(ConfigError::InvalidLocation {
                device_id: 0,
                latitude: self.gateway.latitude,
                longitude: self.gateway.longitude,
            });
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: SimulationConfig = serde_json::from_str(json).map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&text)
    }
}
