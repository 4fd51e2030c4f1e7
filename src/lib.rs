//! # LoRaWAN Sensor Network Simulator
//!
//! Simulation core for a field of battery-powered LoRa sensors reporting to a
//! single gateway: stochastic link evaluation, regulatory duty-cycle
//! enforcement, spreading-factor aware collision detection and per-device
//! liveness tracking, all driven by one logical clock.
//!
//! ## Features
//!
//! - **Channel model**: log-distance path loss with log-normal shadowing, SNR and
//!   logistic packet error probability per spreading factor
//! - **Duty cycle**: sliding-window quota per device, bounded memory
//! - **Contention**: network-wide interval-overlap collisions within a step
//! - **Determinism**: a single seeded random stream; reset and replay reproduce
//!   the outcome stream exactly
//! - **Outcome sinks**: in-memory, broadcast channel or JSON lines
//!
//! ## Quick Start
//!
//! ```rust
//! use lorasim::{GeoPoint, SimulationConfig, SimulationDriver};
//! use lorasim::device::DeviceConfig;
//!
//! let config = SimulationConfig::default();
//! let sensor = DeviceConfig {
//!     id: 1,
//!     name: "Gulshan Sensor 1".into(),
//!     location: config.gateway.north_by(1_000.0),
//!     spreading_factor: 7,
//!     tx_power_dbm: 14.0,
//!     interval_ms: None,
//!     phase_ms: 0,
//!     max_messages: None,
//! };
//!
//! let mut driver = SimulationDriver::new(config, &[sensor]).unwrap();
//! let report = driver.advance_one_step().unwrap();
//! for outcome in &report.outcomes {
//!     println!("device {} delivered: {}", outcome.device_id, outcome.success);
//! }
//! # let _ = GeoPoint::new(0.0, 0.0);
//! ```
//!
//! ## Architecture
//!
//! - [`radio`] - spreading factors, airtime and the channel model
//! - [`duty_cycle`] - per-device regulatory ledger
//! - [`contention`] - collision resolution over one step's batch
//! - [`device`] - roster entries, validated devices and their mutable state
//! - [`driver`] - clock ownership and the per-step algorithm
//! - [`protocol`] - JSON control commands for the simulator binary

pub mod clock;
pub mod config;
pub mod contention;
pub mod device;
pub mod driver;
pub mod duty_cycle;
pub mod error;
pub mod outcome;
pub mod protocol;
pub mod radio;
pub mod traffic;

// Re-export main public types for convenience
pub use clock::{SimTime, SimulationClock};
pub use config::SimulationConfig;
pub use driver::{SimulationDriver, SimulationStatus, StepReport};
pub use error::{ConfigError, SimError};
pub use outcome::{FailureReason, OutcomeSink, TransmissionOutcome};
pub use radio::{ChannelModel, GeoPoint, SpreadingFactor};
