use crate::clock::SimTime;
use crate::device::DeviceStatus;
use crate::error::SinkError;
use crate::radio::{LinkQuality, SpreadingFactor};
use serde::{Deserialize, Serialize};
use std::io::Write;
use tokio::sync::broadcast;

/// Why an attempt was not delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureReason {
    None,
    DutyCycle,
    Collision,
    ChannelError,
}

/// Terminal per-attempt state: `BLOCKED_BY_DUTY_CYCLE`, or one of the three
/// outcomes of `ATTEMPTED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttemptPhase {
    BlockedByDutyCycle,
    Collided,
    ChannelFailure,
    Delivered,
}

/// One device's transmission within a single step. Lives only for the step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmissionAttempt {
    pub device_id: u32,
    pub timestamp_ms: SimTime,
    pub spreading_factor: SpreadingFactor,
    pub payload_bytes: usize,
    pub airtime_ms: u64,
    pub measurement: f64,
    pub link: LinkQuality,
    pub duty_cycle_ok: bool,
    pub collided: bool,
    pub channel_error: bool,
}

impl TransmissionAttempt {
    /// End of the airtime interval, clamped to the last representable instant.
    pub fn end_ms(&self) -> SimTime {
        self.timestamp_ms.saturating_add(self.airtime_ms)
    }

    /// Whether the attempt actually occupied the channel.
    pub fn on_air(&self) -> bool {
        self.duty_cycle_ok
    }

    pub fn success(&self) -> bool {
        self.duty_cycle_ok && !self.collided && !self.channel_error
    }

    /// Checks are ordered: a blocked attempt never reached the air, and a collided
    /// one is reported as a collision even if its channel draw also failed.
    pub fn failure_reason(&self) -> FailureReason {
        if !self.duty_cycle_ok {
            FailureReason::DutyCycle
        } else if self.collided {
            FailureReason::Collision
        } else if self.channel_error {
            FailureReason::ChannelError
        } else {
            FailureReason::None
        }
    }

    pub fn phase(&self) -> AttemptPhase {
        match self.failure_reason() {
            FailureReason::DutyCycle => AttemptPhase::BlockedByDutyCycle,
            FailureReason::Collision => AttemptPhase::Collided,
            FailureReason::ChannelError => AttemptPhase::ChannelFailure,
            FailureReason::None => AttemptPhase::Delivered,
        }
    }

    pub fn into_outcome(self) -> TransmissionOutcome {
        TransmissionOutcome {
            success: self.success(),
            failure_reason: self.failure_reason(),
            device_id: self.device_id,
            timestamp_ms: self.timestamp_ms,
            spreading_factor: self.spreading_factor,
            airtime_ms: self.airtime_ms,
            measurement: self.measurement,
            path_loss_db: self.link.path_loss_db,
            snr_db: self.link.snr_db,
            rssi_dbm: self.link.rssi_dbm,
            per: self.link.per,
        }
    }
}

/// Finalized record handed to downstream consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransmissionOutcome {
    pub device_id: u32,
    pub timestamp_ms: SimTime,
    pub spreading_factor: SpreadingFactor,
    pub airtime_ms: u64,
    pub measurement: f64,
    pub path_loss_db: f64,
    pub snr_db: f64,
    pub rssi_dbm: f64,
    pub per: f64,
    pub success: bool,
    pub failure_reason: FailureReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChange {
    pub device_id: u32,
    pub timestamp_ms: SimTime,
    pub from: DeviceStatus,
    pub to: DeviceStatus,
}

/// Everything a step hands to the outside world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SimEvent {
    Outcome(TransmissionOutcome),
    Status(StatusChange),
}

/// Downstream consumer of the outcome stream (persistence, alerting, UI).
///
/// Publishing must not block. A failing sink is logged by the driver and never
/// rolls back simulation state.
pub trait OutcomeSink: Send {
    fn publish(&mut self, outcome: &TransmissionOutcome) -> Result<(), SinkError>;

    fn status_changed(&mut self, _change: &StatusChange) -> Result<(), SinkError> {
        Ok(())
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Collects everything in memory.
#[derive(Debug, Default)]
pub struct VecSink {
    pub outcomes: Vec<TransmissionOutcome>,
    pub status_changes: Vec<StatusChange>,
}

impl OutcomeSink for VecSink {
    fn publish(&mut self, outcome: &TransmissionOutcome) -> Result<(), SinkError> {
        self.outcomes.push(outcome.clone());
        Ok(())
    }

    fn status_changed(&mut self, change: &StatusChange) -> Result<(), SinkError> {
        self.status_changes.push(*change);
        Ok(())
    }
}

/// Non-blocking handoff to any number of async subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<SimEvent>,
}

impl BroadcastSink {
    pub fn new(tx: broadcast::Sender<SimEvent>) -> Self {
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SimEvent> {
        self.tx.subscribe()
    }

    fn send(&self, event: SimEvent) -> Result<(), SinkError> {
        // no subscribers is not an error; events are simply dropped
        if self.tx.receiver_count() == 0 {
            return Ok(());
        }
        self.tx.send(event).map(|_| ()).map_err(|_| SinkError::Closed)
    }
}

impl OutcomeSink for BroadcastSink {
    fn publish(&mut self, outcome: &TransmissionOutcome) -> Result<(), SinkError> {
        self.send(SimEvent::Outcome(outcome.clone()))
    }

    fn status_changed(&mut self, change: &StatusChange) -> Result<(), SinkError> {
        self.send(SimEvent::Status(*change))
    }
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }

    fn write_event(&mut self, event: &SimEvent) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, event)?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }
}

impl<W: Write + Send> OutcomeSink for JsonLinesSink<W> {
    fn publish(&mut self, outcome: &TransmissionOutcome) -> Result<(), SinkError> {
        self.write_event(&SimEvent::Outcome(outcome.clone()))
    }

    fn status_changed(&mut self, change: &StatusChange) -> Result<(), SinkError> {
        self.write_event(&SimEvent::Status(*change))
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.writer.flush()?;
        Ok(())
    }
}
