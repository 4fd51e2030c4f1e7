use crate::clock::{SimTime, MAX_STEP_MS};
use crate::driver::SimulationDriver;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

pub const MAX_COMMAND_SIZE: usize = 512;
pub const MAX_STEPS_PER_COMMAND: u64 = 1000;

/// One newline-delimited JSON command from a control client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub id: u32,
    pub command_type: CommandType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandType {
    Ping,
    Start,
    Pause,
    Reset,
    Step { count: u64 },
    SetStepSize { step_ms: u64 },
    Status,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub id: u32,
    pub sim_time_ms: SimTime,
    pub status: ResponseStatus,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Success,
    Error,
    InvalidCommand,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Parse(String),
    #[error("command of {0} bytes exceeds {max} bytes", max = MAX_COMMAND_SIZE)]
    TooLarge(usize),
    #[error("command id must be non-zero")]
    MissingId,
    #[error("step count {0} outside 1..={max}", max = MAX_STEPS_PER_COMMAND)]
    InvalidStepCount(u64),
    #[error("step size {0} ms outside 1..={max}", max = MAX_STEP_MS)]
    InvalidStepSize(u64),
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Parses, validates and executes control commands against a driver.
#[derive(Debug, Default)]
pub struct ProtocolHandler {
    commands_handled: u64,
    last_command_id: Option<u32>,
}

impl ProtocolHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse_command(&self, json_str: &str) -> Result<ControlCommand, ProtocolError> {
        if json_str.len() > MAX_COMMAND_SIZE {
            return Err(ProtocolError::TooLarge(json_str.len()));
        }
        serde_json::from_str(json_str).map_err(|e| ProtocolError::Parse(e.to_string()))
    }

    pub fn validate_command(&self, command: &ControlCommand) -> Result<(), ProtocolError> {
        if command.id == 0 {
            return Err(ProtocolError::MissingId);
        }
        match command.command_type {
            CommandType::Step { count } if count == 0 || count > MAX_STEPS_PER_COMMAND => {
                Err(ProtocolError::InvalidStepCount(count))
            }
            CommandType::SetStepSize { step_ms } if step_ms == 0 || step_ms > MAX_STEP_MS => {
                Err(ProtocolError::InvalidStepSize(step_ms))
            }
            _ => Ok(()),
        }
    }

    pub fn serialize_response(&self, response: &ControlResponse) -> Result<String, ProtocolError> {
        serde_json::to_string(response).map_err(|e| ProtocolError::Serialization(e.to_string()))
    }

    pub fn create_response(
        &self,
        id: u32,
        driver: &SimulationDriver,
        status: ResponseStatus,
        message: Option<String>,
    ) -> ControlResponse {
        ControlResponse {
            id,
            sim_time_ms: driver.now(),
            status,
            message,
        }
    }

    /// Handles one raw line. Unparseable input yields an `InvalidCommand`
    /// response with id 0 rather than an error.
    pub fn handle_line(&mut self, driver: &mut SimulationDriver, line: &str) -> ControlResponse {
        match self.parse_command(line.trim()) {
            Ok(command) => self.execute(driver, &command),
            Err(e) => {
                warn!("rejected control input: {}", e);
                self.create_response(0, driver, ResponseStatus::InvalidCommand, Some(e.to_string()))
            }
        }
    }

    pub fn execute(&mut self, driver: &mut SimulationDriver, command: &ControlCommand) -> ControlResponse {
        if let Err(e) = self.validate_command(command) {
            return self.create_response(command.id, driver, ResponseStatus::InvalidCommand, Some(e.to_string()));
        }
        self.commands_handled += 1;
        self.last_command_id = Some(command.id);
        debug!("executing command {}: {:?}", command.id, command.command_type);

        let result: Result<Option<String>, String> = match command.command_type {
            CommandType::Ping => Ok(Some("pong".into())),
            CommandType::Start => {
                driver.start();
                Ok(None)
            }
            CommandType::Pause => {
                driver.pause();
                Ok(None)
            }
            CommandType::Reset => {
                driver.reset();
                Ok(None)
            }
            CommandType::Step { count } => Self::step(driver, count),
            CommandType::SetStepSize { step_ms } => driver
                .set_step_size(step_ms)
                .map(|()| None)
                .map_err(|e| e.to_string()),
            CommandType::Status => serde_json::to_string(&driver.status())
                .map(Some)
                .map_err(|e| e.to_string()),
        };

        match result {
            Ok(message) => self.create_response(command.id, driver, ResponseStatus::Success, message),
            Err(message) => self.create_response(command.id, driver, ResponseStatus::Error, Some(message)),
        }
    }

    fn step(driver: &mut SimulationDriver, count: u64) -> Result<Option<String>, String> {
        let mut attempts = 0;
        let mut delivered = 0;
        for done in 0..count {
            let report = driver
                .advance_one_step()
                .map_err(|e| format!("step {} of {} failed: {}", done + 1, count, e))?;
            attempts += report.outcomes.len();
            delivered += report.outcomes.iter().filter(|o| o.success).count();
        }
        Ok(Some(format!(
            "advanced {} step(s): {} attempts, {} delivered",
            count, attempts, delivered
        )))
    }

    pub fn commands_handled(&self) -> u64 {
        self.commands_handled
    }

    pub fn last_command_id(&self) -> Option<u32> {
        self.last_command_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oversized_command_rejected() {
        let handler = ProtocolHandler::new();
        let line = format!(r#"{{"id":1,"command_type":"Ping","pad":"{}"}}"#, "x".repeat(MAX_COMMAND_SIZE));
        assert!(matches!(handler.parse_command(&line), Err(ProtocolError::TooLarge(_))));
    }

    #[test]
    fn test_validation_bounds() {
        let handler = ProtocolHandler::new();
        let step = |count| ControlCommand {
            id: 1,
            command_type: CommandType::Step { count },
        };
        assert!(handler.validate_command(&step(1)).is_ok());
        assert!(handler.validate_command(&step(MAX_STEPS_PER_COMMAND)).is_ok());
        assert_eq!(handler.validate_command(&step(0)), Err(ProtocolError::InvalidStepCount(0)));
        assert_eq!(
            handler.validate_command(&ControlCommand {
                id: 0,
                command_type: CommandType::Ping
            }),
            Err(ProtocolError::MissingId)
        );
    }

    #[test]
    fn test_step_size_bounds() {
        let handler = ProtocolHandler::new();
        let set = |step_ms| ControlCommand {
            id: 1,
            command_type: CommandType::SetStepSize { step_ms },
        };
        assert!(handler.validate_command(&set(1)).is_ok());
        assert!(handler.validate_command(&set(MAX_STEP_MS)).is_ok());
        assert_eq!(handler.validate_command(&set(0)), Err(ProtocolError::InvalidStepSize(0)));
        assert_eq!(
            handler.validate_command(&set(MAX_STEP_MS + 1)),
            Err(ProtocolError::InvalidStepSize(MAX_STEP_MS + 1))
        );
        assert_eq!(
            handler.validate_command(&set(u64::MAX)),
            Err(ProtocolError::InvalidStepSize(u64::MAX))
        );
    }
}
