use lorasim::device::DeviceConfig;
use lorasim::protocol::*;
use lorasim::*;

fn driver() -> SimulationDriver {
    let mut config = SimulationConfig::default();
    config.channel.shadowing_sigma_db = 0.0;
    let gateway = config.gateway;
    let roster: Vec<DeviceConfig> = (1..=3)
        .map(|id| DeviceConfig {
            id,
            name: String::new(),
            location: gateway.north_by(1000.0 * id as f64),
            spreading_factor: 6 + id as u8,
            tx_power_dbm: 14.0,
            interval_ms: None,
            phase_ms: 1000 * id as u64,
            max_messages: None,
        })
        .collect();
    SimulationDriver::new(config, &roster).unwrap()
}

#[test]
fn test_command_parsing_valid() {
    let handler = ProtocolHandler::new();

    let ping = handler.parse_command(r#"{"id":123,"command_type":"Ping"}"#).unwrap();
    assert_eq!(ping.id, 123);
    assert_eq!(ping.command_type, CommandType::Ping);

    let step = handler
        .parse_command(r#"{"id":7,"command_type":{"Step":{"count":4}}}"#)
        .unwrap();
    assert_eq!(step.command_type, CommandType::Step { count: 4 });

    let size = handler
        .parse_command(r#"{"id":8,"command_type":{"SetStepSize":{"step_ms":60000}}}"#)
        .unwrap();
    assert_eq!(size.command_type, CommandType::SetStepSize { step_ms: 60_000 });
}

#[test]
fn test_command_parsing_invalid() {
    let handler = ProtocolHandler::new();
    assert!(matches!(handler.parse_command("{not json"), Err(ProtocolError::Parse(_))));
    assert!(matches!(
        handler.parse_command(r#"{"id":1,"command_type":"Launch"}"#),
        Err(ProtocolError::Parse(_))
    ));
}

#[test]
fn test_unparseable_line_gets_invalid_command_response() {
    let mut handler = ProtocolHandler::new();
    let mut driver = driver();
    let response = handler.handle_line(&mut driver, "garbage\n");
    assert_eq!(response.id, 0);
    assert_eq!(response.status, ResponseStatus::InvalidCommand);
    assert!(response.message.is_some());
    assert_eq!(handler.commands_handled(), 0);
}

#[test]
fn test_ping_and_lifecycle() {
    let mut handler = ProtocolHandler::new();
    let mut driver = driver();

    let pong = handler.handle_line(&mut driver, r#"{"id":1,"command_type":"Ping"}"#);
    assert_eq!(pong.status, ResponseStatus::Success);
    assert_eq!(pong.message.as_deref(), Some("pong"));

    handler.handle_line(&mut driver, r#"{"id":2,"command_type":"Start"}"#);
    assert!(driver.is_running());
    handler.handle_line(&mut driver, r#"{"id":3,"command_type":"Pause"}"#);
    assert!(!driver.is_running());
    assert_eq!(handler.commands_handled(), 3);
    assert_eq!(handler.last_command_id(), Some(3));
}

#[test]
fn test_step_and_reset_commands() {
    let mut handler = ProtocolHandler::new();
    let mut driver = driver();

    let response = handler.execute(
        &mut driver,
        &ControlCommand {
            id: 10,
            command_type: CommandType::Step { count: 3 },
        },
    );
    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.sim_time_ms, 15 * 60 * 1000);
    assert!(response.message.unwrap().contains("9 attempts"));

    let response = handler.handle_line(&mut driver, r#"{"id":11,"command_type":"Reset"}"#);
    assert_eq!(response.status, ResponseStatus::Success);
    assert_eq!(response.sim_time_ms, 0);
    assert_eq!(driver.stats().attempts, 0);
}

#[test]
fn test_invalid_parameters_rejected_before_execution() {
    let mut handler = ProtocolHandler::new();
    let mut driver = driver();

    let zero_steps = handler.handle_line(&mut driver, r#"{"id":5,"command_type":{"Step":{"count":0}}}"#);
    assert_eq!(zero_steps.status, ResponseStatus::InvalidCommand);

    let too_many = handler.handle_line(&mut driver, r#"{"id":6,"command_type":{"Step":{"count":5000}}}"#);
    assert_eq!(too_many.status, ResponseStatus::InvalidCommand);

    let zero_size = handler.handle_line(&mut driver, r#"{"id":7,"command_type":{"SetStepSize":{"step_ms":0}}}"#);
    assert_eq!(zero_size.status, ResponseStatus::InvalidCommand);

    let huge_size = handler.handle_line(
        &mut driver,
        r#"{"id":8,"command_type":{"SetStepSize":{"step_ms":18446744073709551615}}}"#,
    );
    assert_eq!(huge_size.status, ResponseStatus::InvalidCommand);
    assert_eq!(driver.clock().step_ms(), 5 * 60_000);

    let no_id = handler.handle_line(&mut driver, r#"{"id":0,"command_type":"Ping"}"#);
    assert_eq!(no_id.status, ResponseStatus::InvalidCommand);

    assert_eq!(driver.now(), 0);
    assert_eq!(handler.commands_handled(), 0);
}

#[test]
fn test_set_step_size_applies_to_next_step() {
    let mut handler = ProtocolHandler::new();
    let mut driver = driver();

    let response = handler.handle_line(&mut driver, r#"{"id":4,"command_type":{"SetStepSize":{"step_ms":60000}}}"#);
    assert_eq!(response.status, ResponseStatus::Success);
    driver.advance_one_step().unwrap();
    assert_eq!(driver.now(), 60_000);
}

#[test]
fn test_status_message_is_a_snapshot() {
    let mut handler = ProtocolHandler::new();
    let mut driver = driver();
    driver.run_steps(2).unwrap();

    let response = handler.handle_line(&mut driver, r#"{"id":9,"command_type":"Status"}"#);
    assert_eq!(response.status, ResponseStatus::Success);
    let status: SimulationStatus = serde_json::from_str(&response.message.unwrap()).unwrap();
    assert_eq!(status.sim_time_ms, 10 * 60 * 1000);
    assert_eq!(status.devices.len(), 3);
    assert_eq!(status.devices[2].spreading_factor, SpreadingFactor::Sf9);
    assert!(!status.running);

    let json = handler.serialize_response(&ControlResponse {
        id: 9,
        sim_time_ms: 0,
        status: ResponseStatus::Success,
        message: None,
    });
    assert_eq!(
        json.unwrap(),
        r#"{"id":9,"sim_time_ms":0,"status":"Success","message":null}"#
    );
}
