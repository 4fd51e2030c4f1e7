use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use colored::*;
use lorasim::config::SimulationConfig;
use lorasim::device::DeviceStatus;
use lorasim::driver::{SimulationDriver, SimulationStatus, StepReport};
use lorasim::outcome::{FailureReason, JsonLinesSink, SimEvent, TransmissionOutcome};
use lorasim::protocol::{CommandType, ControlCommand, ControlResponse, ResponseStatus};
use lorasim::traffic::{demo_roster, DHAKA_AREAS};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8080";
const COMMAND_TIMEOUT_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let matches = App::new("lorasim")
        .version("0.1.0")
        .about("📡 LoRaWAN sensor network simulator - control client and offline runner")
        .setting(AppSettings::VersionlessSubcommands)
        .arg(
            Arg::with_name("host")
                .short("h")
                .long("host")
                .value_name("HOST")
                .help("Simulator host address")
                .takes_value(true)
                .default_value(DEFAULT_HOST)
                .global(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Simulator port")
                .takes_value(true)
                .default_value(DEFAULT_PORT)
                .global(true),
        )
        .arg(
            Arg::with_name("format")
                .short("f")
                .long("format")
                .value_name("FORMAT")
                .help("Output format")
                .takes_value(true)
                .possible_values(&["json", "table", "compact"])
                .default_value("table")
                .global(true),
        )
        .subcommand(SubCommand::with_name("ping").about("🏓 Test connection to the simulator"))
        .subcommand(SubCommand::with_name("start").about("▶️  Resume automatic stepping"))
        .subcommand(SubCommand::with_name("pause").about("⏸️  Stop automatic stepping between steps"))
        .subcommand(
            SubCommand::with_name("reset")
                .about("🔄 Clear clock, ledgers and statuses; keep the roster"),
        )
        .subcommand(
            SubCommand::with_name("step")
                .about("⏭️  Advance the simulation manually")
                .arg(
                    Arg::with_name("count")
                        .short("n")
                        .long("count")
                        .value_name("COUNT")
                        .help("Number of steps")
                        .takes_value(true)
                        .default_value("1")
                        .validator(validate_positive),
                ),
        )
        .subcommand(
            SubCommand::with_name("step-size")
                .about("⏱️  Change the simulated duration of one step")
                .arg(
                    Arg::with_name("ms")
                        .help("Step size in milliseconds")
                        .required(true)
                        .validator(validate_positive),
                ),
        )
        .subcommand(SubCommand::with_name("status").about("📊 Show clock, counters and device states"))
        .subcommand(SubCommand::with_name("watch").about("👀 Stream transmission outcomes (Ctrl+C to stop)"))
        .subcommand(
            SubCommand::with_name("run")
                .about("🧪 Run a simulation locally without a server")
                .arg(
                    Arg::with_name("steps")
                        .short("s")
                        .long("steps")
                        .value_name("STEPS")
                        .help("Number of steps to run")
                        .takes_value(true)
                        .default_value("12")
                        .validator(validate_positive),
                )
                .arg(
                    Arg::with_name("devices")
                        .short("n")
                        .long("devices")
                        .value_name("COUNT")
                        .help("Size of the demo roster")
                        .takes_value(true)
                        .default_value("20"),
                )
                .arg(
                    Arg::with_name("seed")
                        .long("seed")
                        .value_name("SEED")
                        .help("Override the configured random seed")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("config")
                        .short("c")
                        .long("config")
                        .value_name("FILE")
                        .help("JSON simulation configuration")
                        .takes_value(true),
                ),
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse::<u16>()?;
    let format = matches.value_of("format").unwrap_or("table");

    match matches.subcommand() {
        ("ping", _) => handle_simple(host, port, format, CommandType::Ping, "Ping").await?,
        ("start", _) => handle_simple(host, port, format, CommandType::Start, "Start").await?,
        ("pause", _) => handle_simple(host, port, format, CommandType::Pause, "Pause").await?,
        ("reset", _) => handle_simple(host, port, format, CommandType::Reset, "Reset").await?,
        ("step", Some(sub_matches)) => {
            let count = sub_matches.value_of("count").unwrap_or("1").parse::<u64>()?;
            handle_simple(host, port, format, CommandType::Step { count }, "Step").await?;
        }
        ("step-size", Some(sub_matches)) => {
            let step_ms = sub_matches.value_of("ms").unwrap_or_default().parse::<u64>()?;
            handle_simple(host, port, format, CommandType::SetStepSize { step_ms }, "Step size").await?;
        }
        ("status", _) => handle_status(host, port, format).await?,
        ("watch", _) => handle_watch(host, port, format).await?,
        ("run", Some(sub_matches)) => handle_run(sub_matches, format)?,
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
            println!("{}", "Quick start:".bright_green());
            println!("  {} Start the simulator server", "lorasim-simulator".bright_cyan());
            println!("  {} Test connection", "lorasim ping".bright_cyan());
            println!("  {} Stream outcomes", "lorasim watch".bright_cyan());
            println!("  {} Offline run", "lorasim run --steps 24".bright_cyan());
        }
    }

    Ok(())
}

fn validate_positive(value: String) -> Result<(), String> {
    match value.parse::<u64>() {
        Ok(n) if n > 0 => Ok(()),
        _ => Err("must be a positive integer".into()),
    }
}

async fn handle_simple(
    host: &str,
    port: u16,
    format: &str,
    command_type: CommandType,
    action: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = send_command(host, port, command_type).await?;
    print_command_result(action, &response, format)
}

async fn handle_status(host: &str, port: u16, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let response = send_command(host, port, CommandType::Status).await?;
    let parsed: ControlResponse = serde_json::from_str(&response)?;
    let status: SimulationStatus = match (&parsed.status, &parsed.message) {
        (ResponseStatus::Success, Some(message)) => serde_json::from_str(message)?,
        _ => return print_command_result("Status", &response, format),
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&status)?),
        "compact" => println!(
            "[{}] {} | {} online | {} offline | {:.1}% delivered",
            format_sim_time(status.sim_time_ms),
            if status.running { "RUNNING".green() } else { "PAUSED".yellow() },
            status.online,
            status.offline,
            status.stats.delivery_ratio() * 100.0
        ),
        _ => print_status_table(&status),
    }
    Ok(())
}

async fn handle_watch(host: &str, port: u16, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let stream = TcpStream::connect((host, port)).await?;
    let mut lines = BufReader::new(stream).lines();

    if format == "table" {
        println!("{}", "📡 Watching transmission outcomes (Press Ctrl+C to stop)...".bright_blue().bold());
        print_outcome_header();
    }

    while let Some(line) = lines.next_line().await? {
        if format == "json" {
            println!("{}", line);
            continue;
        }
        match serde_json::from_str::<SimEvent>(&line) {
            Ok(SimEvent::Outcome(outcome)) => match format {
                "compact" => print_outcome_compact(&outcome),
                _ => print_outcome_row(&outcome),
            },
            Ok(SimEvent::Status(change)) => {
                let label = match change.to {
                    DeviceStatus::Offline => "OFFLINE".bright_red(),
                    DeviceStatus::Online => "ONLINE".bright_green(),
                };
                println!(
                    "{} device {} is {} at {}",
                    "⚠️".yellow(),
                    change.device_id,
                    label,
                    format_sim_time(change.timestamp_ms)
                );
            }
            Err(_) => {}
        }
    }
    Ok(())
}

fn handle_run(matches: &ArgMatches<'_>, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = match matches.value_of("config") {
        Some(path) => SimulationConfig::from_json_file(path)?,
        None => SimulationConfig::default(),
    };
    if let Some(seed) = matches.value_of("seed") {
        config.seed = seed.parse()?;
    }
    let steps = matches.value_of("steps").unwrap_or("12").parse::<u64>()?;
    let count = matches.value_of("devices").unwrap_or("20").parse::<usize>()?;

    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let roster = demo_roster(count, &DHAKA_AREAS, &config.gateway, config.lora.transmission_interval_ms, &mut rng);
    let mut driver = SimulationDriver::new(config, &roster)?;

    if format == "json" {
        driver.add_sink(JsonLinesSink::new(std::io::stdout()));
        driver.run_steps(steps)?;
        return Ok(());
    }

    if format == "table" {
        println!(
            "{} {} devices, {} steps of {}",
            "🧪 Offline run:".bright_blue().bold(),
            roster.len(),
            steps,
            format_sim_time(driver.clock().step_ms())
        );
        print_step_header();
    }
    for _ in 0..steps {
        let report = driver.advance_one_step()?;
        match format {
            "compact" => print_step_compact(&report),
            _ => print_step_row(&report),
        }
    }

    let stats = driver.stats();
    println!(
        "{} {} attempts: {} delivered, {} duty-cycle, {} collisions, {} channel errors ({:.1}% delivered)",
        "📊".bright_white(),
        stats.attempts,
        stats.delivered.to_string().bright_green(),
        stats.blocked_by_duty_cycle.to_string().yellow(),
        stats.collided.to_string().bright_red(),
        stats.channel_errors.to_string().red(),
        stats.delivery_ratio() * 100.0
    );
    Ok(())
}

async fn send_command(host: &str, port: u16, command_type: CommandType) -> Result<String, Box<dyn std::error::Error>> {
    let addr = format!("{}:{}", host, port);
    let stream = match TcpStream::connect(&addr).await {
        Ok(stream) => stream,
        Err(e) => {
            eprintln!("{} Failed to connect to simulator at {}", "❌".red(), addr.bright_white());
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("{} Server is not running. Start it with:", "💡".yellow());
                eprintln!("   {}", "cargo run --bin lorasim-simulator".bright_cyan());
            } else {
                eprintln!("{} Network error: {}", "🔌".yellow(), e.to_string().bright_red());
            }
            return Err(e.into());
        }
    };

    let command = ControlCommand {
        id: next_command_id(),
        command_type,
    };
    let command_json = serde_json::to_string(&command)?;

    let exchange = async {
        let (reader, mut writer) = stream.into_split();
        writer.write_all(command_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;

        // outcome events share the connection; skip them until our response arrives
        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            if let Ok(response) = serde_json::from_str::<ControlResponse>(&line) {
                if response.id == command.id || response.id == 0 {
                    return Ok(line);
                }
            }
        }
        Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "Server closed connection",
        ))
    };

    match tokio::time::timeout(std::time::Duration::from_secs(COMMAND_TIMEOUT_SECS), exchange).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            eprintln!("{} Command timed out after {} seconds", "⏰".yellow(), COMMAND_TIMEOUT_SECS);
            Err("Command timeout".into())
        }
    }
}

fn next_command_id() -> u32 {
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(1);
    ((millis % u128::from(u32::MAX)) as u32).max(1)
}

fn print_command_result(action: &str, response: &str, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    if format == "json" {
        println!("{}", response);
        return Ok(());
    }
    let parsed: ControlResponse = serde_json::from_str(response)?;
    let message = parsed.message.unwrap_or_default();
    match (format, parsed.status) {
        ("compact", ResponseStatus::Success) => println!("{}", "OK".bright_green()),
        ("compact", status) => println!("{} {:?} {}", "ERR".bright_red(), status, message),
        (_, ResponseStatus::Success) => {
            println!(
                "{} {} ok at {} {}",
                "✅".green(),
                action.bright_white(),
                format_sim_time(parsed.sim_time_ms).bright_cyan(),
                message.dimmed()
            );
        }
        (_, ResponseStatus::InvalidCommand) => {
            println!("{} {} rejected: {}", "❌".red(), action.bright_white(), message.bright_red());
        }
        (_, ResponseStatus::Error) => {
            println!("{} {} failed: {}", "⚠️".yellow(), action.bright_white(), message.bright_red());
        }
    }
    Ok(())
}

fn format_sim_time(ms: u64) -> String {
    let seconds = ms / 1000;
    format!("{:02}:{:02}:{:02}", seconds / 3600, (seconds / 60) % 60, seconds % 60)
}

fn failure_label(reason: FailureReason) -> ColoredString {
    match reason {
        FailureReason::None => "DELIVERED".bright_green(),
        FailureReason::DutyCycle => "DUTY-CYCLE".yellow(),
        FailureReason::Collision => "COLLISION".bright_red(),
        FailureReason::ChannelError => "CHANNEL".red(),
    }
}

fn print_status_table(status: &SimulationStatus) {
    let state = if status.running { "RUNNING".bright_green() } else { "PAUSED".yellow() };
    println!("{}", "📊 Simulation Status".bright_blue().bold());
    println!("   Time:      {} ({} steps of {} ms)", format_sim_time(status.sim_time_ms), status.steps, status.step_ms);
    println!("   State:     {}", state);
    println!(
        "   Devices:   {} online, {} offline",
        status.online.to_string().bright_green(),
        status.offline.to_string().bright_red()
    );
    println!(
        "   Delivered: {}/{} ({:.1}%)",
        status.stats.delivered,
        status.stats.attempts,
        status.stats.delivery_ratio() * 100.0
    );
    println!("{}", "┌──────┬──────────────────────────────┬──────┬──────────┬─────────┬──────────┬────────────┐".bright_white());
    println!("{}", "│ ID   │ Name                         │ SF   │ Distance │ Status  │ Window   │ Delivered  │".bright_white());
    println!("{}", "├──────┼──────────────────────────────┼──────┼──────────┼─────────┼──────────┼────────────┤".bright_white());
    for device in &status.devices {
        let device_state = match device.status {
            DeviceStatus::Online => "ONLINE ".bright_green(),
            DeviceStatus::Offline => "OFFLINE".bright_red(),
        };
        println!(
            "│ {:<4} │ {:<28} │ {:<4} │ {:>6.0} m │ {} │ {:>8} │ {:>4}/{:<5} │",
            device.id,
            truncate(&device.name, 28),
            device.spreading_factor.to_string(),
            device.distance_m,
            device_state,
            device.transmissions_in_window,
            device.stats.delivered,
            device.stats.attempts
        );
    }
    println!("{}", "└──────┴──────────────────────────────┴──────┴──────────┴─────────┴──────────┴────────────┘".bright_white());
}

fn truncate(text: &str, width: usize) -> String {
    text.chars().take(width).collect()
}

fn print_outcome_header() {
    println!("{}", "│ Time     │ Device │ SF   │  SNR dB │ RSSI dBm │   PER │ Result     │".bright_white());
}

fn print_outcome_row(outcome: &TransmissionOutcome) {
    println!(
        "│ {} │ {:>6} │ {:<4} │ {:>7.1} │ {:>8.1} │ {:>5.3} │ {:<10} │",
        format_sim_time(outcome.timestamp_ms),
        outcome.device_id,
        outcome.spreading_factor.to_string(),
        outcome.snr_db,
        outcome.rssi_dbm,
        outcome.per,
        failure_label(outcome.failure_reason)
    );
}

fn print_outcome_compact(outcome: &TransmissionOutcome) {
    println!(
        "[{}] #{} {} {}",
        format_sim_time(outcome.timestamp_ms),
        outcome.device_id,
        outcome.spreading_factor,
        failure_label(outcome.failure_reason)
    );
}

fn print_step_header() {
    println!("{}", "│ Step │ Time     │ Attempts │ Delivered │ Duty │ Collided │ Channel │ Offline │".bright_white());
}

fn count_reason(report: &StepReport, reason: FailureReason) -> usize {
    report.outcomes.iter().filter(|o| o.failure_reason == reason).count()
}

fn print_step_row(report: &StepReport) {
    let offline = report
        .status_changes
        .iter()
        .filter(|change| change.to == DeviceStatus::Offline)
        .count();
    println!(
        "│ {:>4} │ {} │ {:>8} │ {:>9} │ {:>4} │ {:>8} │ {:>7} │ {:>7} │",
        report.step,
        format_sim_time(report.to_ms),
        report.outcomes.len(),
        count_reason(report, FailureReason::None).to_string().bright_green(),
        count_reason(report, FailureReason::DutyCycle).to_string().yellow(),
        count_reason(report, FailureReason::Collision).to_string().bright_red(),
        count_reason(report, FailureReason::ChannelError).to_string().red(),
        offline
    );
}

fn print_step_compact(report: &StepReport) {
    println!(
        "[{}] step {} | {}/{} delivered",
        format_sim_time(report.to_ms),
        report.step,
        count_reason(report, FailureReason::None),
        report.outcomes.len()
    );
}
