use clap::{App, Arg};
use lorasim::config::SimulationConfig;
use lorasim::device::DeviceConfig;
use lorasim::driver::SimulationDriver;
use lorasim::error::SimError;
use lorasim::outcome::{BroadcastSink, SimEvent};
use lorasim::protocol::ProtocolHandler;
use lorasim::traffic::{demo_roster, DHAKA_AREAS};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tokio::time;
use tracing::{error, info, warn};

const DEFAULT_PORT: &str = "8080";
const DEFAULT_TICK_MS: &str = "1000";
const DEFAULT_DEVICE_COUNT: &str = "20";
const EVENT_BROADCAST_BUFFER_SIZE: usize = 1024;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("lorasim-simulator")
        .version("0.1.0")
        .about("LoRaWAN sensor network simulator with a TCP control server")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("JSON simulation configuration")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("roster")
                .short("r")
                .long("roster")
                .value_name("FILE")
                .help("JSON array of devices; a demo roster is generated when omitted")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("devices")
                .short("n")
                .long("devices")
                .value_name("COUNT")
                .help("Size of the generated demo roster")
                .takes_value(true)
                .default_value(DEFAULT_DEVICE_COUNT),
        )
        .arg(
            Arg::with_name("seed")
                .long("seed")
                .value_name("SEED")
                .help("Override the configured random seed")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("Control server port")
                .takes_value(true)
                .default_value(DEFAULT_PORT),
        )
        .arg(
            Arg::with_name("tick")
                .short("t")
                .long("tick-ms")
                .value_name("MS")
                .help("Wall-clock pause between automatic steps")
                .takes_value(true)
                .default_value(DEFAULT_TICK_MS),
        )
        .arg(
            Arg::with_name("paused")
                .long("paused")
                .help("Wait for a Start command before stepping"),
        )
        .get_matches();

    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse::<u16>()?;
    let tick_ms = matches.value_of("tick").unwrap_or(DEFAULT_TICK_MS).parse::<u64>()?;
    if tick_ms == 0 {
        return Err("tick interval must be positive".into());
    }

    let mut config = match matches.value_of("config") {
        Some(path) => SimulationConfig::from_json_file(path)?,
        None => SimulationConfig::default(),
    };
    if let Some(seed) = matches.value_of("seed") {
        config.seed = seed.parse()?;
    }

    let roster = match matches.value_of("roster") {
        Some(path) => load_roster(path)?,
        None => {
            let count = matches.value_of("devices").unwrap_or(DEFAULT_DEVICE_COUNT).parse::<usize>()?;
            let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
            demo_roster(
                count,
                &DHAKA_AREAS,
                &config.gateway,
                config.lora.transmission_interval_ms,
                &mut rng,
            )
        }
    };

    println!("📡 LoRaWAN Sensor Network Simulator");
    println!("===================================");
    println!("   Devices:   {}", roster.len());
    println!("   Step size: {} ms simulated per {} ms tick", config.step_ms, tick_ms);
    println!("   Seed:      {}", config.seed);

    let (event_tx, _) = broadcast::channel::<SimEvent>(EVENT_BROADCAST_BUFFER_SIZE);
    let mut driver = SimulationDriver::new(config, &roster)?;
    driver.add_sink(BroadcastSink::new(event_tx.clone()));
    if !matches.is_present("paused") {
        driver.start();
    }
    let driver = Arc::new(Mutex::new(driver));

    let tcp_driver = Arc::clone(&driver);
    let tcp_event_tx = event_tx.clone();
    let tcp_server = tokio::spawn(async move {
        if let Err(e) = start_tcp_server(port, tcp_driver, tcp_event_tx).await {
            error!("TCP server error: {}", e);
        }
    });

    let mut interval = time::interval(Duration::from_millis(tick_ms));
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let result = {
                    let mut driver_guard = driver.lock().await;
                    driver_guard.tick()
                };
                match result {
                    Ok(Some(report)) => {
                        let delivered = report.outcomes.iter().filter(|o| o.success).count();
                        info!(
                            "⏱️  step {} at {} ms: {} attempts, {} delivered, {} collided",
                            report.step,
                            report.to_ms,
                            report.outcomes.len(),
                            delivered,
                            report.contention.collided
                        );
                    }
                    Ok(None) => {}
                    Err(e @ SimError::StepTooLarge { .. }) => {
                        warn!("⚠️  {}; pausing until the step size is lowered", e);
                        driver.lock().await.pause();
                    }
                    Err(e) => {
                        error!("❌ Simulation error: {}", e);
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    {
        let mut driver_guard = driver.lock().await;
        driver_guard.pause();
        let stats = driver_guard.stats();
        println!(
            "📊 {} steps, {} attempts, {:.1}% delivered",
            stats.steps,
            stats.attempts,
            stats.delivery_ratio() * 100.0
        );
    }

    tcp_server.abort();
    println!("🛑 Simulator stopped");
    Ok(())
}

fn load_roster(path: &str) -> Result<Vec<DeviceConfig>, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path, e))?;
    let roster: Vec<DeviceConfig> = serde_json::from_str(&text)?;
    Ok(roster)
}

async fn start_tcp_server(
    port: u16,
    driver: Arc<Mutex<SimulationDriver>>,
    event_tx: broadcast::Sender<SimEvent>,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    info!("🌐 TCP control server listening on port {}", port);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("🔗 New client connected: {}", addr);
                let client_driver = Arc::clone(&driver);
                let client_events = event_tx.subscribe();

                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, client_driver, client_events).await {
                        warn!("Client {} error: {}", addr, e);
                    }
                    info!("🔌 Client {} disconnected", addr);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    driver: Arc<Mutex<SimulationDriver>>,
    mut events: broadcast::Receiver<SimEvent>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (reader, writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let writer = Arc::new(Mutex::new(writer));

    let event_writer = Arc::clone(&writer);
    let event_task = tokio::spawn(async move {
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("client lagging, {} events dropped", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            };
            let line = match serde_json::to_string(&event) {
                Ok(line) => line,
                Err(e) => {
                    warn!("Failed to encode event: {}", e);
                    continue;
                }
            };
            let mut writer_guard = event_writer.lock().await;
            if let Err(e) = writer_guard.write_all(line.as_bytes()).await {
                warn!("Failed to send event: {}", e);
                break;
            }
            if let Err(e) = writer_guard.write_all(b"\n").await {
                warn!("Failed to send event newline: {}", e);
                break;
            }
        }
    });

    let mut handler = ProtocolHandler::new();
    let mut line = String::new();
    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let response = {
                    let mut driver_guard = driver.lock().await;
                    handler.handle_line(&mut driver_guard, trimmed)
                };
                let response_json = handler.serialize_response(&response)?;
                {
                    let mut writer_guard = writer.lock().await;
                    writer_guard.write_all(response_json.as_bytes()).await?;
                    writer_guard.write_all(b"\n").await?;
                }
                info!("📤 Sent response: {}", response_json);
            }
            Err(e) => {
                error!("Error reading from client: {}", e);
                break;
            }
        }
    }

    event_task.abort();
    Ok(())
}
