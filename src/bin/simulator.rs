use busfleet::analytics::compute_analytics;
use busfleet::catalog::RouteCatalog;
use busfleet::config::FleetConfig;
use busfleet::protocol::{CommandType, ProtocolHandler};
use busfleet::provider::AnyProvider;
use busfleet::service::FleetService;
use clap::{App, Arg};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const DEFAULT_PORT: &str = "8080";
const UPDATE_BROADCAST_BUFFER_SIZE: usize = 64;

type Service = FleetService<AnyProvider>;
type SharedWriter = Arc<Mutex<OwnedWriteHalf>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let matches = App::new("busfleet-simulator")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Simulated bus fleet with live position updates over TCP")
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .value_name("PORT")
                .help("TCP port to listen on")
                .takes_value(true)
                .default_value(DEFAULT_PORT),
        )
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Fleet configuration (JSON)")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("routes")
                .short("r")
                .long("routes")
                .value_name("FILE")
                .help("Route catalog (JSON array of routes); built-in routes if omitted")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("seed")
                .short("s")
                .long("seed")
                .value_name("SEED")
                .help("Random seed for a reproducible fleet")
                .takes_value(true)
                .validator(|v| match v.parse::<u64>() {
                    Ok(_) => Ok(()),
                    Err(_) => Err("Seed must be a non-negative integer".into()),
                }),
        )
        .get_matches();

    let port: u16 = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse()?;

    let mut config = match matches.value_of("config") {
        Some(path) => FleetConfig::from_json_file(path)?,
        None => FleetConfig::default(),
    };
    if let Some(seed) = matches.value_of("seed") {
        config.simulation.seed = Some(seed.parse()?);
    }

    let catalog = match matches.value_of("routes") {
        Some(path) => RouteCatalog::from_json_file(path)?,
        None => RouteCatalog::builtin(),
    };

    println!("🚌 Bus Fleet Simulator");
    println!("======================");

    let provider = AnyProvider::from_kind(&config.provider)?;
    let service = Arc::new(FleetService::build(catalog, &config, provider)?);

    // Broadcast channel for tick updates
    let (update_tx, _) = broadcast::channel::<String>(UPDATE_BROADCAST_BUFFER_SIZE);

    let updates = std::sync::Mutex::new(ProtocolHandler::new());
    let callback_catalog = Arc::clone(service.catalog());
    let callback_tx = update_tx.clone();
    service.engine().set_update_callback(move |snapshot| {
        let analytics = compute_analytics(snapshot, callback_catalog.routes());
        let mut handler = updates.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let update = handler.create_tick_update(snapshot.to_vec(), analytics);
        match handler.serialize_update(&update) {
            Ok(line) => {
                // Err only means nobody is subscribed
                if callback_tx.send(line).is_err() {
                    debug!(sequence = update.sequence_number, "No subscribers for tick update");
                }
            }
            Err(e) => warn!("Failed to encode tick update: {}", e),
        }
    });

    service.start()?;

    let tcp_service = Arc::clone(&service);
    let tcp_update_tx = update_tx.clone();
    let tcp_server = tokio::spawn(async move {
        if let Err(e) = start_tcp_server(tcp_service, tcp_update_tx, port).await {
            error!("TCP server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    service.engine().shutdown().await;
    tcp_server.abort();
    println!("🛑 Bus Fleet Simulator stopped");

    Ok(())
}

async fn start_tcp_server(
    service: Arc<Service>,
    update_tx: broadcast::Sender<String>,
    port: u16,
) -> Result<(), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    info!("🌐 TCP server listening on port {}", port);

    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                info!("🔗 New client connected: {}", addr);
                let client_service = Arc::clone(&service);
                let client_update_tx = update_tx.clone();

                tokio::spawn(async move {
                    if let Err(e) = handle_client(stream, client_service, client_update_tx).await {
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
    service: Arc<Service>,
    update_tx: broadcast::Sender<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (reader, writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let writer: SharedWriter = Arc::new(Mutex::new(writer));

    let mut protocol = ProtocolHandler::new();
    let mut subscription: Option<JoinHandle<()>> = None;

    let mut line = String::new();
    loop {
        line.clear();
        match buf_reader.read_line(&mut line).await {
            Ok(0) => break, // Client disconnected
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }

                let response = match protocol.parse_command(trimmed) {
                    Ok(command) => {
                        debug!("📨 Received command: {:?}", command);
                        let subscribe = command.command_type == CommandType::Subscribe;
                        let response = service.handle_command(command).await;
                        if subscribe && subscription.is_none() {
                            subscription = Some(stream_updates(update_tx.subscribe(), Arc::clone(&writer)));
                        }
                        response
                    }
                    Err(e) => {
                        warn!("Failed to parse command: {}", e);
                        protocol.create_error_response(0, &e)
                    }
                };

                let response_json = protocol.serialize_response(&response)?;
                write_line(&writer, &response_json).await?;
                debug!("📤 Sent response: {:?} for command {}", response.status, response.id);
            }
            Err(e) => {
                error!("Error reading from client: {}", e);
                break;
            }
        }
    }

    if let Some(task) = subscription {
        task.abort();
    }
    Ok(())
}

fn stream_updates(mut update_rx: broadcast::Receiver<String>, writer: SharedWriter) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match update_rx.recv().await {
                Ok(update) => {
                    if let Err(e) = write_line(&writer, &update).await {
                        warn!("Failed to send tick update: {}", e);
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Subscriber lagging, skipped {} updates", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn write_line(writer: &SharedWriter, line: &str) -> std::io::Result<()> {
    let mut writer_guard = writer.lock().await;
    writer_guard.write_all(line.as_bytes()).await?;
    writer_guard.write_all(b"\n").await
}
