use busfleet::analytics::FleetAnalytics;
use busfleet::catalog::Route;
use busfleet::eta::EtaResult;
use busfleet::fleet::{Bus, BusStatus};
use busfleet::protocol::{CommandResponse, ResponseStatus, TickUpdate};
use clap::{App, Arg, ArgMatches, SubCommand};
use colored::*;
use serde::de::DeserializeOwned;
use std::process::Command;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: &str = "8080";
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

type CliResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> CliResult {
    let matches = App::new("busfleet")
        .version(env!("CARGO_PKG_VERSION"))
        .about("🚌 Bus Fleet Simulator client - routes, live buses, analytics and ETAs")
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
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .help("Enable verbose output")
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("ping")
                .about("🏓 Test connection to the fleet simulator")
        )
        .subcommand(
            SubCommand::with_name("routes")
                .about("🗺️  List routes and their stops")
        )
        .subcommand(
            SubCommand::with_name("buses")
                .about("🚌 Show the current fleet")
                .arg(
                    Arg::with_name("route")
                        .long("route")
                        .value_name("ROUTE_ID")
                        .help("Only show buses on this route")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("search")
                        .long("search")
                        .short("s")
                        .value_name("QUERY")
                        .help("Match bus id, route name or next stop (case-insensitive)")
                        .takes_value(true),
                )
        )
        .subcommand(
            SubCommand::with_name("analytics")
                .about("📊 Fleet-wide and per-route statistics")
        )
        .subcommand(
            SubCommand::with_name("eta")
                .about("⏱️  Estimate arrival of a bus at a stop on its route")
                .arg(Arg::with_name("bus").help("Bus id, e.g. bus-1-1").required(true))
                .arg(Arg::with_name("stop").help("Stop id, e.g. stop-3").required(true))
        )
        .subcommand(
            SubCommand::with_name("monitor")
                .about("📡 Stream live fleet updates")
                .long_about("Subscribes to tick updates and prints one line per tick until interrupted")
        )
        .subcommand(
            SubCommand::with_name("server")
                .about("🚀 Start the fleet simulator")
                .arg(
                    Arg::with_name("background")
                        .short("b")
                        .long("background")
                        .help("Run server in background"),
                )
        )
        .get_matches();

    let host = matches.value_of("host").unwrap_or(DEFAULT_HOST);
    let port = matches.value_of("port").unwrap_or(DEFAULT_PORT).parse::<u16>()?;
    let format = matches.value_of("format").unwrap_or("table");
    let verbose = matches.is_present("verbose");

    if verbose {
        println!("{}", "🚌 BusFleet - Bus Fleet Simulator".bright_blue().bold());
        println!("{} {}:{}", "Connecting to".dimmed(), host, port);
    }

    match matches.subcommand() {
        ("ping", _) => handle_ping(host, port, format).await?,
        ("routes", _) => handle_routes(host, port, format).await?,
        ("buses", Some(sub_matches)) => handle_buses(sub_matches, host, port, format).await?,
        ("analytics", _) => handle_analytics(host, port, format).await?,
        ("eta", Some(sub_matches)) => handle_eta(sub_matches, host, port, format).await?,
        ("monitor", _) => handle_monitor(host, port, format).await?,
        ("server", Some(sub_matches)) => handle_server(sub_matches, port)?,
        _ => {
            println!("{}", "No command specified. Use --help for usage information.".yellow());
            println!("{}", "Quick start:".bright_green());
            println!("  {} Start the simulator server", "busfleet server".bright_cyan());
            println!("  {} Show the fleet", "busfleet buses".bright_cyan());
            println!("  {} Watch live updates", "busfleet monitor".bright_cyan());
        }
    }

    Ok(())
}

async fn handle_ping(host: &str, port: u16, format: &str) -> CliResult {
    let raw = send_command(host, port, create_command(serde_json::json!("Ping"))).await?;

    match format {
        "json" => println!("{}", raw),
        "compact" => println!("{}", "PONG".bright_green()),
        _ => {
            let response = parse_response(&raw)?;
            if response.status == ResponseStatus::Success {
                println!("{} {}", "✅".green(), "Fleet simulator is responsive".bright_green());
            } else {
                println!("{} {}", "❌".red(), "Ping failed".bright_red());
            }
        }
    }
    Ok(())
}

async fn handle_routes(host: &str, port: u16, format: &str) -> CliResult {
    let raw = send_command(host, port, create_command(serde_json::json!("ListRoutes"))).await?;
    if format == "json" {
        println!("{}", raw);
        return Ok(());
    }

    let Some(routes) = expect_payload::<Vec<Route>>(&raw)? else {
        return Ok(());
    };

    for route in &routes {
        if format == "compact" {
            println!("{} {} ({} stops)", route.id.bright_cyan(), route.name, route.stops.len());
            continue;
        }
        println!(
            "\n{} {}  {}",
            route.id.bright_cyan().bold(),
            route.name.bright_white().bold(),
            route.color.dimmed()
        );
        println!(
            "   {:.1} km, about {} min end to end",
            route.total_distance, route.estimated_duration
        );
        for (index, stop) in route.stops.iter().enumerate() {
            println!("   {:>2}. {:<10} {:<24} {}", index + 1, stop.id, stop.name, stop.address.dimmed());
        }
    }
    Ok(())
}

async fn handle_buses(matches: &ArgMatches<'_>, host: &str, port: u16, format: &str) -> CliResult {
    let command_type = match (matches.value_of("search"), matches.value_of("route")) {
        (Some(query), route_id) => {
            serde_json::json!({ "SearchBuses": { "query": query, "route_id": route_id } })
        }
        (None, Some(route_id)) => serde_json::json!({ "RouteBuses": { "route_id": route_id } }),
        (None, None) => serde_json::json!("FleetSnapshot"),
    };
    let raw = send_command(host, port, create_command(command_type)).await?;
    if format == "json" {
        println!("{}", raw);
        return Ok(());
    }

    let Some(buses) = expect_payload::<Vec<Bus>>(&raw)? else {
        return Ok(());
    };

    if format == "compact" {
        for bus in &buses {
            println!(
                "{} {} {}/{} eta={}m {}",
                bus.id, bus.route_id, bus.occupancy, bus.capacity, bus.eta, colored_status(bus.status)
            );
        }
        return Ok(());
    }

    println!("{}", "┌───────────┬──────────┬──────────┬────────────┬──────────────────────┬───────┐".bright_white());
    println!("{}", "│ Bus       │ Route    │ Status   │ Occupancy  │ Next Stop            │ ETA   │".bright_white());
    println!("{}", "├───────────┼──────────┼──────────┼────────────┼──────────────────────┼───────┤".bright_white());
    for bus in &buses {
        let percent = bus.occupancy_percent();
        let occupancy = format!("{:>3}/{:<3} {:>3.0}%", bus.occupancy, bus.capacity, percent);
        let occupancy = if percent >= 90.0 {
            occupancy.red()
        } else if percent >= 60.0 {
            occupancy.yellow()
        } else {
            occupancy.green()
        };
        println!(
            "│ {:<9} │ {:<8} │ {} │ {} │ {:<20} │ {:>3} m │",
            bus.id,
            bus.route_id,
            colored_status(bus.status),
            occupancy,
            truncate(&bus.next_stop, 20),
            bus.eta
        );
    }
    println!("{}", "└───────────┴──────────┴──────────┴────────────┴──────────────────────┴───────┘".bright_white());
    println!("{} buses", buses.len());
    Ok(())
}

async fn handle_analytics(host: &str, port: u16, format: &str) -> CliResult {
    let raw = send_command(host, port, create_command(serde_json::json!("FleetAnalytics"))).await?;
    if format == "json" {
        println!("{}", raw);
        return Ok(());
    }

    let Some(analytics) = expect_payload::<FleetAnalytics>(&raw)? else {
        return Ok(());
    };

    if format == "compact" {
        println!("{}", compact_analytics(&analytics));
        return Ok(());
    }

    println!("{}", "📊 Fleet Analytics".bright_blue().bold());
    println!("{}", "══════════════════".bright_blue());
    println!("{} {}", "Total buses:".bright_white(), analytics.total_buses);
    println!("{} {}", "Active:".bright_white(), analytics.active_buses.to_string().bright_green());
    println!("{} {}", "Delayed:".bright_white(), analytics.delayed_buses.to_string().bright_yellow());
    println!("{} {}", "Passengers:".bright_white(), analytics.total_passengers);
    println!("{} {}%", "Average occupancy:".bright_white(), analytics.average_occupancy_percent);

    println!("\n{}", "Routes".bright_white().bold());
    for route in &analytics.route_performance {
        println!(
            "  {:<10} {:<22} {} buses, {:>3}% full, {} on time, {} delayed",
            route.route_id.bright_cyan(),
            truncate(&route.route_name, 22),
            route.bus_count,
            route.avg_occupancy_percent,
            route.on_time_count.to_string().green(),
            route.delayed_count.to_string().yellow()
        );
    }
    Ok(())
}

async fn handle_eta(matches: &ArgMatches<'_>, host: &str, port: u16, format: &str) -> CliResult {
    let bus_id = matches.value_of("bus").unwrap_or_default();
    let stop_id = matches.value_of("stop").unwrap_or_default();

    let command_type = serde_json::json!({ "EstimateEta": { "bus_id": bus_id, "stop_id": stop_id } });
    let raw = send_command(host, port, create_command(command_type)).await?;
    if format == "json" {
        println!("{}", raw);
        return Ok(());
    }

    let Some(eta) = expect_payload::<EtaResult>(&raw)? else {
        return Ok(());
    };

    if format == "compact" {
        println!("{} {} {} {}", bus_id, stop_id, eta.distance.text, eta.duration.text);
    } else {
        println!(
            "{} {} → {}: {} away, {}",
            "⏱️".bright_blue(),
            bus_id.bright_white(),
            stop_id.bright_cyan(),
            eta.distance.text.bright_white(),
            eta.duration.text.bright_green()
        );
    }
    Ok(())
}

async fn handle_monitor(host: &str, port: u16, format: &str) -> CliResult {
    println!("{}", "📡 Monitoring fleet updates (Press Ctrl+C to stop)...".bright_blue().bold());

    let stream = connect(host, port).await?;
    let (reader, mut writer) = stream.into_split();
    writer.write_all(create_command(serde_json::json!("Subscribe")).as_bytes()).await?;
    writer.write_all(b"\n").await?;

    if format == "table" {
        println!("{}", "┌──────────┬────────┬────────┬─────────┬────────────┬─────────┐".bright_white());
        println!("{}", "│ Tick     │ Buses  │ Active │ Delayed │ Passengers │ Avg Occ │".bright_white());
        println!("{}", "├──────────┼────────┼────────┼─────────┼────────────┼─────────┤".bright_white());
    }

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        // The subscribe acknowledgement comes first, then one update per tick.
        let Ok(update) = serde_json::from_str::<TickUpdate>(&line) else {
            if let Ok(response) = serde_json::from_str::<CommandResponse>(&line) {
                if response.status != ResponseStatus::Success {
                    print_failure(&response);
                    break;
                }
            }
            continue;
        };

        match format {
            "json" => println!("{}", line),
            "compact" => println!("#{} {}", update.sequence_number, compact_analytics(&update.analytics)),
            _ => {
                let a = &update.analytics;
                let delayed = if a.delayed_buses > 0 {
                    format!("{:>7}", a.delayed_buses).yellow()
                } else {
                    format!("{:>7}", a.delayed_buses).green()
                };
                println!(
                    "│ {:>8} │ {:>6} │ {:>6} │ {} │ {:>10} │ {:>6}% │",
                    update.sequence_number,
                    a.total_buses,
                    a.active_buses,
                    delayed,
                    a.total_passengers,
                    a.average_occupancy_percent
                );
            }
        }
    }

    Ok(())
}

fn handle_server(matches: &ArgMatches<'_>, port: u16) -> CliResult {
    let background = matches.is_present("background");

    println!("{}", "🚀 Starting bus fleet simulator server...".bright_green().bold());

    let mut cmd = Command::new("cargo");
    cmd.args(["run", "--bin", "busfleet-simulator", "--", "--port"]);
    cmd.arg(port.to_string());

    if background {
        cmd.spawn()?;
        println!("{} Server started in background on port {}", "✅".green(), port);
    } else {
        println!("{} Server starting on port {} (Press Ctrl+C to stop)", "🌐".bright_blue(), port);
        cmd.status()?;
    }

    Ok(())
}

// Helper functions

async fn connect(host: &str, port: u16) -> CliResult<TcpStream> {
    let addr = format!("{}:{}", host, port);
    match TcpStream::connect(&addr).await {
        Ok(stream) => Ok(stream),
        Err(e) => {
            eprintln!("{} Failed to connect to fleet simulator at {}", "❌".red(), addr.bright_white());

            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                eprintln!("{} Server is not running. Start it with:", "💡".yellow());
                eprintln!("   {}", "busfleet server".bright_cyan());
                eprintln!("   or");
                eprintln!("   {}", "cargo run --bin busfleet-simulator".bright_cyan());
            } else {
                eprintln!("{} Network error: {}", "🔌".yellow(), e.to_string().bright_red());
            }

            Err(e.into())
        }
    }
}

async fn send_command(host: &str, port: u16, command: String) -> CliResult<String> {
    let stream = connect(host, port).await?;
    let (reader, mut writer) = stream.into_split();

    let exchange = async {
        writer.write_all(command.as_bytes()).await?;
        writer.write_all(b"\n").await?;

        let mut response = String::new();
        let n = BufReader::new(reader).read_line(&mut response).await?;
        if n == 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "Server closed connection",
            ));
        }
        Ok(response.trim_end().to_string())
    };

    match tokio::time::timeout(COMMAND_TIMEOUT, exchange).await {
        Ok(result) => Ok(result?),
        Err(_) => {
            eprintln!("{} Command timed out after {} seconds", "⏰".yellow(), COMMAND_TIMEOUT.as_secs());
            Err("Command timeout".into())
        }
    }
}

fn parse_response(raw: &str) -> CliResult<CommandResponse> {
    Ok(serde_json::from_str(raw)?)
}

/// Decode the payload of a successful response, or print why there is none.
fn expect_payload<T: DeserializeOwned>(raw: &str) -> CliResult<Option<T>> {
    let response = parse_response(raw)?;
    if response.status != ResponseStatus::Success {
        print_failure(&response);
        return Ok(None);
    }
    match response.payload {
        Some(payload) => Ok(Some(serde_json::from_value(payload)?)),
        None => {
            println!("{} {}", "❌".red(), "Response carried no data".bright_red());
            Ok(None)
        }
    }
}

fn print_failure(response: &CommandResponse) {
    let message = response.message.as_deref().unwrap_or("no details");
    match response.status {
        ResponseStatus::NotFound => println!("{} {}", "🔍".yellow(), message.bright_yellow()),
        _ => println!("{} {:?}: {}", "❌".red(), response.status, message.bright_red()),
    }
}

fn colored_status(status: BusStatus) -> ColoredString {
    let label = format!("{:<8}", status.as_str());
    match status {
        BusStatus::Active => label.bright_green(),
        BusStatus::Delayed => label.bright_yellow(),
        BusStatus::Maintenance => label.bright_red(),
        BusStatus::OffDuty => label.dimmed(),
    }
}

fn compact_analytics(analytics: &FleetAnalytics) -> String {
    format!(
        "buses={} active={} delayed={} passengers={} occupancy={}%",
        analytics.total_buses,
        analytics.active_buses,
        analytics.delayed_buses,
        analytics.total_passengers,
        analytics.average_occupancy_percent
    )
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        text.to_string()
    } else {
        let mut short: String = text.chars().take(width.saturating_sub(1)).collect();
        short.push('…');
        short
    }
}

fn create_command(command_type: serde_json::Value) -> String {
    serde_json::json!({
        "id": current_timestamp() as u32,
        "timestamp": current_timestamp(),
        "command_type": command_type
    })
    .to_string()
}

fn current_timestamp() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
