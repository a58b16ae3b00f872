//! fleetcast: CLI + live location server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use comfy_table::{Cell, Table};

use fleetcast_core::config::{self, Config};
use fleetcast_server::db::SqliteStore;
use fleetcast_server::hub::Hub;
use fleetcast_server::ingest::Ingestor;
use fleetcast_server::logging;
use fleetcast_server::mqtt::MqttSource;
use fleetcast_server::web::{self, AppState};

#[derive(Parser)]
#[command(name = "fleetcast", version, about = "Live vehicle location fan-out")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest MQTT telemetry and stream it to WebSocket viewers
    Serve(ServeArgs),

    /// Manage known vehicles
    Vehicle {
        #[command(subcommand)]
        command: VehicleCommands,
    },

    /// Show database statistics
    Stats {
        /// SQLite database path
        #[arg(long, env = "FLEETCAST_DB")]
        db_path: Option<String>,
    },

    /// Manage ~/.fleetcast/config.yaml
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Args)]
struct ServeArgs {
    /// SQLite database path
    #[arg(long, env = "FLEETCAST_DB")]
    db_path: Option<String>,

    /// HTTP bind address
    #[arg(long)]
    host: Option<String>,

    /// HTTP port
    #[arg(long, env = "PORT")]
    port: Option<u16>,

    /// MQTT broker host
    #[arg(long, env = "FLEETCAST_MQTT_HOST")]
    mqtt_host: Option<String>,

    /// MQTT broker port
    #[arg(long, env = "FLEETCAST_MQTT_PORT")]
    mqtt_port: Option<u16>,

    /// MQTT topic filter to subscribe to
    #[arg(long)]
    mqtt_topic: Option<String>,

    /// Broadcast queue depth before messages are dropped
    #[arg(long)]
    hub_capacity: Option<usize>,
}

#[derive(Subcommand)]
enum VehicleCommands {
    /// Register a vehicle so its locations can be stored
    Add {
        id: String,

        #[arg(long)]
        label: Option<String>,

        #[arg(long, env = "FLEETCAST_DB")]
        db_path: Option<String>,
    },
    /// List vehicles with location counts
    List {
        #[arg(long, env = "FLEETCAST_DB")]
        db_path: Option<String>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Write the default config file
    Init,
    /// Print the effective config
    Show,
}

impl ServeArgs {
    fn apply(self, config: &mut Config) {
        if let Some(v) = self.db_path {
            config.database.path = v;
        }
        if let Some(v) = self.host {
            config.server.host = v;
        }
        if let Some(v) = self.port {
            config.server.port = v;
        }
        if let Some(v) = self.mqtt_host {
            config.broker.host = v;
        }
        if let Some(v) = self.mqtt_port {
            config.broker.port = v;
        }
        if let Some(v) = self.mqtt_topic {
            config.broker.topic = v;
        }
        if let Some(v) = self.hub_capacity {
            config.hub.capacity = v;
        }
    }
}

#[tokio::main]
async fn main() {
    logging::init();
    let cli = Cli::parse();
    let mut config = config::load_config();

    match cli.command {
        Commands::Serve(args) => {
            args.apply(&mut config);
            cmd_serve(config).await;
        }
        Commands::Vehicle { command } => match command {
            VehicleCommands::Add { id, label, db_path } => {
                cmd_vehicle_add(&db_path.unwrap_or(config.database.path), &id, label.as_deref())
            }
            VehicleCommands::List { db_path } => {
                cmd_vehicle_list(&db_path.unwrap_or(config.database.path))
            }
        },
        Commands::Stats { db_path } => cmd_stats(&db_path.unwrap_or(config.database.path)),
        Commands::Config { command } => match command {
            ConfigCommands::Init => cmd_config_init(),
            ConfigCommands::Show => print!("{}", config::serialize_config(&config)),
        },
    }
}

fn open_store(db_path: &str) -> SqliteStore {
    SqliteStore::open(db_path).unwrap_or_else(|e| {
        eprintln!("Error opening database {db_path}: {e}");
        std::process::exit(1);
    })
}

async fn cmd_serve(config: Config) {
    let store = open_store(&config.database.path);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .unwrap_or_else(|e| {
            eprintln!(
                "Invalid listen address {}:{}: {e}",
                config.server.host, config.server.port
            );
            std::process::exit(1);
        });

    let (hub, handle) = Hub::new(
        config.hub.capacity,
        Duration::from_millis(config.hub.write_timeout_ms),
    );
    tokio::spawn(hub.run());

    let ingestor = Ingestor::new(Arc::new(store.clone()), handle.clone());
    let stats = ingestor.stats();
    tokio::spawn(ingestor.run(MqttSource::new(&config.broker)));

    tracing::info!(
        db = %config.database.path,
        hub_capacity = config.hub.capacity,
        "fleetcast starting"
    );

    let state = Arc::new(AppState {
        hub: handle,
        store,
        stats,
    });

    if let Err(e) = web::serve(state, addr).await {
        tracing::error!(error = %e, "HTTP server failed");
        std::process::exit(1);
    }
}

fn cmd_vehicle_add(db_path: &str, id: &str, label: Option<&str>) {
    let store = open_store(db_path);
    match store.add_vehicle(id, label) {
        Ok(true) => println!("Added vehicle {id}"),
        Ok(false) => println!("Vehicle {id} already exists"),
        Err(e) => {
            eprintln!("Error adding vehicle {id}: {e}");
            std::process::exit(1);
        }
    }
}

fn cmd_vehicle_list(db_path: &str) {
    let store = open_store(db_path);
    let vehicles = store.list_vehicles().unwrap_or_else(|e| {
        eprintln!("Error listing vehicles: {e}");
        std::process::exit(1);
    });

    if vehicles.is_empty() {
        println!("No vehicles registered in {db_path}");
        return;
    }

    let mut table = Table::new();
    table.set_header(vec!["Vehicle", "Label", "Locations", "Last seen (unix)"]);
    for v in &vehicles {
        table.add_row(vec![
            Cell::new(&v.id),
            Cell::new(v.label.as_deref().unwrap_or("-")),
            Cell::new(v.locations),
            Cell::new(
                v.last_seen
                    .map(|t| format!("{t:.0}"))
                    .unwrap_or("-".into()),
            ),
        ]);
    }
    println!("{table}");
}

fn cmd_stats(db_path: &str) {
    let store = open_store(db_path);
    let stats = store.stats().unwrap_or_else(|e| {
        eprintln!("Error reading {db_path}: {e}");
        std::process::exit(1);
    });

    println!();
    println!("Database: {db_path}");
    println!();
    println!("  Vehicles:   {}", stats.vehicles);
    println!("  Locations:  {}", stats.locations);
    println!();
}

fn cmd_config_init() {
    let path = config::config_file();
    if path.exists() {
        println!("Config already exists at {}", path.display());
        return;
    }
    match config::save_config(&Config::default()) {
        Ok(path) => println!("Wrote {}", path.display()),
        Err(e) => {
            eprintln!("Error writing config: {e}");
            std::process::exit(1);
        }
    }
}
