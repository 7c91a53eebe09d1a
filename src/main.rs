use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;
use ulid::Ulid;

use roomslot::config::Config;
use roomslot::engine::{Engine, parse_span};
use roomslot::maintenance;
use roomslot::model::{ReservationStatus, Room, RoomId};
use roomslot::store::{MemoryStore, RoomDirectory, StoreError};
use roomslot::time::SystemClock;

#[derive(Parser)]
#[command(name = "roomslot", version, about = "Room reservation scheduling")]
struct Cli {
    /// Directory holding the reservation log. Overrides ROOMSLOT_DATA_DIR.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Manage rooms
    Room {
        #[command(subcommand)]
        action: RoomAction,
    },
    /// Manage requesters
    Requester {
        #[command(subcommand)]
        action: RequesterAction,
    },
    /// Request a reservation; it starts out pending
    Book {
        #[arg(long)]
        room: RoomId,
        #[arg(long)]
        requester: Ulid,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long, default_value = "")]
        purpose: String,
    },
    /// Approve a pending reservation
    Approve { id: Ulid },
    /// Reject a pending reservation
    Reject { id: Ulid },
    /// Set a reservation's status explicitly
    Status { id: Ulid, status: ReservationStatus },
    /// Check whether a room is free for an interval
    Available {
        #[arg(long)]
        room: RoomId,
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
    },
    /// List reservations, newest first
    List {
        #[arg(long)]
        requester: Option<Ulid>,
    },
    /// Approved reservations starting in a month
    Period {
        #[arg(long)]
        month: u32,
        #[arg(long)]
        year: i32,
    },
    /// Dashboard counters
    Stats,
    /// Per-room usage for a month
    Report {
        #[arg(long)]
        month: u32,
        #[arg(long)]
        year: i32,
    },
    /// Rewrite the log to its minimal form
    Compact {
        /// Compact even below the configured threshold
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum RoomAction {
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        kind: String,
        #[arg(long, default_value_t = 1)]
        capacity: u32,
        #[arg(long)]
        inactive: bool,
    },
    Update {
        id: RoomId,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        kind: Option<String>,
        #[arg(long)]
        capacity: Option<u32>,
        #[arg(long)]
        active: Option<bool>,
    },
    Delete { id: RoomId },
    List,
}

#[derive(Subcommand)]
enum RequesterAction {
    Add {
        #[arg(long)]
        name: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    roomslot::observability::init(config.metrics_port)?;

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(MemoryStore::open(&config.wal_path())?);
    info!("opened {}", config.wal_path().display());
    let engine = Engine::with_memory_store(store.clone(), Arc::new(SystemClock));

    match cli.command {
        Command::Room { action } => match action {
            RoomAction::Add {
                name,
                kind,
                capacity,
                inactive,
            } => {
                let room = Room {
                    id: Ulid::new(),
                    name,
                    kind,
                    capacity,
                    active: !inactive,
                };
                store.create_room(room.clone()).await?;
                print_json(&room)?;
            }
            RoomAction::Update {
                id,
                name,
                kind,
                capacity,
                active,
            } => {
                let mut room = store.get_room(id).await?.ok_or(StoreError::NotFound(id))?;
                if let Some(name) = name {
                    room.name = name;
                }
                if let Some(kind) = kind {
                    room.kind = kind;
                }
                if let Some(capacity) = capacity {
                    room.capacity = capacity;
                }
                if let Some(active) = active {
                    room.active = active;
                }
                store.update_room(room.clone()).await?;
                print_json(&room)?;
            }
            RoomAction::Delete { id } => {
                store.delete_room(id).await?;
                engine.forget_room(id);
                print_json(&json!({ "deleted": id }))?;
            }
            RoomAction::List => print_json(&store.list_rooms().await?)?,
        },
        Command::Requester {
            action: RequesterAction::Add { name },
        } => {
            let id = Ulid::new();
            store.register_requester(id, name.clone()).await?;
            print_json(&json!({ "id": id, "name": name }))?;
        }
        Command::Book {
            room,
            requester,
            start,
            end,
            purpose,
        } => {
            let span = parse_span(&start, &end)?;
            let id = engine
                .create_reservation(room, requester, span.start, span.end, purpose)
                .await?;
            print_json(&json!({ "id": id, "status": ReservationStatus::Pending }))?;
        }
        Command::Approve { id } => {
            engine.approve(id).await?;
            print_json(&json!({ "id": id, "status": ReservationStatus::Approved }))?;
        }
        Command::Reject { id } => {
            engine.reject(id).await?;
            print_json(&json!({ "id": id, "status": ReservationStatus::Rejected }))?;
        }
        Command::Status { id, status } => {
            engine.set_status(id, status).await?;
            print_json(&json!({ "id": id, "status": status }))?;
        }
        Command::Available { room, start, end } => {
            let span = parse_span(&start, &end)?;
            let available = engine.is_room_available(room, span.start, span.end).await?;
            print_json(&json!({ "room_id": room, "available": available }))?;
        }
        Command::List { requester } => print_json(&engine.list_reservations(requester).await?)?,
        Command::Period { month, year } => {
            print_json(&engine.list_reservations_in_period(month, year).await?)?
        }
        Command::Stats => print_json(&engine.compute_dashboard_stats().await?)?,
        Command::Report { month, year } => print_json(&engine.compute_monthly_usage(month, year).await?)?,
        Command::Compact { force } => {
            let threshold = if force { 0 } else { config.compact_threshold };
            let compacted = maintenance::compact_if_needed(&store, threshold).await?;
            print_json(&json!({ "compacted": compacted }))?;
            return Ok(());
        }
    }

    maintenance::compact_if_needed(&store, config.compact_threshold).await?;
    Ok(())
}
