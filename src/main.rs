mod api;
mod app;
mod car;
mod cli;
mod config;
mod error;
mod guard;
mod logging;
mod session;
mod storage;
mod token;
mod transport;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;

use crate::api::ApiClient;
use crate::app::{Action, App};
use crate::error::ApiError;
use crate::guard::{Navigator, TerminalNavigator};
use crate::session::SessionStore;
use crate::storage::{FileStore, KeyValueStore, MemoryStore};
use crate::transport::HttpTransport;

#[derive(Parser)]
#[command(name = "carstock", about = "Command-line client for the car stock API")]
pub struct Args {
    #[arg(long, env = "CARSTOCK_API_URL", help = "API base URL (overrides config)")]
    pub base_url: Option<String>,

    #[arg(long, help = "Config file path")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "CARSTOCK_HOME", help = "Directory holding the session token")]
    pub storage_dir: Option<PathBuf>,

    #[arg(long, help = "Keep the session in memory only")]
    pub ephemeral: bool,

    #[arg(long, help = "Print the effective configuration and exit")]
    pub print_config: bool,

    #[arg(long, help = "Debug output (HTTP requests and session changes)")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Log in and store the session token
    Login {
        username: String,
        #[arg(long, env = "CARSTOCK_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Create an account, then log in
    Register {
        username: String,
        #[arg(long, env = "CARSTOCK_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Forget the stored session token
    Logout,
    /// Show session state
    Status,
    /// Manage cars
    Cars {
        #[command(subcommand)]
        action: CarsCommand,
    },
}

#[derive(Subcommand)]
pub enum CarsCommand {
    /// List all cars
    List,
    /// Add a car; extra attributes as key=value
    Add {
        make: String,
        model: String,
        #[arg(allow_negative_numbers = true)]
        stock: String,
        fields: Vec<String>,
    },
    /// Update fields of a car given as key=value
    Update {
        id: String,
        #[arg(required = true)]
        fields: Vec<String>,
    },
    /// Delete a car
    Delete { id: String },
}

impl Command {
    fn into_action(self) -> Result<Action, ApiError> {
        Ok(match self {
            Command::Login { username, password } => Action::Login { username, password },
            Command::Register { username, password } => Action::Register { username, password },
            Command::Logout => Action::Logout,
            Command::Status => Action::Status,
            Command::Cars { action } => match action {
                CarsCommand::List => Action::ListCars,
                CarsCommand::Add {
                    make,
                    model,
                    stock,
                    fields,
                } => Action::add(&make, &model, &stock, &fields)?,
                CarsCommand::Update { id, fields } => Action::update(&id, &fields)?,
                CarsCommand::Delete { id } => Action::DeleteCar { id },
            },
        })
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    logging::init(args.debug);

    let mut cfg = if let Some(config_path) = &args.config {
        config::Config::load_from(config_path)?
    } else {
        config::Config::load()?
    };

    // CLI flags override config files
    if let Some(base_url) = &args.base_url {
        cfg.api.base_url = base_url.clone();
    }
    if let Some(dir) = &args.storage_dir {
        cfg.storage.dir = Some(dir.clone());
    }

    if let Err(errors) = cfg.validate() {
        for e in &errors {
            eprintln!("Config error {}", e);
        }
        anyhow::bail!("Invalid configuration ({} error(s))", errors.len());
    }

    if args.print_config {
        println!("{}", toml::to_string_pretty(&cfg)?);
        return Ok(());
    }

    let files = match &cfg.storage.dir {
        Some(dir) => FileStore::new(dir),
        None => FileStore::default_location(),
    };

    let (store, history): (Box<dyn KeyValueStore>, Option<PathBuf>) = if args.ephemeral {
        (Box::new(MemoryStore::new()), None)
    } else {
        std::fs::create_dir_all(files.dir()).with_context(|| {
            format!("Failed to create storage directory {}", files.dir().display())
        })?;
        let history = files.dir().join("history");
        (Box::new(files), Some(history))
    };

    let session = Rc::new(SessionStore::open(store));
    let transport = HttpTransport::new(
        &cfg.api.base_url,
        Duration::from_secs(cfg.api.timeout_secs),
    );
    tracing::debug!(base_url = %transport.base_url(), ephemeral = args.ephemeral, "starting");
    let navigator: Rc<dyn Navigator> = Rc::new(TerminalNavigator::new(cli::initial_view(
        session.is_logged_in(),
    )));
    let app = App::new(ApiClient::new(transport, Rc::clone(&session)), navigator);

    match args.command {
        Some(command) => cli::run_once(&app, command.into_action()?),
        None => cli::run_repl(app, history),
    }
}
