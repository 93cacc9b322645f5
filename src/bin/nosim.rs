//! Serve a simulated device over TCP.
//!
//! Usage:
//!   nosim --listen 127.0.0.1:2323                       # Builtin Huawei OLT
//!   nosim --commands olt.json --reload                  # Table from disk, hot reloaded
//!   nosim --diagnose                                    # Print grammar diagnostics and exit
//!   nosim --schema state                                # Print a JSON schema and exit

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use nosim::config::{DEFAULT_BASE_PROMPT, EngineConfig, RELOAD_ENV};
use nosim::grammar::{CommandTable, Grammar, GrammarRegistry};
use nosim::server::DeviceServer;
use nosim::session::SessionRecordLevel;
use nosim::state::{DeviceState, DeviceStore};
use nosim::templates;

#[derive(Parser)]
#[command(name = "nosim")]
#[command(about = "Virtual network device CLI over TCP")]
struct Args {
    /// Address to accept connections on
    #[arg(short = 'l', long, default_value = "127.0.0.1:2323")]
    listen: String,

    /// Builtin command table
    #[arg(short = 't', long, default_value = "huawei_smartax")]
    template: String,

    /// JSON command table to load instead of the builtin one
    #[arg(short = 'c', long)]
    commands: Option<PathBuf>,

    /// JSON device state to start from instead of the template sample
    #[arg(short = 's', long)]
    state: Option<PathBuf>,

    /// Device identity substituted into prompts
    #[arg(short = 'b', long, default_value = DEFAULT_BASE_PROMPT)]
    base_prompt: String,

    /// Re-read the command table before each line
    #[arg(long, env = RELOAD_ENV)]
    reload: bool,

    /// Banner written on connect
    #[arg(long, default_value = "")]
    intro: String,

    /// Session transcript granularity
    #[arg(long, value_enum, default_value_t = RecordArg::Off)]
    record: RecordArg,

    /// Print grammar diagnostics for the selected table and exit
    #[arg(long)]
    diagnose: bool,

    /// Print the command table in JSON and exit
    #[arg(long)]
    export_table: bool,

    /// Print a JSON schema and exit
    #[arg(long, value_enum)]
    schema: Option<SchemaArg>,
}

#[derive(Clone, Copy, ValueEnum)]
enum RecordArg {
    Off,
    Commands,
    Full,
}

impl From<RecordArg> for SessionRecordLevel {
    fn from(arg: RecordArg) -> Self {
        match arg {
            RecordArg::Off => SessionRecordLevel::Off,
            RecordArg::Commands => SessionRecordLevel::Commands,
            RecordArg::Full => SessionRecordLevel::Full,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SchemaArg {
    Table,
    State,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if let Some(schema) = args.schema {
        let text = match schema {
            SchemaArg::Table => CommandTable::json_schema()?,
            SchemaArg::State => DeviceState::json_schema()?,
        };
        println!("{text}");
        return Ok(());
    }

    let table = match &args.commands {
        Some(path) => CommandTable::from_path(path)
            .with_context(|| format!("loading command table {}", path.display()))?,
        None => templates::by_name(&args.template)?,
    };

    if args.export_table {
        println!("{}", table.to_json_pretty()?);
        return Ok(());
    }

    if args.diagnose {
        let diagnostics = Grammar::load(&table)?.diagnose();
        println!("{}", serde_json::to_string_pretty(&diagnostics)?);
        if diagnostics.has_issues() {
            bail!("command table '{}' has diagnostic issues", table.device_type);
        }
        return Ok(());
    }

    let registry = match &args.commands {
        Some(path) => GrammarRegistry::from_path(path)?,
        None => GrammarRegistry::builtin(&args.template)?,
    };

    let state = match &args.state {
        Some(path) => {
            let json = fs::read_to_string(path)
                .with_context(|| format!("reading device state {}", path.display()))?;
            DeviceState::from_json(&json)?
        }
        None => templates::sample_state(&args.template)?,
    };

    let config = EngineConfig {
        reload_commands: args.reload,
        intro: args.intro,
        record_level: args.record.into(),
        ..EngineConfig::default()
    };

    let server = Arc::new(DeviceServer::new(
        Arc::new(registry),
        Arc::new(DeviceStore::new(state)),
        &args.base_prompt,
        config,
    ));
    let listener = TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    info!("nosim listening on {}", args.listen);
    server.serve(listener).await?;
    Ok(())
}
