use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use waclaw_core::store::{CONVERSATIONS_DDL, MIGRATIONS, Store};
use waclaw_core::{WhatsAppSettings, load_routing_config};

#[derive(Parser, Debug)]
#[command(name = "waclawd", version, about = "WhatsApp-to-agent bridge")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print effective bridge settings as JSON.
    PrintConfig,
    /// Print the store schema DDL.
    PrintSchema,
    /// Apply the bridge schema to a SQLite store.
    InitDb(InitDbArgs),
    /// Load the routing config and print the resolved table.
    CheckRoutes(CheckRoutesArgs),
}

#[derive(clap::Args, Debug)]
struct InitDbArgs {
    /// Store path; defaults to the configured session db.
    #[arg(long)]
    db: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct CheckRoutesArgs {
    /// Routes file; defaults to the configured agent routes path.
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = WhatsAppSettings::load().context("failed to load bridge settings")?;

    match cli.command {
        Command::PrintConfig => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Command::PrintSchema => {
            for ddl in MIGRATIONS {
                println!("{ddl};");
            }
            // Dispatcher-owned; printed for reference, never written here.
            println!("{CONVERSATIONS_DDL};");
        }
        Command::InitDb(args) => {
            let path = args.db.unwrap_or_else(|| settings.session_db.clone());
            Store::open(&path)
                .with_context(|| format!("failed to initialize store at {}", path.display()))?;
            println!("schema applied to {}", path.display());
        }
        Command::CheckRoutes(args) => {
            let path = args.config.or_else(|| settings.agent_routes.clone());
            let routing = load_routing_config(path.as_deref(), &settings.trigger_name)?;
            println!("{}", serde_json::to_string_pretty(&routing)?);
        }
    }
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
