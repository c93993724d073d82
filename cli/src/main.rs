// bandwidth-cli
// Offline tools for metric databases and recorded packet files

use anyhow::Result;
use bandwidth_cli::commands::{self, inspect::InspectArgs, print_error, replay::ReplayArgs};
use clap::{Parser, Subcommand};
use env_logger::Env;

#[derive(Parser)]
#[command(name = "bandwidth-cli")]
#[command(about = "Bandwidth recorder offline tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(short, long)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the metrics stored in a database, optionally overwriting one
    Inspect(InspectArgs),

    /// Total the traffic in a recorded packet file
    Replay(ReplayArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let env = if cli.debug {
        Env::default().default_filter_or("debug")
    } else {
        Env::default().default_filter_or("info")
    };
    env_logger::init_from_env(env);

    if let Err(e) = run(cli.command).await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Inspect(args) => commands::inspect::run(args).await,
        Commands::Replay(args) => {
            tokio::task::spawn_blocking(move || commands::replay::run(args)).await?
        }
    }
}
