//! The `emberd` binary: config loading, tracing setup, and the node
//! lifecycle around a Ctrl-C wait.
//!
//! Exit codes: 0 on a clean run, 1 for user-facing errors (bad arguments,
//! bad config), 2 for internal faults.

use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use emberd::{EmberdConfig, Node, NodeError};

#[derive(Parser)]
#[command(name = "emberd", about = "The Ember blockchain node", version)]
struct Args {
    /// Path to a TOML configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the node until interrupted.
    Start {
        /// Enable the block producer regardless of the config file.
        #[arg(long)]
        mine: bool,
    },
    /// Print the effective configuration and exit.
    Config,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .expect("the fallback filter directive parses");
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(ErrorLayer::default())
        .init();

    color_eyre::install().expect("color-eyre installs once");
}

async fn run(args: Args) -> Result<(), NodeError> {
    let mut config = EmberdConfig::load(args.config.as_deref())?;

    match args.command {
        Command::Config => {
            let rendered = toml::to_string_pretty(&config)
                .map_err(emberd::config::ConfigError::from)?;
            println!("{}", rendered);
            Ok(())
        }
        Command::Start { mine } => {
            if mine {
                config.mining.enabled = true;
            }
            let node = Node::init(config)?;
            node.start().await?;
            info!("node running; interrupt to stop");

            tokio::signal::ctrl_c().await.map_err(NodeError::Network)?;
            node.stop().await?;
            Ok(())
        }
    }
}

fn main() {
    init_tracing();
    // Bad arguments are a user error, exit code 1.
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();
            process::exit(if err.use_stderr() { 1 } else { 0 });
        }
    };

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!(%err, "failed to start the runtime");
            process::exit(2);
        }
    };

    match runtime.block_on(run(args)) {
        Ok(()) => {}
        Err(err) if err.is_user_error() => {
            error!(%err, "command failed");
            process::exit(1);
        }
        Err(err) => {
            error!(%err, "internal error");
            process::exit(2);
        }
    }
}
