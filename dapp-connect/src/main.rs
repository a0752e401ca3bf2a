//! Dapp Connect CLI
//!
//! Developer tooling for the wallet-side session layer.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "dapp-connect")]
#[command(about = "Inspect chains, accounts and request routing for relay-paired dapps")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Custom config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List supported chains
    Chains {
        /// Include test networks
        #[arg(long)]
        testnets: bool,
    },

    /// Show how requests for each method are routed
    Classify {
        /// JSON-RPC method names
        #[arg(required = true)]
        methods: Vec<String>,
    },

    /// Build an account string from an address and chain
    EncodeAccount {
        /// Wallet address
        address: String,

        /// Chain as a native id (1) or protocol id (eip155:1)
        chain: String,
    },

    /// Split an account string into address and native chain id
    DecodeAccount {
        /// Account in `address@namespace:reference` form
        account: String,
    },

    /// Show the effective configuration
    Config {
        /// Write a default config file
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config_path = cli
        .config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(dapp_connect::config::default_config_path);

    let result = match cli.command {
        Commands::Chains { testnets } => commands::chains::run(testnets),
        Commands::Classify { methods } => commands::classify::run(&methods),
        Commands::EncodeAccount { address, chain } => {
            commands::account::encode(&address, &chain)
        }
        Commands::DecodeAccount { account } => commands::account::decode(&account),
        Commands::Config { init } => commands::config::run(&config_path, init),
    };

    if let Err(e) = result {
        commands::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}
