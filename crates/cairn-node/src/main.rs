use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod chain;
mod cli;
mod config;
mod devnet;
mod network;
mod node;

use cli::{Cli, Commands};
use config::{generate_sample_config, NodeConfig};
use devnet::DevnetOptions;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    let _subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config } => {
            run_node(config).await?;
        }
        Commands::Devnet {
            validators,
            heights,
            data_dir,
        } => {
            run_devnet(validators, heights, data_dir).await?;
        }
        Commands::Init { output, validators } => {
            init_config(output, validators)?;
        }
        Commands::Keygen { output } => {
            generate_keypair(output)?;
        }
    }

    Ok(())
}

/// Run a Cairn node
async fn run_node(config_path: PathBuf) -> Result<()> {
    info!("Loading configuration from {:?}", config_path);

    let config = if config_path.exists() {
        NodeConfig::load(&config_path)?
    } else {
        error!(
            "Configuration file not found: {:?}. Run 'cairn init' to create one.",
            config_path
        );
        return Err(anyhow::anyhow!("Configuration file not found"));
    };

    node::run(config).await
}

/// Run an in-process devnet and print the agreed chain
async fn run_devnet(validators: usize, heights: u64, data_dir: Option<PathBuf>) -> Result<()> {
    let options = DevnetOptions {
        data_dir,
        ..DevnetOptions::new(validators, heights)
    };

    let hashes = devnet::run(options).await?;

    println!("\nAll {} validators agree:", validators);
    for (index, hash) in hashes.iter().enumerate() {
        println!("  height {:>4}  {}", index + 1, hash);
    }

    Ok(())
}

/// Initialize a new configuration file
fn init_config(output: PathBuf, validators: usize) -> Result<()> {
    if validators == 0 {
        anyhow::bail!("at least one validator key is required");
    }

    info!("Generating sample configuration");

    let config = generate_sample_config(validators);
    config.save(&output)?;

    info!("Configuration saved to {:?}", output);
    info!("Generated validators:");
    for public_key in &config.validators {
        info!("  {}", public_key);
    }

    println!("\nConfiguration file created: {}", output.display());
    println!("Edit the file to customize your node settings.");
    println!("\nTo start the node, run:");
    println!("  cairn run --config {}", output.display());

    Ok(())
}

/// Generate a new keypair
fn generate_keypair(output: Option<PathBuf>) -> Result<()> {
    let keypair = cairn_core::KeyPair::generate();

    println!("Generated new keypair:");
    println!("  Public key:  {}", keypair.public.to_hex());
    println!("  Secret key:  {}", keypair.secret.to_hex());

    if let Some(path) = output {
        std::fs::write(&path, keypair.secret.to_hex())?;
        info!("Secret key saved to {:?}", path);
    }

    println!("\nWARNING: Keep your secret key safe! Do not share it with anyone.");

    Ok(())
}
