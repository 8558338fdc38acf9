use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Cairn - BFT consensus node
#[derive(Parser)]
#[command(name = "cairn")]
#[command(about = "Cairn consensus node and utilities")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a Cairn node
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "config.json")]
        config: PathBuf,
    },

    /// Run an in-process validator network until it reaches a height
    Devnet {
        /// Number of validators
        #[arg(short, long, default_value = "4")]
        validators: usize,

        /// Blocks to commit before exiting
        #[arg(long, default_value = "5")]
        heights: u64,

        /// Keep node data under this directory instead of in memory
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Initialize a new node configuration
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "config.json")]
        output: PathBuf,

        /// Number of validator keys to generate
        #[arg(long, default_value = "1")]
        validators: usize,
    },

    /// Generate a new keypair
    Keygen {
        /// Output file for secret key
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}
