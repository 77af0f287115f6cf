use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "ria",
    about = "RIA stores and the ORA special remote",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Remote configuration file (TOML)
    #[arg(short, long, global = true, default_value = "ria-remote.toml")]
    pub config: PathBuf,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a store root with its layout version marker
    CreateStore(CreateStoreArgs),
    /// Create a dataset inside a store
    CreateDataset(CreateDatasetArgs),
    /// Verify the configured store and show what was found
    Info,
    /// Check store and dataset, record archive id and URLs
    Init,
    /// Report whether a key is present
    Checkpresent(KeyArgs),
    /// Retrieve a key's content into a file
    Get(TransferArgs),
    /// Store a file's content under a key
    Put(TransferArgs),
    /// Remove a key's content
    Remove(KeyArgs),
    /// Show where a key's content lives
    Whereis(KeyArgs),
    /// Show the transfer cost of the configured store
    Cost,
}

#[derive(Args)]
pub struct CreateStoreArgs {
    /// Store URL or absolute path
    pub url: String,
    #[arg(long, default_value = "1")]
    pub layout_version: String,
    /// Do not enable the remote error log
    #[arg(long)]
    pub no_logging: bool,
}

#[derive(Args)]
pub struct CreateDatasetArgs {
    /// Store URL or absolute path
    pub url: String,
    pub dataset_id: String,
    #[arg(long)]
    pub alias: Option<String>,
    #[arg(long, default_value = "2")]
    pub object_version: String,
    #[arg(long, default_value = "1")]
    pub store_version: String,
    #[arg(long)]
    pub no_logging: bool,
}

#[derive(Args)]
pub struct KeyArgs {
    pub key: String,
}

#[derive(Args)]
pub struct TransferArgs {
    pub key: String,
    pub file: PathBuf,
}
