use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "strata",
    about = "Strata: an append-only, signed operation ledger",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate an ed25519 signing key
    Keygen(KeygenArgs),
    /// Compute the content hash of an operation file
    Hash(HashArgs),
    /// Hash and sign an operation file
    Sign(SignArgs),
    /// Print the effective node configuration
    Config(ConfigArgs),
    /// Produce blocks on an in-memory node and show sealing and compaction
    Simulate(SimulateArgs),
}

#[derive(Args)]
pub struct KeygenArgs {
    /// Derive the key deterministically from this seed
    #[arg(long)]
    pub seed: Option<String>,
}

#[derive(Args)]
pub struct HashArgs {
    /// Operation JSON file
    pub file: PathBuf,
}

#[derive(Args)]
pub struct SignArgs {
    /// Operation JSON file
    pub file: PathBuf,
    /// Signer reference (`nickname` or `nickname:site`)
    #[arg(long)]
    pub name: String,
    /// Hex-encoded private key
    #[arg(long, conflicts_with = "seed", required_unless_present = "seed")]
    pub key: Option<String>,
    /// Derive the private key from this seed
    #[arg(long)]
    pub seed: Option<String>,
    /// Write the signed operation here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// TOML configuration file; defaults are printed when omitted
    pub file: Option<PathBuf>,
}

#[derive(Args)]
pub struct SimulateArgs {
    /// Number of blocks to produce after genesis
    #[arg(short = 'n', long, default_value = "16")]
    pub blocks: usize,
    /// Operations per block
    #[arg(long, default_value = "1")]
    pub ops_per_block: usize,
    /// Override the configured superblock size
    #[arg(long)]
    pub superblock_size: Option<usize>,
    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,
}
