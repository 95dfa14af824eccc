//! CLI command definitions and argument parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::commands;
use crate::ExitCode;

/// relaunch - sign releases and check for updates
#[derive(Parser, Debug)]
#[command(name = "relaunch")]
#[command(version, about = "Sign release trees and check for self-updates")]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> anyhow::Result<ExitCode> {
        match self.command {
            Commands::Keygen(args) => commands::keygen(&args),
            Commands::Sign(args) => commands::sign(&args),
            Commands::Verify(args) => commands::verify(&args),
            Commands::Check(args) => commands::check(&args).await,
        }
    }
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Generate an RSA key pair for signing releases
    Keygen(KeygenArgs),
    /// Sign every file of a release tree
    Sign(SignArgs),
    /// Verify a signed release tree
    Verify(VerifyArgs),
    /// Ask the configured provider for the latest version
    Check(CheckArgs),
}

/// Arguments for the keygen command
#[derive(Parser, Debug)]
pub struct KeygenArgs {
    /// Private key file name; the public key gets a `.pub` suffix
    #[arg(long, default_value = "id_rsa")]
    pub name: PathBuf,

    /// Key size in bits
    #[arg(long, default_value_t = relaunch_updater::crypto::DEFAULT_KEY_BITS)]
    pub bits: usize,
}

/// Arguments for the sign command
#[derive(Parser, Debug)]
pub struct SignArgs {
    /// Release tree to sign
    #[arg(long)]
    pub path: PathBuf,

    /// PEM private key
    #[arg(long, env = "RELAUNCH_PRIVATE_KEY")]
    pub key: PathBuf,
}

/// Arguments for the verify command
#[derive(Parser, Debug)]
pub struct VerifyArgs {
    /// Release tree holding `signatures.json`
    #[arg(long)]
    pub path: PathBuf,

    /// PEM public key
    #[arg(long, env = "RELAUNCH_PUBLIC_KEY")]
    pub pubkey: PathBuf,
}

/// Arguments for the check command
#[derive(Parser, Debug)]
pub struct CheckArgs {
    /// Updater configuration (TOML)
    #[arg(long, env = "RELAUNCH_CONFIG")]
    pub config: PathBuf,

    /// Version currently installed
    #[arg(long)]
    pub current: String,
}
