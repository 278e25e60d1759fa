use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cli;

#[derive(Parser)]
#[command(
    name = "pixkern",
    version,
    about = "Lowers single-pixel image kernels to CUDA, OpenCL or CPU loop nests"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Lower a kernel description and print the synthesized body
    Lower(cli::lower::LowerArgs),
    /// List the boundary variants selected for a kernel
    Variants(cli::variants::VariantsArgs),
    /// Show content hashes of lowered kernels (BLAKE3)
    Hash {
        /// Kernel description files (.json)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Show full 256-bit hashes instead of short form
        #[arg(long)]
        full: bool,
        #[command(flatten)]
        lower: cli::LowerFlags,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_env("PIXKERN_LOG")
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Lower(args) => cli::lower::cmd_lower(args),
        Command::Variants(args) => cli::variants::cmd_variants(args),
        Command::Hash {
            inputs,
            full,
            lower,
        } => cli::hash::cmd_hash(inputs, full, lower),
    }
}
