mod commands;
mod context;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io;
use tracing_subscriber::EnvFilter;

use commands::{
    check::{self, CheckArgs, handle_check},
    link::{self, LinkArgs, handle_link},
    probe::{self, ProbeArgs, handle_probe},
};
use output::{GlobalOptions, OutputFormat, OutputManager};

const APPENDIX: &str = r#"Environment:
  LINKDB_TOPOLOGY   Topology file used when none is given
  LINKDB_PREFIX     Key prefix for provisioned databases (default: linkdb)
  REDIS_URL         Redis URL that replaces the topology's host and port
  RUST_LOG          Log filter, e.g. linkdb=debug

Topology (TOML, or JSON with the same shape):
  host = "127.0.0.1"
  port = 6379

  [databases.orders]
  items = [{ keys = [{ field = "sku" }, { field = "created", direction = "desc" }] }]
  payments = []

  [overrides.orders]
  host = "10.0.0.9"

Run 'linkdb <command> --help' for examples."#;

#[derive(Parser)]
#[command(name = "linkdb")]
#[command(version)]
#[command(about = "Provision databases, collections and indexes from a topology file")]
#[command(after_long_help = APPENDIX)]
#[command(subcommand_required = true, arg_required_else_help = true)]
struct Cli {
    /// Output format
    #[arg(long, value_enum, default_value = "table", global = true)]
    output: OutputFormat,

    /// Suppress output (only errors will be shown)
    #[arg(short = 'q', long, global = true)]
    quiet: bool,

    /// Enable verbose output and debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a topology offline and preview its aliases
    #[command(after_help = check::EXAMPLES)]
    Check(CheckArgs),

    /// Create missing collections, ensure indexes and print the layout
    #[command(after_help = link::EXAMPLES)]
    Link(LinkArgs),

    /// Link one database only if the server already has it
    #[command(after_help = probe::EXAMPLES)]
    Probe(ProbeArgs),
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose { "linkdb=debug" } else { "linkdb=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = execute(cli).await {
        eprintln!("Error: {err:#}");
        std::process::exit(1);
    }
}

async fn execute(cli: Cli) -> Result<()> {
    if cli.no_color {
        colored::control::set_override(false);
    }
    let output = OutputManager::new(GlobalOptions {
        output_format: cli.output,
        quiet: cli.quiet,
        verbose: cli.verbose,
        no_color: cli.no_color,
    });

    match cli.command {
        Commands::Check(args) => handle_check(args, &output).await?,
        Commands::Link(args) => handle_link(args, &output).await?,
        Commands::Probe(args) => handle_probe(args, &output).await?,
    }
    Ok(())
}
