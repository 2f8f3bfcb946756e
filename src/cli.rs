use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;

use parley::config::{CliOverrides, load_config};
use parley::server::run_server;

#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "parley - visitor chat backend")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Display version information
    Version,
    /// Run the HTTP API
    Serve {
        /// JSON config file (default: ~/.parley/config.json)
        #[arg(long, value_name = "PATH")]
        config: Option<PathBuf>,
        /// Address to bind
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
}

pub fn run(cli: Cli) {
    match cli.command {
        Some(Commands::Version) => print_version(),
        Some(Commands::Serve { config, host, port }) => {
            let overrides = CliOverrides {
                config_path: config,
                host,
                port,
            };
            if let Err(e) = serve(&overrides) {
                tracing::error!(error = format!("{:#}", e), "Server stopped with an error");
                eprintln!("error: {:#}", e);
                process::exit(1);
            }
        }
        None => print_help(),
    }
}

fn serve(overrides: &CliOverrides) -> anyhow::Result<()> {
    let config = load_config(overrides)?;
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(run_server(config))
}

pub fn extract_command_from_error(error_msg: &str) -> String {
    // "error: unrecognized subcommand 'invalid_command'"
    if let Some(start) = error_msg.find('\'') {
        if let Some(end) = error_msg[start + 1..].find('\'') {
            return error_msg[start + 1..start + 1 + end].to_string();
        }
    }
    "unknown".to_string()
}

fn print_version() {
    println!("parley {}", env!("CARGO_PKG_VERSION"));
}

fn print_help() {
    println!("parley - visitor chat backend");
    println!();
    println!("Usage: parley [OPTIONS] <COMMAND>");
    println!();
    println!("Commands:");
    println!("  serve    Run the HTTP API");
    println!("  version  Display version information");
    println!("  help     Print this message or the help of the given subcommand(s)");
    println!();
    println!("Options:");
    println!("  -v, --verbose  Enable debug logging");
    println!("  -V, --version  Print version");
    println!("  -h, --help     Print help");
}
