mod cli;

use clap::Parser;
use tracing::Level;
use tracing_subscriber::EnvFilter;

fn init_logging(verbose: bool) {
    let filter_level = if verbose { Level::DEBUG } else { Level::INFO };

    // Logs go to stderr so command output on stdout stays clean
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(filter_level.into()))
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::time())
        .init();
}

fn main() {
    match cli::Cli::try_parse() {
        Ok(cli) => {
            init_logging(cli.verbose);

            tracing::debug!("Verbose mode enabled");
            tracing::debug!("Starting parley v{}", env!("CARGO_PKG_VERSION"));

            cli::run(cli);
        }
        Err(e) => {
            use clap::error::ErrorKind;

            match e.kind() {
                ErrorKind::DisplayVersion | ErrorKind::DisplayHelp => {
                    e.print().ok();
                    std::process::exit(0);
                }
                ErrorKind::InvalidSubcommand => {
                    let cmd = cli::extract_command_from_error(&e.to_string());
                    eprintln!("error: unknown command: {}", cmd);
                    eprintln!("\nValid commands are: serve, version, help");
                    std::process::exit(1);
                }
                _ => {
                    e.print().ok();
                    std::process::exit(2);
                }
            }
        }
    }
}
