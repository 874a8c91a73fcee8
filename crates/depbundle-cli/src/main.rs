#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::missing_errors_doc)]

mod commands;
mod logging;

use clap::Parser;
use depbundle_core::Config;
use miette::{IntoDiagnostic, Result};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "depbundle")]
#[command(author, version, about = "Fetch and bundle the dependencies of a source revision", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON formatted output (stable, machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Path to the engine configuration file
    #[arg(long, global = true, value_name = "FILE", env = "DEPBUNDLE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Print version information
    Version,

    /// Create a request for a repository revision
    Submit {
        /// Repository URL
        repo: String,

        /// Full 40 character commit hash
        #[arg(value_name = "REF")]
        git_ref: String,

        /// Package manager to fetch dependencies for (repeatable; none means auto-detect)
        #[arg(long = "pkg-manager", short = 'p', value_name = "NAME")]
        pkg_managers: Vec<String>,
    },

    /// Run the pipeline of one request in the foreground
    Run {
        /// Request id
        id: u64,
    },

    /// Process every initiated request with the worker pool
    Process {
        /// Override the configured number of workers
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Show one request, or list all of them
    Status {
        /// Request id
        id: Option<u64>,
    },

    /// Release the proxy resources of a request for one ecosystem
    Cleanup {
        /// Request id
        id: u64,

        /// Proxy family: js or pip
        family: String,
    },

    /// Show the packages and dependencies recorded for a request
    Deps {
        /// Request id
        id: u64,
    },

    /// Canonicalize a packages or content manifest document
    Canonicalize {
        /// Input JSON file
        file: PathBuf,

        /// Write the result here instead of stdout
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Commands that need no configuration
    match &cli.command {
        Commands::Version => return commands::version::run(cli.json),
        Commands::Canonicalize { file, output } => {
            return commands::canonicalize::run(file, output.as_deref(), cli.json);
        }
        _ => {}
    }

    logging::init(cli.verbose, cli.json);
    let config = Config::load(cli.config.as_deref()).into_diagnostic()?;

    match cli.command {
        Commands::Submit {
            repo,
            git_ref,
            pkg_managers,
        } => commands::submit::run(&config, repo, git_ref, pkg_managers, cli.json),
        Commands::Run { id } => commands::run::run(&config, id, cli.json),
        Commands::Process { workers } => {
            let config = match workers {
                Some(workers) => config.with_workers(workers),
                None => config,
            };
            commands::process::run(&config, cli.json)
        }
        Commands::Status { id } => commands::status::run(&config, id, cli.json),
        Commands::Cleanup { id, family } => commands::cleanup::run(&config, id, &family, cli.json),
        Commands::Deps { id } => commands::deps::run(&config, id, cli.json),
        Commands::Version | Commands::Canonicalize { .. } => Ok(()),
    }
}
