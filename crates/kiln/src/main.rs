//! kiln CLI - static-site asset builds with live reload.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod config;

use config::Project;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Build templates, styles and scripts into a static site")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to kiln.toml config file
    #[arg(short, long, default_value = "kiln.toml", global = true)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default kiln.toml and starter sources
    Init {
        /// Overwrite an existing config file
        #[arg(short, long)]
        yes: bool,
    },

    /// Build the site from scratch
    Build {
        /// Output directory (defaults to config or "www")
        #[arg(short, long)]
        dest: Option<PathBuf>,
    },

    /// Remove the output directory
    Clean,

    /// Run a single named task
    Run {
        /// Task name (see `kiln tasks`)
        task: String,
    },

    /// List available tasks
    Tasks,

    /// Build, then serve with file watching and live reload
    Watch {
        /// Port to listen on (defaults to config or 3000)
        #[arg(short, long)]
        port: Option<u16>,

        /// Do not open browser
        #[arg(long)]
        no_open: bool,
    },

    /// Preview the built site
    Serve {
        /// Port to listen on (defaults to config or 3000)
        #[arg(short, long)]
        port: Option<u16>,

        /// Directory to serve (defaults to the output directory)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt().with_env_filter(filter).with_target(false).init();

    if let Commands::Init { yes } = cli.command {
        return commands::init::run(&cli.config, yes).await;
    }

    let project = Project::load(&cli.config)?;

    // Execute command
    match cli.command {
        Commands::Init { .. } => {}
        Commands::Build { dest } => {
            commands::build::build(&project, dest).await?;
        }
        Commands::Clean => {
            commands::build::clean(&project).await?;
        }
        Commands::Run { task } => {
            commands::build::run(&project, &task).await?;
        }
        Commands::Tasks => {
            commands::tasks::run(&project, cli.verbose).await?;
        }
        Commands::Watch { port, no_open } => {
            commands::watch::run(&project, port, !no_open).await?;
        }
        Commands::Serve { port, dir } => {
            commands::serve::run(&project, port, dir).await?;
        }
    }

    Ok(())
}
