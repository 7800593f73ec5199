// CLI module - command-line argument parsing and handlers
//
// Provides a config subcommand alongside the default "run the server" mode:
// - config --show: Display effective configuration
// - config --path: Show config file path

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{Config, VERSION};

/// relaymon - monitoring reverse proxy for LLM APIs
#[derive(Parser)]
#[command(name = "relaymon")]
#[command(version = VERSION)]
#[command(about = "Monitoring reverse proxy for LLM APIs", long_about = None)]
pub struct Cli {
    /// Path to a config file (default: ~/.config/relaymon/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Inspect configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },
}

/// Handle CLI subcommands. Returns true if a command was handled (exit after).
pub fn handle_cli(cli: &Cli) -> bool {
    match &cli.command {
        Some(Commands::Config { show, path }) => {
            if *path {
                match Config::config_path() {
                    Some(p) => println!("{}", p.display()),
                    None => eprintln!("Cannot determine home directory"),
                }
            } else if *show {
                match Config::load(cli.config.as_ref()) {
                    Ok(config) => println!("{:#?}", config),
                    Err(e) => {
                        eprintln!("Config error: {}", e);
                        std::process::exit(1);
                    }
                }
            } else {
                println!("Usage: relaymon config [--show|--path]");
            }
            true
        }
        None => false,
    }
}
