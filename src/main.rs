//! pylon - Provision, flash and debug Pylon boards
//!
//! Drives a SEGGER J-Link probe to put a bootloader and apps on nRF52 based
//! boards, and attaches the RTT console or GDB to a running board.
//!
//! # Architecture
//!
//! - `pylon-core` knows the boards' memory layouts, computes image usage
//!   and picks a probe among the attached ones. It never spawns a process.
//! - `pylon-flash` runs the SEGGER tools and the GNU Arm toolchain: the
//!   flash sequence, debug servers and clients, tool version checks.
//!
//! This binary parses the command line, checks the needed tools, asks the
//! user to pick a probe when that is ambiguous and prints the results.

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use commands::CliError;
use pylon_core::board::BoardCatalog;
use std::fs;
use std::path::Path;
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let catalog = match load_board_catalog(cli.board_db.as_deref()) {
        Ok(catalog) => catalog,
        Err(e) => {
            eprintln!("Failed to load board catalog: {}", e);
            std::process::exit(1);
        }
    };

    log::debug!("Loaded {} board definitions", catalog.len());

    if let Err(e) = run(cli.command, &catalog) {
        eprintln!("error: {}", e);
        if let Some(hint) = e.hint() {
            eprintln!("hint: {}", hint);
        }
        std::process::exit(1);
    }

    Ok(())
}

fn run(command: Commands, catalog: &BoardCatalog) -> Result<(), CliError> {
    match command {
        Commands::ListBoards => {
            commands::list_boards(catalog);
            Ok(())
        }
        Commands::ListProbes { product } => commands::list_probes(product.as_deref()),
        Commands::CheckTools => commands::check_tools(),
        Commands::Provision { target, image } => {
            commands::flash::run_provision(catalog, &target, &image)
        }
        Commands::Install {
            target,
            source,
            project,
        } => commands::flash::run_install(catalog, &target, &source, &project),
        Commands::Serial {
            target,
            reset_board,
            ready_timeout,
        } => commands::debug::run_serial(
            catalog,
            &target,
            reset_board,
            Duration::from_secs(ready_timeout),
        ),
        Commands::Debug {
            target,
            port,
            source,
            project,
            ready_timeout,
        } => commands::debug::run_debug(
            catalog,
            &target,
            port,
            &source,
            &project,
            Duration::from_secs(ready_timeout),
        ),
        Commands::MemUsage {
            board,
            elf,
            img,
            app,
            project,
            baseline_elf,
            baseline_img,
        } => {
            let board = catalog.lookup(&board)?;
            let (elf, img) = match app {
                Some(app) => {
                    let artifacts =
                        pylon_core::artifact::AppArtifacts::locate(&project, &app, &board.name);
                    (Some(artifacts.elf), Some(artifacts.image))
                }
                None => {
                    commands::usage::require_existing(&[elf.as_deref(), img.as_deref()])?;
                    (elf, img)
                }
            };
            commands::usage::require_existing(&[baseline_elf.as_deref(), baseline_img.as_deref()])?;
            commands::usage::run_mem_usage(
                board,
                elf.as_deref(),
                img.as_deref(),
                baseline_elf.as_deref(),
                baseline_img.as_deref(),
            )
        }
    }
}

/// Load the board catalog from the specified file or use the built-in one
fn load_board_catalog(path: Option<&Path>) -> Result<BoardCatalog, Box<dyn std::error::Error>> {
    let Some(path) = path else {
        return Ok(BoardCatalog::builtin()?);
    };

    if !path.is_file() {
        return Err(format!("Board catalog not found: {}", path.display()).into());
    }
    let content = fs::read_to_string(path)?;
    let catalog = BoardCatalog::from_ron(&content)?;
    log::info!("Using board catalog {}", path.display());
    Ok(catalog)
}
