//! RTT console and GDB commands

use std::path::Path;
use std::time::Duration;

use pylon_core::artifact::AppArtifacts;
use pylon_core::board::BoardCatalog;
use pylon_flash::debug::{DebugSession, DebugSessionManager};
use pylon_flash::tools::{self, ARM_GDB, JLINK};

use super::{jlink, select_device, CliError};
use crate::cli::{ElfSource, TargetArgs};

/// Open the RTT console
pub fn run_serial(
    catalog: &BoardCatalog,
    target: &TargetArgs,
    reset_board: bool,
    ready_timeout: Duration,
) -> Result<(), CliError> {
    tools::check_all(&[JLINK])?;
    let board = catalog.lookup(&target.board)?;
    let jlink = jlink(target);
    let device = select_device(&jlink, target.sn.as_deref())?;

    log::info!("Opening RTT console of {} board", board.name);
    let session = DebugSessionManager::new(&jlink)
        .with_ready_timeout(ready_timeout)
        .start_rtt(&device, reset_board)?;
    wait(session)
}

/// Attach GDB
pub fn run_debug(
    catalog: &BoardCatalog,
    target: &TargetArgs,
    port: Option<u16>,
    source: &ElfSource,
    project: &Path,
    ready_timeout: Duration,
) -> Result<(), CliError> {
    tools::check_all(&[JLINK, ARM_GDB])?;
    let board = catalog.lookup(&target.board)?;

    let elf = match (&source.elf, &source.app) {
        (Some(elf), _) => Some(elf.clone()),
        (None, Some(app)) => Some(AppArtifacts::locate(project, app, &board.name).elf),
        (None, None) => None,
    };
    if let Some(elf) = elf.as_deref().filter(|elf| !elf.is_file()) {
        return Err(pylon_core::Error::MissingArtifact(format!(
            "{} does not exist",
            elf.display()
        ))
        .into());
    }

    let jlink = jlink(target);
    let device = select_device(&jlink, target.sn.as_deref())?;

    let session = DebugSessionManager::new(&jlink)
        .with_ready_timeout(ready_timeout)
        .start_gdb(&device, port, elf.as_deref())?;
    wait(session)
}

fn wait(mut session: DebugSession) -> Result<(), CliError> {
    let status = session.wait()?;
    if !status.success() {
        log::warn!("Client exited with {}", status);
    }
    if session.owns_server() {
        log::info!("Stopping GDB server on port {}", session.gdb_port());
    }
    Ok(())
}
