//! List commands implementation

use pylon_core::board::BoardCatalog;
use pylon_flash::jlink::JLink;
use pylon_flash::locator::DeviceLocator;
use pylon_flash::tools::{ARM_GDB, ARM_SIZE, JLINK};

use super::CliError;

/// List all known boards
pub fn list_boards(catalog: &BoardCatalog) {
    println!("Supported boards:");
    println!();
    println!(
        "{:<14} {:>23} {:>23} {:>9}",
        "Board", "RAM", "App slot", "Slot size"
    );
    println!("{}", "-".repeat(72));

    for board in catalog.iter() {
        println!(
            "{:<14} {:>23} {:>23} {:>9}",
            board.name,
            format!("{:#010x}-{:#010x}", board.ram.start, board.ram.end),
            format!("{:#010x}-{:#010x}", board.flash.start, board.flash.end),
            format_size(board.app_max_size)
        );
    }
}

/// List attached probes
pub fn list_probes(product: Option<&str>) -> Result<(), CliError> {
    JLINK.check()?;

    let jlink = JLink::default();
    let devices = DeviceLocator::new(&jlink).enumerate(product)?;
    if devices.is_empty() {
        println!("No J-Link probes found");
        return Ok(());
    }

    println!("Attached J-Link probes:");
    for device in &devices {
        println!("  {}", device);
    }
    Ok(())
}

/// Check every external tool, reporting each one
pub fn check_tools() -> Result<(), CliError> {
    let mut first_error = None;

    for requirement in [JLINK, ARM_GDB, ARM_SIZE] {
        match requirement.check() {
            Ok(Some(version)) => println!("  {:<20} {}", requirement.name, version),
            Ok(None) => println!("  {:<20} found", requirement.name),
            Err(e) => {
                println!("  {:<20} {}", requirement.name, e);
                first_error.get_or_insert(e);
            }
        }
    }

    match first_error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn format_size(bytes: u32) -> String {
    if bytes >= 1024 * 1024 && bytes % (1024 * 1024) == 0 {
        format!("{} MiB", bytes / (1024 * 1024))
    } else if bytes >= 1024 && bytes % 1024 == 0 {
        format!("{} KiB", bytes / 1024)
    } else {
        format!("{} B", bytes)
    }
}
