//! Memory usage command

use std::path::Path;

use pylon_core::board::BoardProfile;
use pylon_core::usage::{ImageSizeAnalyzer, MemoryUsageReport};
use pylon_flash::size_tool::ArmSize;
use pylon_flash::tools::ARM_SIZE;

use super::CliError;

/// Fail on the first given path that does not exist
///
/// The analyzer skips missing inputs, which is right for paths derived from
/// an app name but would hide a mistyped `--elf` or `--img`.
pub fn require_existing(paths: &[Option<&Path>]) -> Result<(), CliError> {
    match paths.iter().flatten().find(|path| !path.is_file()) {
        Some(path) => Err(pylon_core::Error::MissingArtifact(format!(
            "{} does not exist",
            path.display()
        ))
        .into()),
        None => Ok(()),
    }
}

/// Print usage of a build and how it changed since a baseline build
pub fn run_mem_usage(
    board: &BoardProfile,
    elf: Option<&Path>,
    img: Option<&Path>,
    baseline_elf: Option<&Path>,
    baseline_img: Option<&Path>,
) -> Result<(), CliError> {
    if elf.or(baseline_elf).is_some() {
        ARM_SIZE.check()?;
    }

    let analyzer = ImageSizeAnalyzer::new(ArmSize);
    let report = analyzer.analyze(elf, img, board)?;
    print_report(&report);

    if baseline_elf.is_none() && baseline_img.is_none() {
        return Ok(());
    }

    let baseline = analyzer.analyze(baseline_elf, baseline_img, board)?;
    let mut changed = false;
    for delta in baseline.compare(&report) {
        if let Some(message) = delta.message() {
            changed = true;
            if delta.is_regression() {
                log::warn!("{}", message);
            } else {
                log::info!("{}", message);
            }
        }
    }
    if !changed {
        log::info!("Memory usage unchanged since last build");
    }
    Ok(())
}

/// Print a usage report as a table
pub fn print_report(report: &MemoryUsageReport) {
    println!("{:<10} {:>10} {:>10} {:>10}", "Region", "Used", "Free", "Total");
    for (region, usage) in report.iter() {
        println!(
            "{:<10} {:>10} {:>10} {:>10}",
            region.to_string(),
            usage.used,
            usage.free(),
            usage.capacity
        );
        if usage.overflows() {
            log::warn!(
                "{} overflows by {} bytes",
                region,
                usage.used - usage.capacity
            );
        }
    }
}
