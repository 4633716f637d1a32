//! Provision and install commands

use std::path::Path;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use pylon_core::artifact::AppArtifacts;
use pylon_core::board::{BoardCatalog, BoardProfile};
use pylon_core::usage::MemoryUsageReport;
use pylon_flash::flash::{FlashController, FlashJob, FlashProgress, FlashStep};
use pylon_flash::tools::{self, JLINK};

use super::{jlink, select_device, usage, CliError};
use crate::cli::{ImageSource, TargetArgs};

/// Spinner showing the current flash step
struct SpinnerProgress {
    pb: ProgressBar,
    image: String,
}

impl SpinnerProgress {
    fn new(image: &Path) -> Result<Self, CliError> {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
        pb.enable_steady_tick(Duration::from_millis(100));
        Ok(Self {
            pb,
            image: image.display().to_string(),
        })
    }
}

impl FlashProgress for SpinnerProgress {
    fn step(&mut self, step: FlashStep) {
        let msg = match step {
            FlashStep::Erase => "Erasing chip (this may take a while)...".to_string(),
            FlashStep::Program => format!("Programming {}...", self.image),
            step => format!("{}...", capitalize(&step.to_string())),
        };
        self.pb.set_message(msg);
    }

    fn complete(&mut self) {
        self.pb.finish_with_message(format!("Flashed {}", self.image));
    }
}

impl Drop for SpinnerProgress {
    fn drop(&mut self) {
        if !self.pb.is_finished() {
            self.pb.abandon_with_message("Flashing failed");
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Erase a board and flash its bootloader
pub fn run_provision(
    catalog: &BoardCatalog,
    target: &TargetArgs,
    bootloader: &Path,
) -> Result<(), CliError> {
    tools::check_all(&[JLINK])?;
    let board = catalog.lookup(&target.board)?;
    let jlink = jlink(target);
    let device = select_device(&jlink, target.sn.as_deref())?;

    let job = FlashJob::provision(bootloader, device);
    flash_with_spinner(&jlink, board, &job)?;
    println!(
        "Board {} provisioned with {}",
        board.name,
        bootloader.display()
    );
    Ok(())
}

/// Flash an app into the app slot
pub fn run_install(
    catalog: &BoardCatalog,
    target: &TargetArgs,
    source: &ImageSource,
    project: &Path,
) -> Result<(), CliError> {
    tools::check_all(&[JLINK])?;
    let board = catalog.lookup(&target.board)?;

    let image = match (&source.image, &source.app) {
        (Some(image), _) => image.clone(),
        (None, Some(app)) => AppArtifacts::locate(project, app, &board.name).image,
        (None, None) => {
            return Err(
                pylon_core::Error::MissingArtifact("pass --image or --app".into()).into(),
            )
        }
    };
    if !image.is_file() {
        return Err(pylon_core::Error::MissingArtifact(format!(
            "{} does not exist",
            image.display()
        ))
        .into());
    }

    let jlink = jlink(target);
    let device = select_device(&jlink, target.sn.as_deref())?;

    let job = FlashJob::install(image, board, device);
    let report = flash_with_spinner(&jlink, board, &job)?;
    usage::print_report(&report);
    Ok(())
}

fn flash_with_spinner(
    jlink: &pylon_flash::jlink::JLink,
    board: &BoardProfile,
    job: &FlashJob,
) -> Result<MemoryUsageReport, CliError> {
    let mut progress = SpinnerProgress::new(&job.image)?;
    let mut controller = FlashController::new(jlink.session(), board);
    let report = controller.flash_with_progress(job, &mut progress)?;
    Ok(report)
}
