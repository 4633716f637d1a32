//! Flash sequencing
//!
//! A [`FlashController`] drives one [`ProbeLink`] through the flashing
//! protocol:
//!
//! ```text
//! Idle -> Connected [-> Erased -> RegistersWritten] -> Programmed -> Verified -> Disconnected
//! ```
//!
//! The bracketed steps only run when provisioning a blank board. A failing
//! step aborts the sequence without retrying, since the board may already be
//! erased; the probe is disconnected on every path.

use std::ffi::OsStr;
use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use pylon_core::board::{BoardProfile, PSELRESET_REGISTERS};
use pylon_core::device::DeviceHandle;
use pylon_core::usage::{self, MemoryUsageReport, Region};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::probe::{ProbeCommand, ProbeLink};

/// Step of the flash sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlashStep {
    /// Open the probe and connect to the target
    Connect,
    /// Full chip erase
    Erase,
    /// Write the reset pin configuration
    WriteRegisters,
    /// Program the image
    Program,
    /// Read back the CPU registers
    Verify,
    /// Close the probe
    Disconnect,
}

impl fmt::Display for FlashStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FlashStep::Connect => "connecting",
            FlashStep::Erase => "erasing",
            FlashStep::WriteRegisters => "writing reset registers",
            FlashStep::Program => "programming",
            FlashStep::Verify => "verifying",
            FlashStep::Disconnect => "disconnecting",
        };
        f.write_str(s)
    }
}

/// Where a controller is in the sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlashState {
    /// Nothing done yet
    Idle,
    /// Probe connected to the target
    Connected,
    /// Chip erased
    Erased,
    /// Reset pin registers written
    RegistersWritten,
    /// Image programmed
    Programmed,
    /// Target answered after programming
    Verified,
    /// Probe released; terminal
    Disconnected,
}

/// One image to write to one board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashJob {
    /// Image file
    pub image: PathBuf,
    /// Flash address the image is written to
    pub address: u32,
    /// Probe attached to the board
    pub device: DeviceHandle,
    /// Erase the chip and configure the reset pin first
    pub provisioning: bool,
}

impl FlashJob {
    /// Install an app image into the board's app slot
    pub fn install(image: impl Into<PathBuf>, board: &BoardProfile, device: DeviceHandle) -> Self {
        Self {
            image: image.into(),
            address: board.flash.start,
            device,
            provisioning: false,
        }
    }

    /// Provision a blank board with a bootloader at address 0
    pub fn provision(bootloader: impl Into<PathBuf>, device: DeviceHandle) -> Self {
        Self {
            image: bootloader.into(),
            address: 0,
            device,
            provisioning: true,
        }
    }

    /// Size of the image, checked against the end of the board's flash
    pub fn check_bounds(&self, board: &BoardProfile) -> Result<u64> {
        let size = fs::metadata(&self.image)
            .map_err(|source| pylon_core::Error::Io {
                path: self.image.clone(),
                source,
            })?
            .len();

        if u64::from(self.address) + size > u64::from(board.flash.end) {
            return Err(pylon_core::Error::ImageOutOfBounds {
                size,
                address: self.address,
                flash_end: board.flash.end,
            }
            .into());
        }
        Ok(size)
    }
}

/// Callback for progress reporting during a flash sequence
pub trait FlashProgress {
    /// Called before each step starts
    fn step(&mut self, step: FlashStep);

    /// Called once the probe was released after a successful sequence
    fn complete(&mut self);
}

/// A no-op progress reporter
pub struct NoProgress;

impl FlashProgress for NoProgress {
    fn step(&mut self, _step: FlashStep) {}
    fn complete(&mut self) {}
}

/// The image as a `.bin` file the commander's `loadbin` accepts
///
/// A staged copy is deleted when this is dropped.
enum StagedBinary<'a> {
    InPlace(&'a Path),
    Copy(NamedTempFile),
}

impl<'a> StagedBinary<'a> {
    fn new(image: &'a Path) -> io::Result<Self> {
        if image.extension() == Some(OsStr::new("bin")) {
            return Ok(StagedBinary::InPlace(image));
        }

        let mut staged = tempfile::Builder::new()
            .prefix(".pylon_image")
            .suffix(".bin")
            .tempfile()?;
        io::copy(&mut File::open(image)?, staged.as_file_mut())?;
        log::debug!("Staged {} as {}", image.display(), staged.path().display());
        Ok(StagedBinary::Copy(staged))
    }

    fn path(&self) -> &Path {
        match self {
            StagedBinary::InPlace(path) => path,
            StagedBinary::Copy(file) => file.path(),
        }
    }
}

/// Runs [`FlashJob`]s for one board over a probe link
pub struct FlashController<'a, L: ProbeLink> {
    link: L,
    board: &'a BoardProfile,
    state: FlashState,
    history: Vec<FlashState>,
}

impl<'a, L: ProbeLink> FlashController<'a, L> {
    /// Controller for `board`, talking through `link`
    pub fn new(link: L, board: &'a BoardProfile) -> Self {
        Self {
            link,
            board,
            state: FlashState::Idle,
            history: Vec::new(),
        }
    }

    /// Current state
    pub fn state(&self) -> FlashState {
        self.state
    }

    /// States entered by the last `flash` call, in order
    pub fn history(&self) -> &[FlashState] {
        &self.history
    }

    /// The underlying link
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Write `job` to the board
    ///
    /// Returns the app slot usage of the flashed image (empty when
    /// provisioning a bootloader).
    pub fn flash(&mut self, job: &FlashJob) -> Result<MemoryUsageReport> {
        self.flash_with_progress(job, &mut NoProgress)
    }

    /// [`flash`](Self::flash) with progress callbacks
    pub fn flash_with_progress<P: FlashProgress + ?Sized>(
        &mut self,
        job: &FlashJob,
        progress: &mut P,
    ) -> Result<MemoryUsageReport> {
        self.state = FlashState::Idle;
        self.history.clear();

        // Nothing touches the hardware until the image is known to fit.
        job.check_bounds(self.board)?;
        let mut report = MemoryUsageReport::new();
        if !job.provisioning {
            report.insert(
                Region::AppSlot,
                usage::app_slot_usage(&job.image, self.board)?,
            );
        }

        log::info!(
            "Flashing {} to {:#x} via J-Link {}",
            job.image.display(),
            job.address,
            job.device
        );

        let outcome = self.run_steps(job, progress);

        progress.step(FlashStep::Disconnect);
        let closed = self.link.disconnect();
        self.enter(FlashState::Disconnected);

        match (outcome, closed) {
            (Ok(()), Ok(())) => {
                progress.complete();
                Ok(report)
            }
            (Ok(()), Err(e)) => Err(Error::FlashWriteFailure {
                step: FlashStep::Disconnect,
                source: Box::new(e),
            }),
            (Err(e), closed) => {
                if let Err(close) = closed {
                    log::warn!("Disconnect after failed flash also failed: {}", close);
                }
                Err(e)
            }
        }
    }

    fn run_steps<P: FlashProgress + ?Sized>(
        &mut self,
        job: &FlashJob,
        progress: &mut P,
    ) -> Result<()> {
        let serial = job.device.serial.as_str();
        self.step(FlashStep::Connect, progress, |link| link.connect(serial))?;
        self.enter(FlashState::Connected);

        if job.provisioning {
            self.step(FlashStep::Erase, progress, |link| {
                link.execute(&ProbeCommand::Erase).map(drop)
            })?;
            self.enter(FlashState::Erased);

            let value = self.board.pselreset;
            self.step(FlashStep::WriteRegisters, progress, |link| {
                for addr in PSELRESET_REGISTERS {
                    link.execute(&ProbeCommand::WriteU32 { addr, value })?;
                }
                Ok(())
            })?;
            self.enter(FlashState::RegistersWritten);
        }

        let staged = StagedBinary::new(&job.image).map_err(|e| Error::FlashWriteFailure {
            step: FlashStep::Program,
            source: Box::new(e.into()),
        })?;
        let load = ProbeCommand::LoadBin {
            path: staged.path().to_path_buf(),
            addr: job.address,
        };
        self.step(FlashStep::Program, progress, |link| link.execute(&load).map(drop))?;
        drop(staged);
        self.enter(FlashState::Programmed);

        self.step(FlashStep::Verify, progress, |link| {
            link.execute(&ProbeCommand::Regs).map(drop)
        })?;
        self.enter(FlashState::Verified);

        Ok(())
    }

    fn step<P, F>(&mut self, step: FlashStep, progress: &mut P, f: F) -> Result<()>
    where
        P: FlashProgress + ?Sized,
        F: FnOnce(&mut L) -> Result<()>,
    {
        progress.step(step);
        log::debug!("Flash step: {}", step);
        f(&mut self.link).map_err(|e| Error::FlashWriteFailure {
            step,
            source: Box::new(e),
        })
    }

    fn enter(&mut self, state: FlashState) {
        self.state = state;
        self.history.push(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pylon_core::board::BoardCatalog;

    #[derive(Default)]
    struct ScriptedLink {
        sent: Vec<String>,
        loaded: Vec<PathBuf>,
        fail_on: Option<&'static str>,
        fail_connect: bool,
        fail_disconnect: bool,
        disconnects: usize,
    }

    impl ProbeLink for ScriptedLink {
        fn connect(&mut self, serial: &str) -> Result<()> {
            self.sent.push(format!("connect {}", serial));
            if self.fail_connect {
                return Err(Error::CommandFailed {
                    command: "connect".into(),
                    output: "Cannot connect to target.".into(),
                });
            }
            Ok(())
        }

        fn execute(&mut self, command: &ProbeCommand) -> Result<String> {
            let line = command.to_string();
            self.sent.push(line.clone());
            if let ProbeCommand::LoadBin { path, .. } = command {
                assert!(path.exists(), "loadbin of a missing file");
                self.loaded.push(path.clone());
            }
            match self.fail_on {
                Some(prefix) if line.starts_with(prefix) => Err(Error::CommandFailed {
                    command: line,
                    output: "****** Error: Failed".into(),
                }),
                _ => Ok(String::new()),
            }
        }

        fn disconnect(&mut self) -> Result<()> {
            self.disconnects += 1;
            if self.fail_disconnect {
                return Err(Error::Timeout {
                    tool: "JLinkExe".into(),
                    waited: std::time::Duration::from_secs(1),
                });
            }
            Ok(())
        }
    }

    fn board() -> BoardProfile {
        BoardCatalog::builtin()
            .unwrap()
            .lookup("nrf52840pdk")
            .unwrap()
            .clone()
    }

    fn image(dir: &tempfile::TempDir, name: &str, len: usize) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, vec![0xa5u8; len]).unwrap();
        path
    }

    #[test]
    fn test_install_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let img = image(&dir, "blinky.img", 4096);
        let board = board();
        let job = FlashJob::install(&img, &board, DeviceHandle::new("683512372"));

        let mut controller = FlashController::new(ScriptedLink::default(), &board);
        let report = controller.flash(&job).unwrap();

        assert_eq!(report.get(Region::AppSlot).unwrap().used, 4096);
        assert_eq!(controller.state(), FlashState::Disconnected);
        assert_eq!(
            controller.history(),
            [
                FlashState::Connected,
                FlashState::Programmed,
                FlashState::Verified,
                FlashState::Disconnected
            ]
        );

        let link = controller.link();
        assert_eq!(link.sent[0], "connect 683512372");
        assert!(link.sent[1].starts_with("loadbin \""));
        assert!(link.sent[1].ends_with(".bin\" 0xc000"));
        assert_eq!(link.sent[2], "Regs");
        assert_eq!(link.sent.len(), 3);
        assert_eq!(link.disconnects, 1);

        // The staged copy is gone, the original image is untouched
        assert!(!link.loaded[0].exists());
        assert!(img.exists());
    }

    #[test]
    fn test_provision_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let boot = image(&dir, "boot.bin", 16 * 1024);
        let board = board();
        let job = FlashJob::provision(&boot, DeviceHandle::new("683512372"));

        let mut controller = FlashController::new(ScriptedLink::default(), &board);
        let report = controller.flash(&job).unwrap();
        assert!(report.is_empty());

        assert_eq!(
            controller.history(),
            [
                FlashState::Connected,
                FlashState::Erased,
                FlashState::RegistersWritten,
                FlashState::Programmed,
                FlashState::Verified,
                FlashState::Disconnected
            ]
        );

        let link = controller.link();
        assert_eq!(
            link.sent[..4],
            [
                "connect 683512372",
                "erase",
                "w4 0x10001200 0x12",
                "w4 0x10001204 0x12"
            ]
        );
        assert_eq!(link.sent[4], format!("loadbin \"{}\" 0x0", boot.display()));

        // .bin files are programmed in place
        assert_eq!(link.loaded, [boot.clone()]);
        assert!(boot.exists());
    }

    #[test]
    fn test_program_failure_still_disconnects() {
        let dir = tempfile::tempdir().unwrap();
        let img = image(&dir, "blinky.img", 4096);
        let board = board();
        let job = FlashJob::install(&img, &board, DeviceHandle::new("1"));

        let link = ScriptedLink {
            fail_on: Some("loadbin"),
            ..Default::default()
        };
        let mut controller = FlashController::new(link, &board);

        match controller.flash(&job) {
            Err(Error::FlashWriteFailure { step, source }) => {
                assert_eq!(step, FlashStep::Program);
                assert!(matches!(*source, Error::CommandFailed { .. }));
            }
            other => panic!("expected FlashWriteFailure, got {:?}", other),
        }

        assert_eq!(controller.state(), FlashState::Disconnected);
        assert!(!controller.history().contains(&FlashState::Programmed));
        assert_eq!(controller.link().disconnects, 1);
        assert!(controller.link().sent.iter().all(|l| l != "Regs"));
        assert!(!controller.link().loaded[0].exists());
    }

    #[test]
    fn test_connect_failure() {
        let dir = tempfile::tempdir().unwrap();
        let img = image(&dir, "blinky.img", 128);
        let board = board();
        let job = FlashJob::install(&img, &board, DeviceHandle::new("1"));

        let link = ScriptedLink {
            fail_connect: true,
            ..Default::default()
        };
        let mut controller = FlashController::new(link, &board);
        let err = controller.flash(&job).unwrap_err();

        assert!(matches!(
            err,
            Error::FlashWriteFailure {
                step: FlashStep::Connect,
                ..
            }
        ));
        assert!(err.hint().is_some());
        assert_eq!(controller.history(), [FlashState::Disconnected]);
    }

    #[test]
    fn test_disconnect_failure_after_success() {
        let dir = tempfile::tempdir().unwrap();
        let img = image(&dir, "blinky.img", 128);
        let board = board();
        let job = FlashJob::install(&img, &board, DeviceHandle::new("1"));

        let link = ScriptedLink {
            fail_disconnect: true,
            ..Default::default()
        };
        let mut controller = FlashController::new(link, &board);

        assert!(matches!(
            controller.flash(&job),
            Err(Error::FlashWriteFailure {
                step: FlashStep::Disconnect,
                ..
            })
        ));
        assert_eq!(controller.state(), FlashState::Disconnected);
        assert!(controller.history().contains(&FlashState::Verified));
    }

    #[test]
    fn test_out_of_bounds_never_connects() {
        let dir = tempfile::tempdir().unwrap();
        let board = board();
        let len = (board.flash.end - board.flash.start) as usize + 1;
        let img = image(&dir, "huge.img", len);
        let job = FlashJob::install(&img, &board, DeviceHandle::new("1"));

        let mut controller = FlashController::new(ScriptedLink::default(), &board);
        assert!(matches!(
            controller.flash(&job),
            Err(Error::Core(pylon_core::Error::ImageOutOfBounds { .. }))
        ));
        assert_eq!(controller.state(), FlashState::Idle);
        assert!(controller.link().sent.is_empty());
        assert_eq!(controller.link().disconnects, 0);
    }

    #[test]
    fn test_step_names() {
        assert_eq!(FlashStep::WriteRegisters.to_string(), "writing reset registers");
        let err = Error::FlashWriteFailure {
            step: FlashStep::Program,
            source: Box::new(Error::CommandFailed {
                command: "loadbin".into(),
                output: "Error".into(),
            }),
        };
        assert!(err.to_string().starts_with("flashing failed while programming"));
    }
}
