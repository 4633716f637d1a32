//! CLI command implementations
//!
//! Every command that touches the hardware checks the tools it needs first,
//! then resolves the probe to use. Picking among several probes is the only
//! interactive step and only happens on a terminal; otherwise the ambiguity
//! is reported as an error listing the serial numbers.

pub mod debug;
pub mod flash;
mod list;
pub mod usage;

pub use list::{check_tools, list_boards, list_probes};

use std::io::{self, BufRead, IsTerminal, Write};

use pylon_core::device::{DeviceHandle, Resolution};
use pylon_flash::jlink::{JLink, JLinkConfig};
use pylon_flash::locator::DeviceLocator;
use thiserror::Error;

use crate::cli::TargetArgs;

/// Errors reported by the command line front end
#[derive(Debug, Error)]
pub enum CliError {
    /// Board, artifact or probe selection error
    #[error(transparent)]
    Core(#[from] pylon_core::Error),

    /// Tool, flashing or debug session error
    #[error(transparent)]
    Flash(#[from] pylon_flash::Error),

    /// The answer to the probe prompt was not one of the choices
    #[error("invalid probe selection '{0}'")]
    InvalidChoice(String),

    /// Progress display template error
    #[error("progress display: {0}")]
    Progress(#[from] indicatif::style::TemplateError),

    /// I/O error on the terminal
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl CliError {
    /// A concrete next step for the user, when there is one
    pub fn hint(&self) -> Option<String> {
        match self {
            CliError::Core(e) => e.hint(),
            CliError::Flash(e) => e.hint(),
            CliError::InvalidChoice(_) => Some("enter the number shown next to the probe".into()),
            _ => None,
        }
    }
}

/// J-Link driver configured from the command line
pub fn jlink(target: &TargetArgs) -> JLink {
    JLink::new(JLinkConfig {
        device: target.jlink_device.clone(),
        speed_khz: target.speed,
        ..JLinkConfig::default()
    })
}

/// Find the probe to use, asking the user if several are attached
pub fn select_device(jlink: &JLink, serial: Option<&str>) -> Result<DeviceHandle, CliError> {
    match DeviceLocator::new(jlink).locate(serial, None)? {
        Resolution::Ambiguous(candidates) if io::stdin().is_terminal() => {
            let stdin = io::stdin();
            prompt_device(candidates, &mut stdin.lock(), &mut io::stdout())
        }
        resolution => {
            let device = resolution.into_result()?;
            log::info!("Using J-Link {}", device);
            Ok(device)
        }
    }
}

fn prompt_device<R: BufRead, W: Write>(
    mut candidates: Vec<DeviceHandle>,
    input: &mut R,
    output: &mut W,
) -> Result<DeviceHandle, CliError> {
    writeln!(output, "Several J-Link probes are attached:")?;
    for (i, device) in candidates.iter().enumerate() {
        writeln!(output, "  [{}] {}", i + 1, device)?;
    }
    write!(output, "Select a probe [1-{}]: ", candidates.len())?;
    output.flush()?;

    let mut line = String::new();
    input.read_line(&mut line)?;
    let answer = line.trim();

    match answer.parse::<usize>() {
        Ok(n) if (1..=candidates.len()).contains(&n) => Ok(candidates.swap_remove(n - 1)),
        _ => Err(CliError::InvalidChoice(answer.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidates() -> Vec<DeviceHandle> {
        vec![DeviceHandle::new("683512372"), DeviceHandle::new("683998877")]
    }

    #[test]
    fn test_prompt_picks_numbered_probe() {
        let mut output = Vec::new();
        let device = prompt_device(candidates(), &mut "2\n".as_bytes(), &mut output).unwrap();
        assert_eq!(device.serial, "683998877");

        let shown = String::from_utf8(output).unwrap();
        assert!(shown.contains("[1] 683512372"));
        assert!(shown.contains("[2] 683998877"));
    }

    #[test]
    fn test_prompt_rejects_out_of_range() {
        for answer in ["0\n", "3\n", "abc\n", "\n"] {
            let result = prompt_device(candidates(), &mut answer.as_bytes(), &mut Vec::<u8>::new());
            assert!(matches!(result, Err(CliError::InvalidChoice(_))));
        }
    }
}
