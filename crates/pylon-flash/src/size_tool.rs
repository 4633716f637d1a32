//! `arm-none-eabi-size` driver

use std::path::Path;
use std::process::Command;

use pylon_core::size::SectionSizeSource;

use crate::tools::ARM_SIZE;

/// Reads section tables with `arm-none-eabi-size -A`
#[derive(Debug, Clone, Copy, Default)]
pub struct ArmSize;

impl SectionSizeSource for ArmSize {
    fn section_table(&self, elf: &Path) -> pylon_core::Result<String> {
        log::debug!("{} -A {}", ARM_SIZE.program, elf.display());

        let output = Command::new(ARM_SIZE.program)
            .arg("-A")
            .arg(elf)
            .output()
            .map_err(|e| {
                pylon_core::Error::SizeTool(format!("failed to run {}: {}", ARM_SIZE.program, e))
            })?;

        if !output.status.success() {
            return Err(pylon_core::Error::SizeTool(format!(
                "{} {} failed ({}): {}",
                ARM_SIZE.program,
                elf.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
