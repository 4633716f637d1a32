//! Probe command protocol
//!
//! The J-Link commander reads one command per line. [`ProbeCommand`] renders
//! the handful we use, [`CommandScript`] strings them together for one-shot
//! runs, and [`ProbeLink`] is the interface the flash sequence drives.

use std::fmt;
use std::path::PathBuf;

use crate::error::Result;

/// A J-Link commander command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeCommand {
    /// Connect to the target
    Connect,
    /// Erase the whole chip
    Erase,
    /// Write a 32-bit word
    WriteU32 {
        /// Register or memory address
        addr: u32,
        /// Value to write
        value: u32,
    },
    /// Program a raw binary at an address
    LoadBin {
        /// File to program; must end in `.bin`
        path: PathBuf,
        /// Destination address
        addr: u32,
    },
    /// Dump CPU registers
    Regs,
    /// Reset the target
    Reset,
    /// Let the target run
    Go,
    /// List attached probes
    ShowEmuList,
    /// Leave the commander
    Exit,
}

impl fmt::Display for ProbeCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeCommand::Connect => write!(f, "connect"),
            ProbeCommand::Erase => write!(f, "erase"),
            ProbeCommand::WriteU32 { addr, value } => write!(f, "w4 {:#x} {:#x}", addr, value),
            ProbeCommand::LoadBin { path, addr } => {
                write!(f, "loadbin \"{}\" {:#x}", path.display(), addr)
            }
            ProbeCommand::Regs => write!(f, "Regs"),
            ProbeCommand::Reset => write!(f, "r"),
            ProbeCommand::Go => write!(f, "go"),
            ProbeCommand::ShowEmuList => write!(f, "ShowEmuList"),
            ProbeCommand::Exit => write!(f, "exit"),
        }
    }
}

/// Newline-separated commands, always terminated by `exit`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandScript {
    commands: Vec<ProbeCommand>,
}

impl CommandScript {
    /// Script running `commands`
    pub fn new(commands: impl IntoIterator<Item = ProbeCommand>) -> Self {
        Self {
            commands: commands.into_iter().collect(),
        }
    }

    /// Append a command
    pub fn push(&mut self, command: ProbeCommand) {
        self.commands.push(command);
    }

    /// Commands before the final `exit`
    pub fn commands(&self) -> &[ProbeCommand] {
        &self.commands
    }

    /// Script text as fed to the commander
    pub fn render(&self) -> String {
        let mut script = String::new();
        for command in self
            .commands
            .iter()
            .filter(|c| **c != ProbeCommand::Exit)
        {
            script.push_str(&command.to_string());
            script.push('\n');
        }
        script.push_str("exit\n");
        script
    }
}

/// A connection to one probe, driven one command at a time
pub trait ProbeLink {
    /// Open a connection to the probe with this serial number and connect to
    /// its target
    fn connect(&mut self, serial: &str) -> Result<()>;

    /// Run one command, returning its output
    fn execute(&mut self, command: &ProbeCommand) -> Result<String>;

    /// Close the connection
    ///
    /// Must be safe to call when `connect` failed or was never called.
    fn disconnect(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_commands() {
        assert_eq!(
            ProbeCommand::WriteU32 {
                addr: 0x1000_1200,
                value: 18
            }
            .to_string(),
            "w4 0x10001200 0x12"
        );
        assert_eq!(
            ProbeCommand::LoadBin {
                path: PathBuf::from("/tmp/gg tool.bin"),
                addr: 0xc000
            }
            .to_string(),
            "loadbin \"/tmp/gg tool.bin\" 0xc000"
        );
        assert_eq!(ProbeCommand::Regs.to_string(), "Regs");
    }

    #[test]
    fn test_script_ends_with_single_exit() {
        let script = CommandScript::new([ProbeCommand::Connect, ProbeCommand::Erase]);
        assert_eq!(script.render(), "connect\nerase\nexit\n");

        let mut script = CommandScript::new([ProbeCommand::Reset, ProbeCommand::Go]);
        script.push(ProbeCommand::Exit);
        assert_eq!(script.render(), "r\ngo\nexit\n");
    }
}
