//! SEGGER J-Link commander driver
//!
//! Two ways of talking to `JLinkExe`:
//!
//! - [`JLink::run_script`] pipes a whole [`CommandScript`] into a fresh
//!   commander and returns its output. Used for probe enumeration.
//! - [`JLinkSession`] keeps one commander open and sends a command at a time,
//!   reading back to the `J-Link>` prompt. The commander runs with
//!   `-ExitOnError 1`, so a failing command also ends the process and the
//!   failure cannot go unnoticed.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};
use crate::probe::{CommandScript, ProbeCommand, ProbeLink};

const COMMANDER: &str = "JLinkExe";
const PROMPT: &str = "J-Link>";

// Only lines the commander starts with a failure marker. Echoed file names
// (`Downloading file [...]`) never start a line with one.
static ERROR_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"(?m)^[ \t]*(?:\*+[ \t]*Error\b|Error\b|ERROR\b",
        r"|Failed to\b|Cannot connect\b|Could not\b).*$"
    ))
    .unwrap()
});

/// Target connection settings shared by all J-Link tools
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JLinkConfig {
    /// Target device name as known to J-Link (e.g., "nRF52")
    pub device: String,
    /// Interface speed in kHz
    pub speed_khz: u32,
    /// Target interface
    pub interface: String,
    /// Longest a single commander command may take
    pub command_timeout: Duration,
    /// Commander executable
    pub commander: PathBuf,
}

impl Default for JLinkConfig {
    fn default() -> Self {
        Self {
            device: "nRF52".to_string(),
            speed_khz: 4000,
            interface: "SWD".to_string(),
            command_timeout: Duration::from_secs(60),
            commander: PathBuf::from(COMMANDER),
        }
    }
}

impl JLinkConfig {
    /// `-device <d> -speed <s> -if <i>`
    pub fn target_args(&self) -> Vec<String> {
        vec![
            "-device".into(),
            self.device.clone(),
            "-speed".into(),
            self.speed_khz.to_string(),
            "-if".into(),
            self.interface.clone(),
        ]
    }

    fn commander_name(&self) -> String {
        self.commander.display().to_string()
    }
}

/// Entry point to the J-Link commander
#[derive(Debug, Clone, Default)]
pub struct JLink {
    config: JLinkConfig,
}

impl JLink {
    /// Driver using `config` for target connections
    pub fn new(config: JLinkConfig) -> Self {
        Self { config }
    }

    /// Target connection settings
    pub fn config(&self) -> &JLinkConfig {
        &self.config
    }

    /// Pipe `script` into a new commander started with `args`
    pub fn run_script(&self, args: &[String], script: &CommandScript) -> Result<String> {
        let tool = self.config.commander_name();
        log::debug!("{} {} <<< {:?}", tool, args.join(" "), script.render());

        let mut child = Command::new(&self.config.commander)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| Error::Spawn {
                tool: self.config.commander_name(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(script.render().as_bytes())?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(Error::UnexpectedExit {
                tool: self.config.commander_name(),
                status: output.status.to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run a command script file against the probe with `serial`
    ///
    /// `-CommanderScript` needs a real file; it is written to a temporary
    /// location and removed when this returns, whatever the outcome.
    pub fn run_script_file(&self, serial: &str, script: &CommandScript) -> Result<()> {
        let mut file = tempfile::Builder::new()
            .prefix(".jlink_script")
            .suffix(".jlink")
            .tempfile()?;
        file.write_all(script.render().as_bytes())?;
        file.flush()?;

        let mut args = self.config.target_args();
        args.extend(script_file_args(serial, file.path()));

        let tool = self.config.commander_name();
        log::debug!("{} {}", tool, args.join(" "));
        let status = Command::new(&self.config.commander)
            .args(&args)
            .stdin(Stdio::null())
            .status()
            .map_err(|source| Error::Spawn {
                tool: self.config.commander_name(),
                source,
            })?;

        if !status.success() {
            return Err(Error::UnexpectedExit {
                tool: self.config.commander_name(),
                status: status.to_string(),
            });
        }
        Ok(())
    }

    /// `ShowEmuList` output
    pub fn emu_list(&self) -> Result<String> {
        self.run_script(&[], &CommandScript::new([ProbeCommand::ShowEmuList]))
    }

    /// A new, unconnected interactive session
    pub fn session(&self) -> JLinkSession {
        JLinkSession::new(self.config.clone())
    }
}

fn script_file_args(serial: &str, script: &Path) -> Vec<String> {
    vec![
        "-autoconnect".into(),
        "1".into(),
        "-CommanderScript".into(),
        script.display().to_string(),
        "-selectemubysn".into(),
        serial.to_string(),
    ]
}

/// Running commander process
struct Commander {
    child: Child,
    stdin: ChildStdin,
    output: Receiver<Vec<u8>>,
}

/// Interactive commander session
///
/// Implements [`ProbeLink`]: `connect` starts `JLinkExe` bound to one probe
/// and issues `connect`, `execute` sends one command and waits for the
/// prompt, `disconnect` sends `exit`. Dropping a session kills a commander
/// that is still running.
pub struct JLinkSession {
    config: JLinkConfig,
    commander: Option<Commander>,
}

impl JLinkSession {
    /// Unconnected session
    pub fn new(config: JLinkConfig) -> Self {
        Self {
            config,
            commander: None,
        }
    }

    fn spawn(&self, serial: &str) -> Result<Commander> {
        let mut args = self.config.target_args();
        args.extend([
            "-selectemubysn".to_string(),
            serial.to_string(),
            "-ExitOnError".to_string(),
            "1".to_string(),
        ]);
        let tool = self.config.commander_name();
        log::debug!("{} {}", tool, args.join(" "));

        let mut child = Command::new(&self.config.commander)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| Error::Spawn {
                tool: self.config.commander_name(),
                source,
            })?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(Error::Spawn {
                    tool: self.config.commander_name(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::BrokenPipe,
                        "commander pipes unavailable",
                    ),
                });
            }
        };

        let (tx, output) = mpsc::channel();
        thread::spawn(move || {
            let mut stdout = stdout;
            let mut buf = [0u8; 1024];
            loop {
                match stdout.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        if tx.send(buf[..n].to_vec()).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(Commander {
            child,
            stdin,
            output,
        })
    }

    fn read_until_prompt(&mut self, command: &str) -> Result<String> {
        let timeout = self.config.command_timeout;
        let commander = self.commander.as_mut().ok_or_else(|| not_connected(command))?;

        let deadline = Instant::now() + timeout;
        let mut transcript = Vec::new();
        loop {
            {
                let text = String::from_utf8_lossy(&transcript);
                if let Some(body) = text.trim_end().strip_suffix(PROMPT) {
                    return Ok(body.to_string());
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            match commander.output.recv_timeout(remaining) {
                Ok(chunk) => transcript.extend_from_slice(&chunk),
                Err(RecvTimeoutError::Timeout) => {
                    return Err(Error::Timeout {
                        tool: self.config.commander_name(),
                        waited: timeout,
                    })
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::CommandFailed {
                        command: command.to_string(),
                        output: failure_summary(&String::from_utf8_lossy(&transcript)),
                    })
                }
            }
        }
    }
}

impl ProbeLink for JLinkSession {
    fn connect(&mut self, serial: &str) -> Result<()> {
        if self.commander.is_some() {
            self.disconnect()?;
        }
        self.commander = Some(self.spawn(serial)?);
        self.read_until_prompt("<startup>")?;
        self.execute(&ProbeCommand::Connect)?;
        Ok(())
    }

    fn execute(&mut self, command: &ProbeCommand) -> Result<String> {
        let line = command.to_string();
        let commander = self.commander.as_mut().ok_or_else(|| not_connected(&line))?;

        log::debug!("J-Link> {}", line);
        writeln!(commander.stdin, "{}", line)
            .and_then(|_| commander.stdin.flush())
            .map_err(|_| Error::CommandFailed {
                command: line.clone(),
                output: "commander is no longer running".into(),
            })?;

        let output = self.read_until_prompt(&line)?;
        log::trace!("{}", output);

        if ERROR_LINE.is_match(&output) {
            return Err(Error::CommandFailed {
                command: line,
                output: failure_summary(&output),
            });
        }
        Ok(output)
    }

    fn disconnect(&mut self) -> Result<()> {
        let Some(mut commander) = self.commander.take() else {
            return Ok(());
        };

        // The commander may already be gone after an error.
        let _ = writeln!(commander.stdin, "{}", ProbeCommand::Exit);
        let _ = commander.stdin.flush();
        drop(commander.stdin);

        let deadline = Instant::now() + self.config.command_timeout;
        loop {
            if let Some(status) = commander.child.try_wait()? {
                if status.success() {
                    return Ok(());
                }
                return Err(Error::UnexpectedExit {
                    tool: self.config.commander_name(),
                    status: status.to_string(),
                });
            }
            if Instant::now() >= deadline {
                let _ = commander.child.kill();
                let _ = commander.child.wait();
                return Err(Error::Timeout {
                    tool: self.config.commander_name(),
                    waited: self.config.command_timeout,
                });
            }
            thread::sleep(Duration::from_millis(20));
        }
    }
}

impl Drop for JLinkSession {
    fn drop(&mut self) {
        if let Some(mut commander) = self.commander.take() {
            let _ = commander.child.kill();
            let _ = commander.child.wait();
        }
    }
}

fn not_connected(command: &str) -> Error {
    Error::CommandFailed {
        command: command.to_string(),
        output: "not connected".into(),
    }
}

/// The most useful line of a failed command's output
fn failure_summary(output: &str) -> String {
    if let Some(m) = ERROR_LINE.find(output) {
        return m.as_str().trim().to_string();
    }
    output
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("commander exited without output")
        .to_string()
}
