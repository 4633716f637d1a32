//! External tool requirements
//!
//! Every operation checks the tools it needs before touching the hardware,
//! so a missing or outdated install fails early with a download link instead
//! of halfway through a flash sequence.

use std::fmt;
use std::io::{self, Write};
use std::process::{Command, Stdio};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

static VERSION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\.(\d+)(?:\.(\d+)|([a-z])\b)?").unwrap());

/// Tool version as `major.minor.patch`
///
/// SEGGER versions such as `V7.94e` map the letter suffix to the patch
/// number (`a` = 1), so `V7.94e` is 7.94.5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ToolVersion {
    /// Major version
    pub major: u32,
    /// Minor version
    pub minor: u32,
    /// Patch level
    pub patch: u32,
}

impl ToolVersion {
    /// Version from its parts
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// First version number found in `text`
    pub fn parse(text: &str) -> Option<Self> {
        let caps = VERSION.captures(text)?;
        let major = caps.get(1)?.as_str().parse().ok()?;
        let minor = caps.get(2)?.as_str().parse().ok()?;
        let patch = if let Some(patch) = caps.get(3) {
            patch.as_str().parse().ok()?
        } else if let Some(letter) = caps.get(4) {
            u32::from(letter.as_str().as_bytes()[0] - b'a') + 1
        } else {
            0
        };
        Some(Self::new(major, minor, patch))
    }
}

impl fmt::Display for ToolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// How to make a tool print its version
#[derive(Debug, Clone, Copy)]
pub enum VersionQuery {
    /// Pass these arguments
    Args(&'static [&'static str]),
    /// Feed this text on stdin (for interactive tools)
    Stdin(&'static str),
}

/// A tool an operation depends on
#[derive(Debug, Clone, Copy)]
pub struct ToolRequirement {
    /// Name shown to the user
    pub name: &'static str,
    /// Executable to run
    pub program: &'static str,
    /// How to query the version
    pub query: VersionQuery,
    /// Oldest supported version; `None` only checks that the tool runs
    pub minimum: Option<ToolVersion>,
    /// Download page
    pub link: &'static str,
}

/// SEGGER J-Link Software Pack (`JLinkExe`, `JLinkGDBServer`, `JLinkRTTClient`)
pub const JLINK: ToolRequirement = ToolRequirement {
    name: "JLinkExe",
    program: "JLinkExe",
    query: VersionQuery::Stdin("exit\n"),
    minimum: Some(ToolVersion::new(6, 0, 0)),
    link: "https://www.segger.com/downloads/jlink/#J-LinkSoftwareAndDocumentationPack",
};

/// GNU Arm toolchain debugger
pub const ARM_GDB: ToolRequirement = ToolRequirement {
    name: "arm-none-eabi-gdb",
    program: "arm-none-eabi-gdb",
    query: VersionQuery::Args(&["--version"]),
    minimum: None,
    link: "https://developer.arm.com/downloads/-/arm-gnu-toolchain-downloads",
};

/// GNU Arm toolchain section size tool
pub const ARM_SIZE: ToolRequirement = ToolRequirement {
    name: "arm-none-eabi-size",
    program: "arm-none-eabi-size",
    query: VersionQuery::Args(&["--version"]),
    minimum: None,
    link: "https://developer.arm.com/downloads/-/arm-gnu-toolchain-downloads",
};

impl ToolRequirement {
    /// Run the tool and check its version
    ///
    /// Returns the detected version, if the tool printed one.
    pub fn check(&self) -> Result<Option<ToolVersion>> {
        let output = match self.query_output() {
            Ok(output) => output,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::ToolNotInstalled {
                    name: self.name,
                    link: self.link,
                })
            }
            Err(source) => {
                return Err(Error::Spawn {
                    tool: self.program.to_string(),
                    source,
                })
            }
        };

        let version = ToolVersion::parse(&output);
        self.evaluate(version)?;

        match version {
            Some(v) => log::debug!("{} {} found", self.name, v),
            None => log::debug!("{} found (version unknown)", self.name),
        }
        Ok(version)
    }

    /// Compare a detected version with the minimum
    pub fn evaluate(&self, found: Option<ToolVersion>) -> Result<()> {
        let Some(minimum) = self.minimum else {
            return Ok(());
        };

        match found {
            Some(found) if found >= minimum => Ok(()),
            found => Err(Error::ToolVersionTooOld {
                name: self.name,
                found: found.map_or_else(|| "unknown version".to_string(), |v| v.to_string()),
                minimum: minimum.to_string(),
                link: self.link,
            }),
        }
    }

    fn query_output(&self) -> io::Result<String> {
        let mut cmd = Command::new(self.program);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

        let output = match self.query {
            VersionQuery::Args(args) => cmd.args(args).stdin(Stdio::null()).output()?,
            VersionQuery::Stdin(input) => {
                let mut child = cmd.stdin(Stdio::piped()).spawn()?;
                if let Some(mut stdin) = child.stdin.take() {
                    stdin.write_all(input.as_bytes())?;
                }
                child.wait_with_output()?
            }
        };

        let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
        text.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(text)
    }
}

/// Check several requirements, stopping at the first failure
pub fn check_all(requirements: &[ToolRequirement]) -> Result<()> {
    for requirement in requirements {
        requirement.check()?;
    }
    Ok(())
}
