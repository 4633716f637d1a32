//! Error types for probe and toolchain operations

use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::flash::FlashStep;

/// Errors raised while driving the SEGGER tools and the GNU Arm toolchain
#[derive(Debug, Error)]
pub enum Error {
    /// Board, artifact or probe selection error
    #[error(transparent)]
    Core(#[from] pylon_core::Error),

    /// Required tool is not on PATH
    #[error("{name} is not installed")]
    ToolNotInstalled {
        /// Tool name
        name: &'static str,
        /// Where to get it
        link: &'static str,
    },

    /// Installed tool is older than required
    #[error("{name} {found} is installed but {minimum} or newer is required")]
    ToolVersionTooOld {
        /// Tool name
        name: &'static str,
        /// Version found
        found: String,
        /// Minimum supported version
        minimum: String,
        /// Where to get a newer one
        link: &'static str,
    },

    /// A step of the flash sequence failed; the probe was disconnected
    #[error("flashing failed while {step}: {source}")]
    FlashWriteFailure {
        /// Step that failed
        step: FlashStep,
        /// What went wrong
        #[source]
        source: Box<Error>,
    },

    /// No local port could be bound
    #[error("could not allocate a local port: {0}")]
    PortAllocationFailure(#[source] io::Error),

    /// A server did not start listening in time
    #[error("nothing is listening on port {port} after {waited:?}")]
    ServerNotReady {
        /// Port that was polled
        port: u16,
        /// How long we waited
        waited: Duration,
    },

    /// A probe command reported an error
    #[error("J-Link command '{command}' failed: {output}")]
    CommandFailed {
        /// Command as sent
        command: String,
        /// Relevant tool output
        output: String,
    },

    /// A tool exited unexpectedly or with a failure status
    #[error("{tool} exited unexpectedly ({status})")]
    UnexpectedExit {
        /// Tool name
        tool: String,
        /// Exit status description
        status: String,
    },

    /// A tool did not answer in time
    #[error("{tool} did not respond within {waited:?}")]
    Timeout {
        /// Tool name
        tool: String,
        /// How long we waited
        waited: Duration,
    },

    /// A tool could not be started
    #[error("failed to launch {tool}: {source}")]
    Spawn {
        /// Tool name
        tool: String,
        /// Underlying error
        #[source]
        source: io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// A concrete next step for the user, when there is one
    pub fn hint(&self) -> Option<String> {
        match self {
            Error::Core(e) => e.hint(),
            Error::ToolNotInstalled { link, .. } | Error::ToolVersionTooOld { link, .. } => {
                Some(format!("download and install it from {}", link))
            }
            Error::FlashWriteFailure { step, source } => Some(match step {
                FlashStep::Connect => source.hint().unwrap_or_else(|| {
                    "check the probe is connected to the board and the board is powered".into()
                }),
                FlashStep::Disconnect => {
                    "the image was written; power-cycle the board if it does not start".into()
                }
                _ => {
                    "the board may be partially erased; run the same command again to reflash it"
                        .into()
                }
            }),
            Error::ServerNotReady { .. } => Some(
                "check that no other J-Link session holds the probe, or raise --ready-timeout"
                    .into(),
            ),
            Error::PortAllocationFailure(_) => Some(
                "free some local TCP ports or pass --port for an already running GDB server"
                    .into(),
            ),
            _ => None,
        }
    }
}

/// Result type for pylon-flash operations
pub type Result<T> = std::result::Result<T, Error>;
