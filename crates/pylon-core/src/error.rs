//! Error types for pylon-core

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::device::DeviceHandle;

/// Errors raised by board lookup, image accounting and probe selection
#[derive(Debug, Error)]
pub enum Error {
    /// Board identifier is not in the catalog
    #[error("unknown board '{board}'")]
    UnknownBoard {
        /// The requested board identifier
        board: String,
        /// Boards the catalog does know about
        known: Vec<String>,
    },

    /// No debug probe is attached
    #[error("no J-Link probe found")]
    NotFound,

    /// Several probes are attached and none was selected
    #[error("{} J-Link probes attached, cannot pick one automatically", .0.len())]
    AmbiguousSelection(Vec<DeviceHandle>),

    /// A serial number was given but no attached probe has it
    #[error("no attached J-Link probe has serial number {serial}")]
    InvalidSerialNumber {
        /// The requested serial number
        serial: String,
        /// Serial numbers of the probes that are attached
        available: Vec<String>,
    },

    /// Neither an ELF nor an image file was available to analyze
    #[error("no firmware artifact to analyze ({0})")]
    MissingArtifact(String),

    /// Image would not fit between its destination and the end of flash
    #[error(
        "image of {size} bytes at {address:#010x} runs past the end of flash ({flash_end:#010x})"
    )]
    ImageOutOfBounds {
        /// Image size in bytes
        size: u64,
        /// Destination address
        address: u32,
        /// First address past the board's flash
        flash_end: u32,
    },

    /// Board catalog could not be parsed or failed validation
    #[error("board catalog: {0}")]
    Catalog(String),

    /// Section size table had a row we could not understand
    #[error("malformed section size row {row}: '{text}'")]
    SizeTable {
        /// Zero-based row index after the header was discarded
        row: usize,
        /// The offending row
        text: String,
    },

    /// The section size tool failed
    #[error("section size tool failed: {0}")]
    SizeTool(String),

    /// I/O error on an artifact
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// File being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// A concrete next step for the user, when there is one
    pub fn hint(&self) -> Option<String> {
        match self {
            Error::UnknownBoard { known, .. } => {
                Some(format!("known boards: {}", known.join(", ")))
            }
            Error::NotFound => Some(
                "connect a J-Link probe and check it shows up in `JLinkExe` > ShowEmuList".into(),
            ),
            Error::AmbiguousSelection(candidates) => {
                let serials: Vec<&str> = candidates.iter().map(|d| d.serial.as_str()).collect();
                Some(format!(
                    "pass one of these serial numbers with --sn: {}",
                    serials.join(", ")
                ))
            }
            Error::InvalidSerialNumber { available, .. } => Some(format!(
                "attached probes: {}",
                if available.is_empty() {
                    "none".to_string()
                } else {
                    available.join(", ")
                }
            )),
            Error::MissingArtifact(_) => {
                Some("build the app first or pass --elf and/or --img explicitly".into())
            }
            Error::ImageOutOfBounds { .. } => {
                Some("check the image was built for this board (--board)".into())
            }
            Error::SizeTool(_) => {
                Some("make sure arm-none-eabi-size from the GNU Arm toolchain is on PATH".into())
            }
            _ => None,
        }
    }
}

/// Result type for pylon-core operations
pub type Result<T> = std::result::Result<T, Error>;
