//! pylon-flash - Flashing and debugging Pylon boards through a J-Link probe
//!
//! This crate drives the SEGGER J-Link tools and the GNU Arm toolchain:
//!
//! - [`tools`] - checks that the external tools are installed and recent
//! - [`locator`] - enumerating attached probes
//! - [`flash`] - the connect/erase/program/verify sequence
//! - [`debug`] - GDB server, RTT console and GDB sessions
//! - [`ports`] - local port allocation for the debug servers
//! - [`jlink`] and [`probe`] - the `JLinkExe` command protocol
//! - [`size_tool`] - section tables from `arm-none-eabi-size`
//!
//! Board layouts, usage reports and probe selection come from `pylon-core`.
//!
//! # Example
//!
//! ```ignore
//! use pylon_core::board::BoardCatalog;
//! use pylon_flash::flash::{FlashController, FlashJob};
//! use pylon_flash::jlink::JLink;
//! use pylon_flash::locator::DeviceLocator;
//!
//! let catalog = BoardCatalog::builtin()?;
//! let board = catalog.lookup("nrf52840pdk")?;
//! let jlink = JLink::default();
//!
//! let device = DeviceLocator::new(&jlink).locate(None, None)?.into_result()?;
//! let job = FlashJob::install("blinky.img", board, device);
//! FlashController::new(jlink.session(), board).flash(&job)?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod debug;
pub mod error;
pub mod flash;
pub mod jlink;
pub mod locator;
pub mod ports;
pub mod probe;
pub mod size_tool;
pub mod tools;

#[cfg(all(test, unix))]
mod fake_tool;

pub use error::{Error, Result};
