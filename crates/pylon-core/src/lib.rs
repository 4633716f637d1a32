//! pylon-core - Board layouts, image accounting and probe selection
//!
//! This crate holds the parts of Pylon board tooling that do not talk to
//! hardware:
//!
//! - [`board`] - the compiled-in catalog of board memory layouts
//! - [`usage`] and [`size`] - RAM/FLASH/app-slot usage of a firmware image
//! - [`device`] - parsing probe enumeration output and picking a probe
//! - [`artifact`] - where the build system leaves an app's ELF and image
//!
//! Anything that spawns the SEGGER tools lives in `pylon-flash`.
//!
//! # Example
//!
//! ```ignore
//! use pylon_core::board::BoardCatalog;
//! use pylon_core::usage::app_slot_usage;
//!
//! let catalog = BoardCatalog::builtin()?;
//! let board = catalog.lookup("nrf52840pdk")?;
//! let slot = app_slot_usage(Path::new("blinky.img"), board)?;
//! println!("App slot: {} used, {} free", slot.used, slot.free());
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod artifact;
pub mod board;
pub mod device;
pub mod error;
pub mod size;
pub mod usage;

pub use error::{Error, Result};
