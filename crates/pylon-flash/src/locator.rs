//! Probe enumeration

use pylon_core::device::{self, DeviceHandle, Resolution};

use crate::error::Result;
use crate::jlink::JLink;

/// Finds attached J-Link probes
pub struct DeviceLocator<'a> {
    jlink: &'a JLink,
}

impl<'a> DeviceLocator<'a> {
    /// Locator using `jlink` to list probes
    pub fn new(jlink: &'a JLink) -> Self {
        Self { jlink }
    }

    /// Attached probes, optionally only those whose product name contains
    /// `product_name`
    pub fn enumerate(&self, product_name: Option<&str>) -> Result<Vec<DeviceHandle>> {
        let output = self.jlink.emu_list()?;
        let devices = device::parse_emu_list(&output, product_name);
        log::debug!("Found {} J-Link probe(s)", devices.len());
        Ok(devices)
    }

    /// Enumerate and pick a probe
    ///
    /// Ambiguity is returned to the caller, which decides whether to prompt.
    pub fn locate(&self, serial: Option<&str>, product_name: Option<&str>) -> Result<Resolution> {
        let candidates = self.enumerate(product_name)?;
        Ok(device::resolve(serial, candidates))
    }
}
