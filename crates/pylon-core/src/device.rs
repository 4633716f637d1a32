//! Probe selection
//!
//! `JLinkExe`'s `ShowEmuList` command prints one line per attached probe:
//!
//! ```text
//! J-Link[0]: Connection: USB, Serial number: 683512372, ProductName: J-Link OB-SAM3U128-V2-NordicSemi
//! J-Link[1]: Connection: USB, Serial number: 682431178, ProductName: J-Link OB-SAM3U128-V2-NordicSemi
//! ```
//!
//! [`parse_emu_list`] turns that output into [`DeviceHandle`]s and
//! [`resolve`] picks one. Neither does any I/O: prompting the user when the
//! choice is ambiguous is up to the caller.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{Error, Result};

static PROBE_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"J-Link\[[0-9]+\]:").unwrap());
static SERIAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"Serial number: ([0-9]+)").unwrap());
static PRODUCT: Lazy<Regex> = Lazy::new(|| Regex::new(r"ProductName: ([^,]+)").unwrap());

/// An attached debug probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    /// Probe serial number
    pub serial: String,
    /// Product name reported by the probe, if any
    pub product: Option<String>,
}

impl DeviceHandle {
    /// Handle for a probe known only by its serial number
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            product: None,
        }
    }
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.product {
            Some(product) => write!(f, "{} ({})", self.serial, product),
            None => write!(f, "{}", self.serial),
        }
    }
}

/// Extract probes from `ShowEmuList` output
///
/// With `product_name`, only lines containing `ProductName: <product_name>`
/// are kept. Output order is preserved.
pub fn parse_emu_list(output: &str, product_name: Option<&str>) -> Vec<DeviceHandle> {
    let product_filter = product_name.map(|name| format!("ProductName: {}", name));

    output
        .lines()
        .filter(|line| PROBE_LINE.is_match(line))
        .filter(|line| match &product_filter {
            Some(filter) => line.contains(filter.as_str()),
            None => true,
        })
        .filter_map(|line| {
            let serial = SERIAL.captures(line)?.get(1)?.as_str().to_string();
            let product = PRODUCT
                .captures(line)
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().trim().to_string());
            Some(DeviceHandle { serial, product })
        })
        .collect()
}

/// Outcome of picking a probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Exactly one probe selected
    Resolved(DeviceHandle),
    /// Several probes and no serial number; candidates in enumeration order
    Ambiguous(Vec<DeviceHandle>),
    /// No probe attached
    NotFound,
    /// The requested serial number is not attached
    Invalid {
        /// Requested serial number
        serial: String,
        /// Probes that are attached
        candidates: Vec<DeviceHandle>,
    },
}

impl Resolution {
    /// Turn anything but [`Resolution::Resolved`] into an error
    pub fn into_result(self) -> Result<DeviceHandle> {
        match self {
            Resolution::Resolved(device) => Ok(device),
            Resolution::Ambiguous(candidates) => Err(Error::AmbiguousSelection(candidates)),
            Resolution::NotFound => Err(Error::NotFound),
            Resolution::Invalid { serial, candidates } => Err(Error::InvalidSerialNumber {
                serial,
                available: candidates.into_iter().map(|d| d.serial).collect(),
            }),
        }
    }
}

/// Pick the probe to use among `candidates`
pub fn resolve(serial: Option<&str>, mut candidates: Vec<DeviceHandle>) -> Resolution {
    match serial {
        Some(serial) => match candidates.iter().position(|d| d.serial == serial) {
            Some(index) => Resolution::Resolved(candidates.swap_remove(index)),
            None => Resolution::Invalid {
                serial: serial.to_string(),
                candidates,
            },
        },
        None => match candidates.len() {
            0 => Resolution::NotFound,
            1 => Resolution::Resolved(candidates.swap_remove(0)),
            _ => Resolution::Ambiguous(candidates),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMU_LIST: &str = concat!(
        "SEGGER J-Link Commander V7.94e (Compiled Jan 15 2024 15:19:02)\n",
        "DLL version V7.94e, compiled Jan 15 2024 15:18:36\n",
        "\n",
        "Type \"connect\" to establish a target connection, '?' for help\n",
        "J-Link>J-Link[0]: Connection: USB, Serial number: 683512372, ",
        "ProductName: J-Link OB-SAM3U128-V2-NordicSemi\n",
        "J-Link[1]: Connection: USB, Serial number: 260101191, ProductName: J-Link EDU Mini\n",
        "J-Link>",
    );

    fn handles(serials: &[&str]) -> Vec<DeviceHandle> {
        serials.iter().map(|s| DeviceHandle::new(*s)).collect()
    }

    #[test]
    fn test_parse_emu_list() {
        let devices = parse_emu_list(EMU_LIST, None);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].serial, "683512372");
        assert_eq!(
            devices[0].product.as_deref(),
            Some("J-Link OB-SAM3U128-V2-NordicSemi")
        );
        assert_eq!(devices[1].serial, "260101191");
        assert_eq!(devices[1].product.as_deref(), Some("J-Link EDU Mini"));
    }

    #[test]
    fn test_parse_emu_list_product_filter() {
        let devices = parse_emu_list(EMU_LIST, Some("J-Link EDU"));
        assert_eq!(
            devices,
            vec![DeviceHandle {
                serial: "260101191".into(),
                product: Some("J-Link EDU Mini".into()),
            }]
        );

        assert!(parse_emu_list(EMU_LIST, Some("ST-Link")).is_empty());
    }

    #[test]
    fn test_parse_emu_list_no_probes() {
        assert!(parse_emu_list("J-Link>No J-Links connected\n", None).is_empty());
    }

    #[test]
    fn test_resolve_none_attached() {
        assert_eq!(resolve(None, vec![]), Resolution::NotFound);
        assert!(matches!(resolve(None, vec![]).into_result(), Err(Error::NotFound)));
    }

    #[test]
    fn test_resolve_single() {
        assert_eq!(
            resolve(None, handles(&["A"])),
            Resolution::Resolved(DeviceHandle::new("A"))
        );
    }

    #[test]
    fn test_resolve_ambiguous_keeps_order() {
        assert_eq!(
            resolve(None, handles(&["A", "B"])),
            Resolution::Ambiguous(handles(&["A", "B"]))
        );
    }

    #[test]
    fn test_resolve_by_serial() {
        assert_eq!(
            resolve(Some("B"), handles(&["A", "B"])),
            Resolution::Resolved(DeviceHandle::new("B"))
        );
    }

    #[test]
    fn test_resolve_invalid_serial() {
        let resolution = resolve(Some("Z"), handles(&["A", "B"]));
        match resolution.into_result() {
            Err(Error::InvalidSerialNumber { serial, available }) => {
                assert_eq!(serial, "Z");
                assert_eq!(available, vec!["A".to_string(), "B".to_string()]);
            }
            other => panic!("expected InvalidSerialNumber, got {:?}", other),
        }
    }
}
