//! Section size tables
//!
//! Parses the System V style output of `arm-none-eabi-size -A`:
//!
//! ```text
//! gg-tool.elf  :
//! section                size         addr
//! .imghdr                  32        49152
//! .text                101420        49184
//! .ARM.exidx                8       150604
//! .data                  1260    536871176
//! .bss                  27720    536872436
//! Total                 130440
//!
//!
//! ```
//!
//! The first two lines and the last four (the total, two blank lines and the
//! empty remainder after the final newline) are not section rows.

use crate::error::{Error, Result};

/// Sections that occupy RAM
pub const RAM_SECTIONS: &[&str] = &[
    ".vector_relocation",
    ".data",
    ".bssnz",
    ".bss",
    ".stack_dummy",
];

/// Sections that occupy flash
///
/// `.data` is in both lists: its initial values live in flash and are copied
/// to RAM at startup.
pub const FLASH_SECTIONS: &[&str] = &[".imghdr", ".text", ".ARM.extab", ".ARM.exidx", ".data"];

const HEADER_LINES: usize = 2;
const FOOTER_LINES: usize = 4;

/// Source of section size tables for ELF files
///
/// Implemented by the `arm-none-eabi-size` driver in `pylon-flash`; tests
/// supply canned tables.
pub trait SectionSizeSource {
    /// Return the raw `size -A` output for `elf`
    fn section_table(&self, elf: &std::path::Path) -> Result<String>;
}

/// One row of a section size table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Section name (e.g., ".text")
    pub name: String,
    /// Size in bytes
    pub size: u64,
}

/// Parsed section size table
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionSizes {
    sections: Vec<Section>,
}

impl SectionSizes {
    /// Parse `size -A` output
    pub fn parse(output: &str) -> Result<Self> {
        let lines: Vec<&str> = output.split('\n').collect();
        if lines.len() <= HEADER_LINES + FOOTER_LINES {
            return Ok(Self::default());
        }

        let mut sections = Vec::new();
        for (row, line) in lines[HEADER_LINES..lines.len() - FOOTER_LINES]
            .iter()
            .enumerate()
        {
            let mut words = line.split_whitespace();
            let Some(name) = words.next() else {
                continue;
            };
            let size = words
                .next()
                .and_then(|w| w.parse::<u64>().ok())
                .ok_or_else(|| Error::SizeTable {
                    row,
                    text: line.to_string(),
                })?;
            sections.push(Section {
                name: name.to_string(),
                size,
            });
        }

        Ok(Self { sections })
    }

    /// All parsed sections, in table order
    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    /// Sum of the sizes of the named sections
    pub fn total_of(&self, names: &[&str]) -> u64 {
        self.sections
            .iter()
            .filter(|s| names.contains(&s.name.as_str()))
            .map(|s| s.size)
            .sum()
    }

    /// Bytes of RAM used
    pub fn ram_usage(&self) -> u64 {
        self.total_of(RAM_SECTIONS)
    }

    /// Bytes of flash used
    pub fn flash_usage(&self) -> u64 {
        self.total_of(FLASH_SECTIONS)
    }
}
