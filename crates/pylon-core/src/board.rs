//! Board catalog
//!
//! Memory layouts of the supported Pylon boards. The builtin table is
//! described in RON and compiled into the binary. A catalog is immutable
//! once built; [`BoardCatalog::from_ron`] builds one from another
//! description instead, e.g. a user supplied board file.

use std::ops::Range;

use crate::error::{Error, Result};

/// Builtin board table
const BUILTIN_BOARDS: &str = include_str!("../boards/pylon.ron");

/// Board used when none is specified
pub const DEFAULT_BOARD: &str = "nrf52840pdk";

/// nRF52 UICR PSELRESET[0] and PSELRESET[1]
///
/// Both must hold the reset pin number for the reset button to work.
pub const PSELRESET_REGISTERS: [u32; 2] = [0x1000_1200, 0x1000_1204];

/// Memory layout of one board
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardProfile {
    /// Board identifier (e.g., "nrf52840pdk")
    pub name: String,
    /// Value written to the PSELRESET registers (GPIO number of the reset pin)
    pub pselreset: u32,
    /// RAM address range
    pub ram: Range<u32>,
    /// Application flash address range
    pub flash: Range<u32>,
    /// Largest application image the slot accepts, in bytes
    pub app_max_size: u32,
}

impl BoardProfile {
    /// RAM capacity in bytes
    pub fn ram_size(&self) -> u32 {
        self.ram.end - self.ram.start
    }

    /// Application flash capacity in bytes
    pub fn flash_size(&self) -> u32 {
        self.flash.end - self.flash.start
    }

    fn validate(&self) -> std::result::Result<(), String> {
        if self.ram.end <= self.ram.start {
            return Err(format!(
                "{}: RAM end {:#010x} is not above start {:#010x}",
                self.name, self.ram.end, self.ram.start
            ));
        }
        if self.flash.end <= self.flash.start {
            return Err(format!(
                "{}: FLASH end {:#010x} is not above start {:#010x}",
                self.name, self.flash.end, self.flash.start
            ));
        }
        if self.app_max_size > self.flash_size() {
            return Err(format!(
                "{}: app slot of {} bytes exceeds the {} bytes of flash",
                self.name,
                self.app_max_size,
                self.flash_size()
            ));
        }
        Ok(())
    }
}

// ============================================================================
// RON deserialization types (intermediate format)
// ============================================================================

/// Size specification with human-readable units
#[derive(Debug, Clone, Copy, serde::Deserialize)]
pub enum Size {
    /// Size in bytes
    B(u32),
    /// Size in kibibytes (1024 bytes)
    KiB(u32),
    /// Size in mebibytes (1024 * 1024 bytes)
    MiB(u32),
}

impl Size {
    /// Convert to bytes, `None` if that does not fit in 32 bits
    pub fn to_bytes(self) -> Option<u32> {
        match self {
            Size::B(n) => Some(n),
            Size::KiB(n) => n.checked_mul(1024),
            Size::MiB(n) => n.checked_mul(1024 * 1024),
        }
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
struct RangeDef {
    start: u32,
    end: u32,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct BoardDef {
    name: String,
    pselreset: u32,
    ram: RangeDef,
    flash: RangeDef,
    app_max_size: Size,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct CatalogDef {
    boards: Vec<BoardDef>,
}

impl TryFrom<BoardDef> for BoardProfile {
    type Error = Error;

    fn try_from(def: BoardDef) -> Result<Self> {
        let app_max_size = def.app_max_size.to_bytes().ok_or_else(|| {
            Error::Catalog(format!(
                "{}: app slot size {:?} exceeds the 32-bit address space",
                def.name, def.app_max_size
            ))
        })?;
        Ok(Self {
            name: def.name,
            pselreset: def.pselreset,
            ram: def.ram.start..def.ram.end,
            flash: def.flash.start..def.flash.end,
            app_max_size,
        })
    }
}

// ============================================================================
// Board catalog
// ============================================================================

/// Immutable set of board profiles
#[derive(Debug, Clone)]
pub struct BoardCatalog {
    boards: Vec<BoardProfile>,
}

impl BoardCatalog {
    /// The compiled-in board table
    pub fn builtin() -> Result<Self> {
        Self::from_ron(BUILTIN_BOARDS)
    }

    /// Build a catalog from a RON description
    ///
    /// Every board is checked against the layout invariants and duplicate
    /// names are rejected.
    pub fn from_ron(content: &str) -> Result<Self> {
        let def: CatalogDef =
            ron::from_str(content).map_err(|e| Error::Catalog(e.to_string()))?;

        let mut boards: Vec<BoardProfile> = Vec::with_capacity(def.boards.len());
        for board in def.boards {
            let board = BoardProfile::try_from(board)?;
            board.validate().map_err(Error::Catalog)?;
            if boards.iter().any(|b| b.name == board.name) {
                return Err(Error::Catalog(format!("duplicate board '{}'", board.name)));
            }
            boards.push(board);
        }

        log::debug!("Board catalog holds {} boards", boards.len());
        Ok(Self { boards })
    }

    /// Look up a board by identifier
    pub fn lookup(&self, board: &str) -> Result<&BoardProfile> {
        self.boards
            .iter()
            .find(|b| b.name == board)
            .ok_or_else(|| Error::UnknownBoard {
                board: board.to_string(),
                known: self.names().map(String::from).collect(),
            })
    }

    /// Board identifiers, in catalog order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.boards.iter().map(|b| b.name.as_str())
    }

    /// Iterate over all boards
    pub fn iter(&self) -> impl Iterator<Item = &BoardProfile> {
        self.boards.iter()
    }

    /// Number of boards
    pub fn len(&self) -> usize {
        self.boards.len()
    }

    /// Check if the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.boards.is_empty()
    }
}
