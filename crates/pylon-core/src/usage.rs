//! Memory usage of firmware images
//!
//! [`ImageSizeAnalyzer`] combines a board's layout with the signed image
//! (`.img`) and the linked ELF to report how much of the app slot, RAM and
//! flash an app uses. Reports from two builds can be compared with
//! [`MemoryUsageReport::compare`] to flag size regressions.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use crate::board::BoardProfile;
use crate::error::{Error, Result};
use crate::size::{SectionSizeSource, SectionSizes};

/// Bytes at the end of the app slot reserved for the image trailer
///
/// Magic (16), three 128-byte status areas, copy-done and image-ok flags.
pub const BOOT_TRAILER_SIZE: u32 = 16 + 3 * 128 + 1 + 1;

/// Memory region of a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Region {
    /// Application image slot
    AppSlot,
    /// RAM
    Ram,
    /// Internal flash
    Flash,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Region::AppSlot => write!(f, "App slot"),
            Region::Ram => write!(f, "RAM"),
            Region::Flash => write!(f, "FLASH"),
        }
    }
}

/// Used and free bytes of one region
///
/// `free` is signed: an image that does not fit reports a negative value, so
/// `used + free == capacity` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionUsage {
    /// Bytes in use
    pub used: u64,
    /// Bytes available in the region
    pub capacity: u64,
}

impl RegionUsage {
    /// Usage of `used` bytes out of `capacity`
    pub fn new(used: u64, capacity: u64) -> Self {
        Self { used, capacity }
    }

    /// Bytes left, negative when the region overflows
    pub fn free(&self) -> i64 {
        self.capacity as i64 - self.used as i64
    }

    /// Whether `used` exceeds the capacity
    pub fn overflows(&self) -> bool {
        self.used > self.capacity
    }
}

/// Change in usage of one region between two reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageDelta {
    /// Region compared
    pub region: Region,
    /// `new.used - old.used`
    pub delta: i64,
}

impl UsageDelta {
    /// Whether the region grew
    pub fn is_regression(&self) -> bool {
        self.delta > 0
    }

    /// Whether the region shrank
    pub fn is_improvement(&self) -> bool {
        self.delta < 0
    }

    /// Human-readable summary; `None` when nothing changed
    pub fn message(&self) -> Option<String> {
        match self.delta {
            0 => None,
            d if d > 0 => Some(format!(
                "{} usage increased by {} bytes since last build",
                self.region, d
            )),
            d => Some(format!(
                "{} usage decreased by {} bytes since last build",
                self.region,
                d.unsigned_abs()
            )),
        }
    }
}

/// Per-region usage of one build
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryUsageReport {
    regions: BTreeMap<Region, RegionUsage>,
}

impl MemoryUsageReport {
    /// Empty report
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a region
    pub fn insert(&mut self, region: Region, usage: RegionUsage) {
        self.regions.insert(region, usage);
    }

    /// Usage of a region, if it was measured
    pub fn get(&self, region: Region) -> Option<&RegionUsage> {
        self.regions.get(&region)
    }

    /// Regions in report order (app slot, RAM, flash)
    pub fn iter(&self) -> impl Iterator<Item = (Region, &RegionUsage)> {
        self.regions.iter().map(|(r, u)| (*r, u))
    }

    /// Number of regions measured
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Check if no region was measured
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Deltas from `self` (older build) to `newer`
    ///
    /// Only regions present in both reports are compared.
    pub fn compare(&self, newer: &MemoryUsageReport) -> Vec<UsageDelta> {
        self.regions
            .iter()
            .filter_map(|(region, old)| {
                newer.get(*region).map(|new| UsageDelta {
                    region: *region,
                    delta: new.used as i64 - old.used as i64,
                })
            })
            .collect()
    }
}

/// App slot usage of a signed image
pub fn app_slot_usage(image: &Path, board: &BoardProfile) -> Result<RegionUsage> {
    let metadata = fs::metadata(image).map_err(|source| Error::Io {
        path: image.to_path_buf(),
        source,
    })?;
    let capacity = board.app_max_size.saturating_sub(BOOT_TRAILER_SIZE);
    Ok(RegionUsage::new(metadata.len(), capacity as u64))
}

/// Computes [`MemoryUsageReport`]s from build artifacts
pub struct ImageSizeAnalyzer<S> {
    sizes: S,
}

impl<S: SectionSizeSource> ImageSizeAnalyzer<S> {
    /// Analyzer reading ELF section tables from `sizes`
    pub fn new(sizes: S) -> Self {
        Self { sizes }
    }

    /// Usage report for whichever of `elf` and `image` exist
    ///
    /// The image gives the app slot region, the ELF gives RAM and flash.
    /// Paths that are `None` or do not exist are skipped; if nothing is left
    /// the result is [`Error::MissingArtifact`].
    pub fn analyze(
        &self,
        elf: Option<&Path>,
        image: Option<&Path>,
        board: &BoardProfile,
    ) -> Result<MemoryUsageReport> {
        let elf = elf.filter(|p| p.exists());
        let image = image.filter(|p| p.exists());

        if elf.is_none() && image.is_none() {
            return Err(Error::MissingArtifact(
                "neither an ELF nor an image file exists".into(),
            ));
        }

        let mut report = MemoryUsageReport::new();

        if let Some(image) = image {
            let usage = app_slot_usage(image, board)?;
            log::debug!("{}: {} bytes", image.display(), usage.used);
            report.insert(Region::AppSlot, usage);
        }

        if let Some(elf) = elf {
            let table = self.sizes.section_table(elf)?;
            let sections = SectionSizes::parse(&table)?;
            report.insert(
                Region::Ram,
                RegionUsage::new(sections.ram_usage(), board.ram_size() as u64),
            );
            report.insert(
                Region::Flash,
                RegionUsage::new(sections.flash_usage(), board.flash_size() as u64),
            );
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::BoardCatalog;
    use std::fs::File;

    const TABLE: &str = "app.elf  :
section                size         addr
.imghdr                  32        49152
.text                 90000        49184
.ARM.extab               24       139184
.ARM.exidx                8       139208
.vector_relocation      216    536870912
.data                  1000    536871128
.bss                  20000    536872128
.stack_dummy            432    536892128
Total                111712


";

    struct CannedSizes(&'static str);

    impl SectionSizeSource for CannedSizes {
        fn section_table(&self, _elf: &Path) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    fn board() -> BoardProfile {
        BoardCatalog::builtin()
            .unwrap()
            .lookup("nrf52840pdk")
            .unwrap()
            .clone()
    }

    fn file_of_size(dir: &tempfile::TempDir, name: &str, len: u64) -> std::path::PathBuf {
        let path = dir.path().join(name);
        File::create(&path).unwrap().set_len(len).unwrap();
        path
    }

    #[test]
    fn test_boot_trailer_size() {
        assert_eq!(BOOT_TRAILER_SIZE, 16 + 3 * 128 + 1 + 1);
    }

    #[test]
    fn test_app_slot_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let img = file_of_size(&dir, "app.img", 100_000);

        let report = ImageSizeAnalyzer::new(CannedSizes(""))
            .analyze(None, Some(&img), &board())
            .unwrap();

        let slot = report.get(Region::AppSlot).unwrap();
        assert_eq!(slot.used, 100_000);
        assert_eq!(slot.free(), 472 * 1024 - BOOT_TRAILER_SIZE as i64 - 100_000);
        assert_eq!(slot.free(), 382_926);
        assert!(report.get(Region::Ram).is_none());
    }

    #[test]
    fn test_elf_regions() {
        let dir = tempfile::tempdir().unwrap();
        let elf = file_of_size(&dir, "app.elf", 1);
        let board = board();

        let report = ImageSizeAnalyzer::new(CannedSizes(TABLE))
            .analyze(Some(&elf), None, &board)
            .unwrap();

        let ram = report.get(Region::Ram).unwrap();
        assert_eq!(ram.used, 216 + 1000 + 20000 + 432);
        assert_eq!(ram.capacity, 0x40000);

        let flash = report.get(Region::Flash).unwrap();
        assert_eq!(flash.used, 32 + 90000 + 24 + 8 + 1000);
        assert_eq!(flash.capacity, (0x82000 - 0xc000) as u64);
        assert!(report.get(Region::AppSlot).is_none());
    }

    #[test]
    fn test_used_plus_free_is_capacity() {
        let dir = tempfile::tempdir().unwrap();
        let elf = file_of_size(&dir, "app.elf", 1);
        let img = file_of_size(&dir, "app.img", 600 * 1024);

        let report = ImageSizeAnalyzer::new(CannedSizes(TABLE))
            .analyze(Some(&elf), Some(&img), &board())
            .unwrap();

        assert_eq!(report.len(), 3);
        for (region, usage) in report.iter() {
            assert_eq!(
                usage.used as i64 + usage.free(),
                usage.capacity as i64,
                "{}",
                region
            );
        }
        assert!(report.get(Region::AppSlot).unwrap().overflows());
    }

    #[test]
    fn test_missing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.elf");

        let analyzer = ImageSizeAnalyzer::new(CannedSizes(TABLE));
        assert!(matches!(
            analyzer.analyze(Some(&missing), None, &board()),
            Err(Error::MissingArtifact(_))
        ));
        assert!(matches!(
            analyzer.analyze(None, None, &board()),
            Err(Error::MissingArtifact(_))
        ));
    }

    #[test]
    fn test_identical_builds_have_zero_delta() {
        let dir = tempfile::tempdir().unwrap();
        let elf = file_of_size(&dir, "app.elf", 1);
        let img = file_of_size(&dir, "app.img", 4096);
        let analyzer = ImageSizeAnalyzer::new(CannedSizes(TABLE));
        let board = board();

        let before = analyzer.analyze(Some(&elf), Some(&img), &board).unwrap();
        let after = analyzer.analyze(Some(&elf), Some(&img), &board).unwrap();

        let deltas = before.compare(&after);
        assert_eq!(deltas.len(), 3);
        assert!(deltas.iter().all(|d| d.delta == 0 && d.message().is_none()));
    }

    #[test]
    fn test_delta_direction() {
        let mut old = MemoryUsageReport::new();
        old.insert(Region::Ram, RegionUsage::new(1000, 4096));
        old.insert(Region::Flash, RegionUsage::new(5000, 8192));
        old.insert(Region::AppSlot, RegionUsage::new(10, 100));

        let mut new = MemoryUsageReport::new();
        new.insert(Region::Ram, RegionUsage::new(1200, 4096));
        new.insert(Region::Flash, RegionUsage::new(4000, 8192));

        let deltas = old.compare(&new);
        assert_eq!(deltas.len(), 2);

        let ram = deltas.iter().find(|d| d.region == Region::Ram).unwrap();
        assert!(ram.is_regression());
        assert_eq!(
            ram.message().unwrap(),
            "RAM usage increased by 200 bytes since last build"
        );

        let flash = deltas.iter().find(|d| d.region == Region::Flash).unwrap();
        assert!(flash.is_improvement());
        assert_eq!(
            flash.message().unwrap(),
            "FLASH usage decreased by 1000 bytes since last build"
        );
    }
}
