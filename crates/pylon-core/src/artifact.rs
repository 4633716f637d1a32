//! Build output locations
//!
//! The Mynewt build leaves an app's artifacts at
//! `<project>/bin/targets/<app>_<board>/app/apps/<app>/<app>.{elf,img}`.

use std::path::{Path, PathBuf};

/// ELF and signed image of one app build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppArtifacts {
    /// Linked ELF, used for section sizes and debugging
    pub elf: PathBuf,
    /// Signed image, the file that gets flashed
    pub image: PathBuf,
}

impl AppArtifacts {
    /// Artifact paths of `app` built for `board` inside `project`
    pub fn locate(project: &Path, app: &str, board: &str) -> Self {
        let dir = project
            .join("bin")
            .join("targets")
            .join(format!("{}_{}", app, board))
            .join("app")
            .join("apps")
            .join(app);

        Self {
            elf: dir.join(format!("{}.elf", app)),
            image: dir.join(format!("{}.img", app)),
        }
    }

    /// Whether both files are present
    pub fn exist(&self) -> bool {
        self.elf.exists() && self.image.exists()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locate() {
        let project = Path::new("platform/mynewt/apps/gg-tool");
        let artifacts = AppArtifacts::locate(project, "gg-tool", "nrf52840pdk");
        assert_eq!(
            artifacts.elf,
            project.join("bin/targets/gg-tool_nrf52840pdk/app/apps/gg-tool/gg-tool.elf")
        );
        assert_eq!(artifacts.image.extension().unwrap(), "img");
        assert!(!artifacts.exist());
    }
}
