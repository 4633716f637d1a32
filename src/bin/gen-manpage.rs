//! Man page generator for pylon
//!
//! Usage: cargo run --bin gen-manpage -- [output-dir]
//!
//! Writes `pylon.1` and one `pylon-<command>.1` per subcommand.

use clap::CommandFactory;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

#[path = "../cli.rs"]
mod cli;

/// Render `cmd` and each of its subcommands as (file name, roff page)
fn render_pages(cmd: clap::Command) -> io::Result<Vec<(String, Vec<u8>)>> {
    let name = cmd.get_name().to_string();
    let mut pages = Vec::new();

    for sub in cmd.get_subcommands().filter(|s| s.get_name() != "help") {
        let page_name = format!("{}-{}", name, sub.get_name());
        let sub = sub.clone().name(page_name.clone());
        let mut buffer = Vec::new();
        clap_mangen::Man::new(sub).render(&mut buffer)?;
        pages.push((format!("{}.1", page_name), buffer));
    }

    let mut buffer = Vec::new();
    clap_mangen::Man::new(cmd).render(&mut buffer)?;
    pages.insert(0, (format!("{}.1", name), buffer));
    Ok(pages)
}

fn write_pages(output_dir: &Path) -> io::Result<usize> {
    fs::create_dir_all(output_dir)?;
    let pages = render_pages(cli::Cli::command())?;
    for (file, page) in &pages {
        fs::write(output_dir.join(file), page)?;
    }
    Ok(pages.len())
}

fn main() -> io::Result<()> {
    let output_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("man"));

    let count = write_pages(&output_dir)?;
    println!("{} man pages written to {}", count, output_dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_command_has_a_page() {
        let pages = render_pages(cli::Cli::command()).unwrap();
        let names: Vec<&str> = pages.iter().map(|(name, _)| name.as_str()).collect();

        assert_eq!(names[0], "pylon.1");
        for expected in [
            "pylon-provision.1",
            "pylon-install.1",
            "pylon-debug.1",
            "pylon-mem-usage.1",
        ] {
            assert!(names.contains(&expected), "{} missing from {:?}", expected, names);
        }
        assert!(!names.contains(&"pylon-help.1"));

        for (name, page) in &pages {
            let page = String::from_utf8_lossy(page);
            assert!(page.contains(".TH"), "{} is not a man page", name);
        }
    }

    #[test]
    fn test_write_pages() {
        let dir = tempfile::tempdir().unwrap();
        let count = write_pages(dir.path()).unwrap();
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), count);
        assert!(dir.path().join("pylon-serial.1").is_file());
    }
}
