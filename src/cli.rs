//! CLI argument parsing

use clap::{Parser, Subcommand};
use pylon_core::board::DEFAULT_BOARD;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pylon")]
#[command(author, version, about = "Pylon board flasher and debugger", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Board catalog file (RON) to use instead of the built-in boards
    #[arg(long, global = true, env = "PYLON_BOARD_DB")]
    pub board_db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Board and probe selection shared by commands that talk to hardware
#[derive(clap::Args, Debug, Clone)]
pub struct TargetArgs {
    /// Board type
    #[arg(short, long, env = "PYLON_BOARD", default_value = DEFAULT_BOARD)]
    pub board: String,

    /// J-Link serial number (needed when several probes are attached)
    #[arg(long, env = "PYLON_SN")]
    pub sn: Option<String>,

    /// Target device name passed to the J-Link tools
    #[arg(long, env = "PYLON_JLINK_DEVICE", default_value = "nRF52")]
    pub jlink_device: String,

    /// Interface speed in kHz
    #[arg(long, env = "PYLON_JLINK_SPEED", default_value_t = 4000)]
    pub speed: u32,
}

/// Where an app comes from: an explicit file or a build in a project
#[derive(clap::Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct ImageSource {
    /// Signed image file
    #[arg(long)]
    pub image: Option<PathBuf>,

    /// App name, looked up under <project>/bin/targets
    #[arg(long)]
    pub app: Option<String>,
}

/// Where the ELF for debugging comes from
#[derive(clap::Args, Debug, Clone)]
#[group(required = false, multiple = false)]
pub struct ElfSource {
    /// ELF file with debug symbols
    #[arg(long)]
    pub elf: Option<PathBuf>,

    /// App name, looked up under <project>/bin/targets
    #[arg(long)]
    pub app: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List known boards and their memory layout
    ListBoards,

    /// List attached J-Link probes
    ListProbes {
        /// Only probes whose product name contains this
        #[arg(long)]
        product: Option<String>,
    },

    /// Check that the J-Link and GNU Arm tools are installed
    CheckTools,

    /// Erase a blank board and flash its bootloader
    Provision {
        #[command(flatten)]
        target: TargetArgs,

        /// Bootloader image
        #[arg(long)]
        image: PathBuf,
    },

    /// Flash an app image into the app slot
    Install {
        #[command(flatten)]
        target: TargetArgs,

        #[command(flatten)]
        source: ImageSource,

        /// Project root for --app
        #[arg(long, default_value = ".")]
        project: PathBuf,
    },

    /// Open the RTT console of a board
    Serial {
        #[command(flatten)]
        target: TargetArgs,

        /// Reset the board once the console is attached
        #[arg(long)]
        reset_board: bool,

        /// Seconds to wait for the GDB server to start
        #[arg(long, value_name = "SECS", default_value_t = 10)]
        ready_timeout: u64,
    },

    /// Attach GDB to a board
    Debug {
        #[command(flatten)]
        target: TargetArgs,

        /// Port of an already running GDB server
        #[arg(long)]
        port: Option<u16>,

        #[command(flatten)]
        source: ElfSource,

        /// Project root for --app
        #[arg(long, default_value = ".")]
        project: PathBuf,

        /// Seconds to wait for the GDB server to start
        #[arg(long, value_name = "SECS", default_value_t = 10)]
        ready_timeout: u64,
    },

    /// Show RAM, flash and app slot usage of a build
    MemUsage {
        /// Board type
        #[arg(short, long, env = "PYLON_BOARD", default_value = DEFAULT_BOARD)]
        board: String,

        /// Linked ELF
        #[arg(long, conflicts_with = "app")]
        elf: Option<PathBuf>,

        /// Signed image
        #[arg(long, conflicts_with = "app")]
        img: Option<PathBuf>,

        /// App name, looked up under <project>/bin/targets
        #[arg(long)]
        app: Option<String>,

        /// Project root for --app
        #[arg(long, default_value = ".")]
        project: PathBuf,

        /// ELF of an earlier build to compare against
        #[arg(long)]
        baseline_elf: Option<PathBuf>,

        /// Image of an earlier build to compare against
        #[arg(long)]
        baseline_img: Option<PathBuf>,
    },
}
