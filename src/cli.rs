//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

const PROGRAMMER_HELP: &str = "Programmer to use, e.g. stk500v2:dev=/dev/ttyUSB0 \
     or arduino:dev=/dev/ttyACM0,baud=57600 (see list-programmers)";

#[derive(Parser)]
#[command(name = "avrflasher")]
#[command(author, version, about = "AVR bootloader flash programmer (STK500 / STK500v2)", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Target profile (TOML) overriding the built-in ATmega defaults
    #[arg(long, global = true)]
    pub target: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Reset the target, sync, and enter and leave programming mode
    Probe {
        #[arg(short, long, help = PROGRAMMER_HELP)]
        programmer: String,
    },

    /// Write an image to flash
    Write {
        #[arg(short, long, help = PROGRAMMER_HELP)]
        programmer: String,

        /// Input image (Intel HEX if it ends in .hex, raw binary otherwise)
        #[arg(short, long)]
        input: PathBuf,

        /// Verify after writing
        #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
        verify: bool,
    },

    /// Verify flash contents against an image
    Verify {
        #[arg(short, long, help = PROGRAMMER_HELP)]
        programmer: String,

        /// Image to compare against
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Show how an image would be split into blocks
    Image {
        /// Image file
        #[arg(short, long)]
        input: PathBuf,
    },

    /// List supported programmers
    ListProgrammers,
}
