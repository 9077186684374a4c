//! avrflasher - AVR bootloader flash programmer
//!
//! Programs AVR microcontrollers through their serial bootloader, speaking
//! either STK500v2 or the legacy STK500 protocol used by Arduino boards.
//!
//! # Architecture
//!
//! - `avrflasher-core` holds the protocol engine (codec, response matcher,
//!   session state machine, page transfer) and knows nothing about serial
//!   ports.
//! - `avrflasher-serial` provides the serial port transport with DTR/RTS
//!   reset.
//! - `avrflasher-dummy` simulates a bootloader in memory for testing.
//!
//! This binary parses the command line, loads the image and target profile,
//! opens the programmer and runs a flashing task. A failed task exits with
//! its stable error code.

mod cli;
mod commands;
mod config;
mod image;
mod programmers;

use clap::Parser;
use cli::{Cli, Commands};

use avrflasher_core::FlashError;

/// Process exit status for an error
fn exit_status(e: &(dyn std::error::Error + 'static)) -> i32 {
    match e.downcast_ref::<FlashError>() {
        Some(flash) if flash.code.code() > 0 => flash.code.code(),
        _ => 1,
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let profile = config::load_profile(cli.target.as_deref())?;

    match cli.command {
        Commands::Probe { programmer } => {
            let mut programmer = programmers::open_programmer(&programmer, profile)?;
            commands::run_probe(&mut programmer)
        }
        Commands::Write {
            programmer,
            input,
            verify,
        } => {
            let image = image::load_image(&input, profile.flash_size)?;
            let mut programmer = programmers::open_programmer(&programmer, profile)?;
            commands::run_write(&mut programmer, &image, verify)
        }
        Commands::Verify { programmer, input } => {
            let image = image::load_image(&input, profile.flash_size)?;
            let mut programmer = programmers::open_programmer(&programmer, profile)?;
            commands::run_verify(&mut programmer, &image)
        }
        Commands::Image { input } => {
            let image = image::load_image(&input, profile.flash_size)?;
            commands::run_image(&image, profile.flash_size)
        }
        Commands::ListProgrammers => {
            commands::list_programmers();
            Ok(())
        }
    }
}

fn main() {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(exit_status(e.as_ref()));
    }
}
