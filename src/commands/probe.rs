//! Probe command implementation

use crate::programmers::Programmer;

/// Check that the bootloader answers and accepts programming mode
pub fn run_probe(programmer: &mut Programmer) -> Result<(), Box<dyn std::error::Error>> {
    programmer.probe()?;
    println!("Found {:?} bootloader", programmer.variant());
    Ok(())
}
