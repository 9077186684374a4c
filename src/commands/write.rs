//! Write command implementation

use crate::image::Image;
use crate::programmers::Programmer;

use super::IndicatifProgress;

/// Run the write command, optionally verifying afterwards
///
/// The target leaves programming mode either way.
pub fn run_write(
    programmer: &mut Programmer,
    image: &Image,
    verify: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    println!(
        "Writing {} bytes ({} blocks) using {:?}",
        image.used, image.block_count, programmer.variant()
    );

    let mut progress = IndicatifProgress::new();
    programmer.write(&image.data, image.block_count, &mut progress)?;
    println!("Write complete");

    if verify {
        programmer.verify(&image.data, image.block_count, &mut progress)?;
        println!("Verification passed!");
    } else {
        programmer.finish()?;
    }

    Ok(())
}
