//! Verify command implementation

use crate::image::Image;
use crate::programmers::Programmer;

use super::IndicatifProgress;

/// Run the verify command
pub fn run_verify(
    programmer: &mut Programmer,
    image: &Image,
) -> Result<(), Box<dyn std::error::Error>> {
    println!(
        "Verifying {} bytes ({} blocks) using {:?}",
        image.used, image.block_count, programmer.variant()
    );

    let mut progress = IndicatifProgress::new();
    programmer.verify(&image.data, image.block_count, &mut progress)?;

    println!("Verification passed!");
    Ok(())
}
