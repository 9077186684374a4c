//! Image command implementation

use avrflasher_core::BLOCK_SIZE;

use crate::image::Image;

/// Print how an image maps onto blocks
pub fn run_image(image: &Image, flash_size: Option<u32>) -> Result<(), Box<dyn std::error::Error>> {
    println!("Image size:  {} bytes", image.used);
    println!(
        "Blocks:      {} x {} bytes ({} bytes padded)",
        image.block_count,
        BLOCK_SIZE,
        image.data.len()
    );
    if let Some(flash_size) = flash_size {
        println!(
            "Flash usage: {:.1}% of {} bytes",
            image.data.len() as f64 * 100.0 / flash_size as f64,
            flash_size
        );
    }
    image.check_fits(flash_size)?;
    Ok(())
}
