//! CLI command implementations
//!
//! Commands that talk to a target take an opened [`Programmer`] and run
//! one of the core flashing tasks on it. Progress is rendered with
//! indicatif through [`IndicatifProgress`].
//!
//! [`Programmer`]: crate::programmers::Programmer

mod image;
mod list;
mod probe;
mod progress;
mod verify;
mod write;

pub use image::run_image;
pub use list::list_programmers;
pub use probe::run_probe;
pub use progress::IndicatifProgress;
pub use verify::run_verify;
pub use write::run_write;
