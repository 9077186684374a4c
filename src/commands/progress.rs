//! Progress reporting with indicatif progress bars

use avrflasher_core::{TransferKind, TransferProgress, BLOCK_SIZE};
use indicatif::{ProgressBar, ProgressStyle};

fn create_progress_bar(total: u64, phase: &str) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{bytes}}/{{total_bytes}} ({{bytes_per_sec}}, {{eta}}) {}",
                phase
            ))?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

fn phase(kind: TransferKind) -> &'static str {
    match kind {
        TransferKind::Write => "Writing",
        TransferKind::Verify => "Verifying",
    }
}

/// Progress reporter using indicatif progress bars
#[derive(Default)]
pub struct IndicatifProgress {
    current_bar: Option<ProgressBar>,
}

impl IndicatifProgress {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TransferProgress for IndicatifProgress {
    fn started(&mut self, kind: TransferKind, total_blocks: usize) {
        let total = (total_blocks * BLOCK_SIZE) as u64;
        let pb = create_progress_bar(total, phase(kind)).unwrap_or_else(|_| ProgressBar::new(total));
        self.current_bar = Some(pb);
    }

    fn block_done(&mut self, _kind: TransferKind, blocks_done: usize) {
        if let Some(pb) = &self.current_bar {
            pb.set_position((blocks_done * BLOCK_SIZE) as u64);
        }
    }

    fn finished(&mut self, kind: TransferKind) {
        if let Some(pb) = self.current_bar.take() {
            pb.finish_with_message(format!("{} complete", phase(kind)));
        }
    }
}

impl Drop for IndicatifProgress {
    fn drop(&mut self) {
        // A failed transfer leaves its bar unfinished
        if let Some(pb) = self.current_bar.take() {
            pb.abandon();
        }
    }
}
