//! Utility module with helper functions
//!
//! This module provides:
//! - Configuration handling
//! - Checkpoint save/load utilities
//! - Progress bars

mod checkpoint;
mod config;

use indicatif::{ProgressBar, ProgressStyle};

pub use checkpoint::{
    find_latest_checkpoint, list_checkpoints, load_checkpoint, load_checkpoint_meta,
    resolve_checkpoint, resume_checkpoint, save_checkpoint, AdversarialModel, CheckpointMeta, ModelKind, ModelSpec, CRITIC_FILE,
    GENERATOR_FILE,
};
pub use config::{
    ensure_config_exists, Config, DataConfig, ModelConfig, TrainingConfigFile,
};

const PROGRESS_TEMPLATE: &str = "[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}";

/// Progress bar with the crate-wide style
pub fn progress_bar(len: u64) -> ProgressBar {
    let style = ProgressStyle::default_bar()
        .template(PROGRESS_TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("##-");
    let pb = ProgressBar::new(len);
    pb.set_style(style);
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_bar_length() {
        let pb = progress_bar(10);
        pb.inc(3);
        assert_eq!(pb.length(), Some(10));
        assert_eq!(pb.position(), 3);
        pb.finish_and_clear();
    }
}
