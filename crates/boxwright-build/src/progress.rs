use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub struct BuildProgress {
    progress_bar: ProgressBar,
}

impl BuildProgress {
    pub fn new(image_name: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(format!("Building {}...", image_name));
        pb.enable_steady_tick(Duration::from_millis(120));

        Self { progress_bar: pb }
    }

    /// 端末に描画しない（テストや --verbose 時）
    pub fn hidden() -> Self {
        Self {
            progress_bar: ProgressBar::hidden(),
        }
    }

    pub fn set_message(&self, msg: &str) {
        self.progress_bar.set_message(msg.to_string());
    }

    pub fn step(&self, index: usize, total: usize, description: &str) {
        self.progress_bar
            .set_message(format!("Step {}/{}: {}", index + 1, total, description));
    }

    pub fn finish_success(&self, image: &str) {
        self.progress_bar
            .finish_with_message(format!("Build completed ✓ {}", image));
    }

    pub fn finish_error(&self, error: &str) {
        self.progress_bar
            .finish_with_message(format!("Build failed: {}", error));
    }
}
