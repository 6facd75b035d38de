//! Training metrics for monitoring adversarial and decoder training
//!
//! Provides structures for tracking and logging training progress.

use std::collections::VecDeque;
use std::path::Path;

/// Losses recorded at every log interval
#[derive(Debug, Clone, Default)]
pub struct TrainingMetrics {
    /// Iteration (or epoch) of each record
    pub steps: Vec<usize>,
    /// Generator losses
    pub gen_losses: Vec<f64>,
    /// Discriminator / critic losses
    pub disc_losses: Vec<f64>,
    /// Gradient penalties (0 for the BCE GAN)
    pub grad_penalties: Vec<f64>,
    /// Mutual-information losses (0 outside InfoWGAN)
    pub mi_losses: Vec<f64>,
}

impl TrainingMetrics {
    /// Create new empty metrics
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one log point
    pub fn record(&mut self, step: usize, gen_loss: f64, disc_loss: f64, gp: f64, mi: f64) {
        self.steps.push(step);
        self.gen_losses.push(gen_loss);
        self.disc_losses.push(disc_loss);
        self.grad_penalties.push(gp);
        self.mi_losses.push(mi);
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.gen_losses.len()
    }

    /// Check if nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.gen_losses.is_empty()
    }

    /// Get latest generator loss
    pub fn latest_gen_loss(&self) -> Option<f64> {
        self.gen_losses.last().copied()
    }

    /// Get latest discriminator loss
    pub fn latest_disc_loss(&self) -> Option<f64> {
        self.disc_losses.last().copied()
    }

    /// Moving average of generator loss
    pub fn gen_loss_ma(&self, window: usize) -> f64 {
        moving_average(&self.gen_losses, window)
    }

    /// Moving average of discriminator loss
    pub fn disc_loss_ma(&self, window: usize) -> f64 {
        moving_average(&self.disc_losses, window)
    }

    /// Check if BCE training appears to have collapsed
    ///
    /// Flags a discriminator that wins easily while the generator loss explodes.
    pub fn check_mode_collapse(&self, window: usize) -> bool {
        if self.len() < window {
            return false;
        }

        let disc_ma = self.disc_loss_ma(window);
        let gen_ma = self.gen_loss_ma(window);

        disc_ma < 0.1 && gen_ma > 5.0
    }

    /// Save metrics to CSV file
    pub fn save_csv<P: AsRef<Path>>(&self, path: P) -> anyhow::Result<()> {
        let mut writer = csv::Writer::from_path(path)?;

        writer.write_record(["step", "gen_loss", "disc_loss", "grad_penalty", "mi_loss"])?;

        for i in 0..self.len() {
            writer.write_record([
                self.steps[i].to_string(),
                self.gen_losses[i].to_string(),
                self.disc_losses[i].to_string(),
                self.grad_penalties[i].to_string(),
                self.mi_losses[i].to_string(),
            ])?;
        }

        writer.flush()?;
        Ok(())
    }

    /// Load metrics from CSV file
    pub fn load_csv<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let mut reader = csv::Reader::from_path(path)?;
        let mut metrics = Self::new();

        for result in reader.records() {
            let record = result?;
            metrics.record(
                record[0].parse()?,
                record[1].parse()?,
                record[2].parse()?,
                record[3].parse()?,
                record[4].parse()?,
            );
        }

        Ok(metrics)
    }
}

/// Calculate moving average of last `window` values
fn moving_average(values: &[f64], window: usize) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    let n = window.min(values.len()).max(1);
    let sum: f64 = values.iter().rev().take(n).sum();
    sum / n as f64
}

/// Rolling statistics tracker
#[derive(Debug)]
pub struct RollingStats {
    window: VecDeque<f64>,
    max_size: usize,
    sum: f64,
    sum_sq: f64,
}

impl RollingStats {
    /// Create new rolling statistics tracker
    pub fn new(max_size: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(max_size),
            max_size: max_size.max(1),
            sum: 0.0,
            sum_sq: 0.0,
        }
    }

    /// Add a new value
    pub fn push(&mut self, value: f64) {
        if self.window.len() >= self.max_size {
            if let Some(old) = self.window.pop_front() {
                self.sum -= old;
                self.sum_sq -= old * old;
            }
        }

        self.window.push_back(value);
        self.sum += value;
        self.sum_sq += value * value;
    }

    /// Get mean of values in window
    pub fn mean(&self) -> f64 {
        if self.window.is_empty() {
            0.0
        } else {
            self.sum / self.window.len() as f64
        }
    }

    /// Get standard deviation of values in window
    pub fn std(&self) -> f64 {
        if self.window.len() < 2 {
            return 0.0;
        }
        let n = self.window.len() as f64;
        let mean = self.sum / n;
        ((self.sum_sq / n) - mean * mean).max(0.0).sqrt()
    }

    /// Get number of values in window
    pub fn len(&self) -> usize {
        self.window.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_training_metrics() {
        let mut metrics = TrainingMetrics::new();

        metrics.record(0, 1.5, 0.8, 0.2, 0.0);
        metrics.record(100, 1.3, 0.75, 0.1, 0.0);

        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics.latest_gen_loss(), Some(1.3));
        assert!((metrics.disc_loss_ma(5) - 0.775).abs() < 1e-12);
    }

    #[test]
    fn test_mode_collapse_detection() {
        let mut metrics = TrainingMetrics::new();
        for i in 0..4 {
            metrics.record(i, 8.0, 0.01, 0.0, 0.0);
        }
        assert!(!metrics.check_mode_collapse(5));
        metrics.record(4, 8.0, 0.01, 0.0, 0.0);
        assert!(metrics.check_mode_collapse(5));
    }

    #[test]
    fn test_csv_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.csv");

        let mut metrics = TrainingMetrics::new();
        metrics.record(0, -0.5, 1.25, 3.0, 0.7);
        metrics.record(1000, -0.25, 0.5, 1.0, 0.3);
        metrics.save_csv(&path).unwrap();

        let loaded = TrainingMetrics::load_csv(&path).unwrap();
        assert_eq!(loaded.steps, vec![0, 1000]);
        assert_eq!(loaded.grad_penalties, vec![3.0, 1.0]);
        assert_eq!(loaded.mi_losses, vec![0.7, 0.3]);
    }

    #[test]
    fn test_rolling_stats() {
        let mut stats = RollingStats::new(3);

        stats.push(1.0);
        stats.push(2.0);
        stats.push(3.0);

        assert_eq!(stats.mean(), 2.0);

        stats.push(4.0); // removes 1.0
        assert_eq!(stats.mean(), 3.0);
        assert_eq!(stats.len(), 3);
        assert!((stats.std() - (2.0f64 / 3.0).sqrt()).abs() < 1e-9);
    }
}
