//! Training progress reporting.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Snapshot of one training iteration.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Iterations completed, counted from zero across resumed runs.
    pub iteration: usize,
    pub max_iter: usize,
    /// Mean of the first console output, usually `label_loss`.
    pub loss: f64,
    pub elapsed: Duration,
    pub estimated_remaining: Option<Duration>,
    pub learning_rate: f64,
    /// Every console output of the iteration.
    pub console: Vec<(String, f64)>,
}

impl ProgressInfo {
    pub fn new(iteration: usize, max_iter: usize, loss: f64, elapsed: Duration, learning_rate: f64) -> Self {
        Self {
            iteration,
            max_iter,
            loss,
            elapsed,
            estimated_remaining: None,
            learning_rate,
            console: Vec::new(),
        }
    }

    pub fn with_console(mut self, console: Vec<(String, f64)>) -> Self {
        self.console = console;
        self
    }

    pub fn progress_percent(&self) -> f64 {
        if self.max_iter == 0 {
            100.0
        } else {
            self.iteration as f64 / self.max_iter as f64 * 100.0
        }
    }

    /// Extrapolate the remaining time from `done` iterations run in `elapsed`.
    pub fn estimate_remaining(&mut self, done: usize) {
        if done > 0 {
            let per_iter = self.elapsed.as_secs_f64() / done as f64;
            let left = self.max_iter.saturating_sub(self.iteration);
            self.estimated_remaining = Some(Duration::from_secs_f64(per_iter * left as f64));
        }
    }
}

/// Observer of a training run.
pub trait ProgressCallback: Send + Sync {
    fn on_progress(&self, info: &ProgressInfo);

    fn on_start(&self) {}

    fn on_complete(&self, _info: &ProgressInfo) {}

    fn on_error(&self, _error: &str) {}
}

/// Logs progress through `tracing` every `log_interval` iterations.
#[derive(Debug, Clone)]
pub struct ConsoleProgressCallback {
    pub log_interval: usize,
}

impl Default for ConsoleProgressCallback {
    fn default() -> Self {
        Self { log_interval: 10 }
    }
}

impl ConsoleProgressCallback {
    pub fn new(log_interval: usize) -> Self {
        Self {
            log_interval: log_interval.max(1),
        }
    }
}

impl ProgressCallback for ConsoleProgressCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        if info.iteration % self.log_interval != 0 && info.iteration != info.max_iter {
            return;
        }
        let eta = info
            .estimated_remaining
            .map(|d| format!("{:.1}s", d.as_secs_f64()))
            .unwrap_or_else(|| "N/A".to_string());
        let console = info
            .console
            .iter()
            .map(|(name, value)| format!("{}={:.6}", name, value))
            .collect::<Vec<_>>()
            .join(", ");

        tracing::info!(
            "iter {}/{} ({:.1}%) | {} | lr {:.2e} | elapsed {:.1}s | eta {}",
            info.iteration,
            info.max_iter,
            info.progress_percent(),
            console,
            info.learning_rate,
            info.elapsed.as_secs_f64(),
            eta
        );
    }

    fn on_start(&self) {
        tracing::info!("Training started");
    }

    fn on_complete(&self, info: &ProgressInfo) {
        tracing::info!(
            "Training stopped at iteration {} after {:.2}s, loss {:.6}",
            info.iteration,
            info.elapsed.as_secs_f64(),
            info.loss
        );
    }

    fn on_error(&self, error: &str) {
        tracing::error!("Training failed: {}", error);
    }
}

/// Records every progress snapshot.
#[derive(Debug, Clone, Default)]
pub struct HistoryCallback {
    history: Arc<Mutex<Vec<ProgressInfo>>>,
    errors: Arc<Mutex<Vec<String>>>,
}

impl HistoryCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn history(&self) -> Vec<ProgressInfo> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ProgressCallback for HistoryCallback {
    fn on_progress(&self, info: &ProgressInfo) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(info.clone());
    }

    fn on_error(&self, error: &str) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(error.to_string());
    }
}

/// Fans progress events out to registered callbacks.
#[derive(Clone, Default)]
pub struct ProgressTracker {
    callbacks: Vec<Arc<dyn ProgressCallback>>,
    start: Option<Instant>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_callback(&mut self, callback: Arc<dyn ProgressCallback>) {
        self.callbacks.push(callback);
    }

    fn elapsed(&self) -> Duration {
        self.start.map(|t| t.elapsed()).unwrap_or(Duration::ZERO)
    }

    pub fn start(&mut self) {
        self.start = Some(Instant::now());
        for callback in &self.callbacks {
            callback.on_start();
        }
    }

    /// Report an iteration; `done` counts iterations run in this session.
    pub fn update(
        &self,
        iteration: usize,
        done: usize,
        max_iter: usize,
        console: Vec<(String, f64)>,
        learning_rate: f64,
    ) {
        let loss = console.first().map(|(_, v)| *v).unwrap_or(0.0);
        let mut info = ProgressInfo::new(iteration, max_iter, loss, self.elapsed(), learning_rate)
            .with_console(console);
        info.estimate_remaining(done);

        for callback in &self.callbacks {
            callback.on_progress(&info);
        }
    }

    pub fn complete(&self, iteration: usize, max_iter: usize, loss: f64, learning_rate: f64) {
        let info = ProgressInfo::new(iteration, max_iter, loss, self.elapsed(), learning_rate);
        for callback in &self.callbacks {
            callback.on_complete(&info);
        }
    }

    pub fn error(&self, error: &str) {
        for callback in &self.callbacks {
            callback.on_error(error);
        }
    }
}
