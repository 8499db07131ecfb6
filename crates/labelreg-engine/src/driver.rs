//! The training loop around an [`Application`].

use burn::tensor::backend::AutodiffBackend;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use crate::application::Application;
use crate::collector::{Collection, GradientsCollector, OutputsCollector};
use crate::config::ApplicationConfig;
use crate::error::Result;
use crate::progress::{ProgressCallback, ProgressTracker};

/// Checkpoint file for `iteration`, without the recorder's `.mpk` extension.
pub fn checkpoint_path(model_dir: &Path, iteration: usize) -> PathBuf {
    model_dir.join("models").join(format!("model-{}", iteration))
}

/// Outcome of [`ApplicationDriver::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSummary {
    /// Iterations run in this session.
    pub iterations_run: usize,
    /// Global iteration count when training stopped.
    pub final_iteration: usize,
    /// Console outputs of the last iteration.
    pub console: Vec<(String, f64)>,
    /// Last checkpoint written.
    pub checkpoint: Option<PathBuf>,
}

/// Runs an application through its lifecycle and the training iterations.
pub struct ApplicationDriver<T> {
    config: ApplicationConfig<T>,
    tracker: ProgressTracker,
}

impl<T: Clone> ApplicationDriver<T> {
    pub fn new(config: ApplicationConfig<T>) -> Self {
        Self {
            config,
            tracker: ProgressTracker::new(),
        }
    }

    pub fn config(&self) -> &ApplicationConfig<T> {
        &self.config
    }

    pub fn add_callback(&mut self, callback: Arc<dyn ProgressCallback>) {
        self.tracker.add_callback(callback);
    }

    /// Initialise `app`, optionally restore a checkpoint, and train until
    /// `max_iter` or until `interpret_output` asks to stop.
    ///
    /// Any error aborts the run and is reported to every callback.
    pub fn run<B, A>(&mut self, app: &mut A) -> Result<TrainingSummary>
    where
        B: AutodiffBackend,
        A: Application<B, TaskParam = T>,
    {
        self.tracker.start();
        match self.train::<B, A>(app) {
            Ok(summary) => {
                let loss = summary.console.first().map(|(_, v)| *v).unwrap_or(0.0);
                self.tracker.complete(
                    summary.final_iteration,
                    self.config.action.max_iter,
                    loss,
                    app.learning_rate().unwrap_or(self.config.action.lr),
                );
                Ok(summary)
            }
            Err(err) => {
                self.tracker.error(&err.to_string());
                Err(err)
            }
        }
    }

    fn train<B, A>(&self, app: &mut A) -> Result<TrainingSummary>
    where
        B: AutodiffBackend,
        A: Application<B, TaskParam = T>,
    {
        let action = &self.config.action;
        let model_dir = &self.config.system.model_dir;

        app.initialise_dataset_loader(self.config.data.clone(), self.config.task.clone())?;
        app.initialise_sampler()?;
        app.initialise_network()?;

        if action.starting_iter > 0 {
            let path = checkpoint_path(model_dir, action.starting_iter);
            app.restore_model(&path)?;
            info!(iteration = action.starting_iter, "Resuming training");
        }

        let mut summary = TrainingSummary {
            iterations_run: 0,
            final_iteration: action.starting_iter,
            console: Vec::new(),
            checkpoint: None,
        };

        while summary.final_iteration < action.max_iter {
            let mut outputs = OutputsCollector::<B>::new();
            let mut gradients = GradientsCollector::new();
            app.connect_data_and_network(&mut outputs, &mut gradients)?;
            app.set_network_gradient_op(&mut gradients)?;

            summary.iterations_run += 1;
            summary.final_iteration += 1;
            let iteration = summary.final_iteration;

            for (name, value) in outputs.scalars(Collection::TensorBoard) {
                debug!(iteration, name = %name, value, "Summary");
            }
            summary.console = outputs.scalars(Collection::Console);
            self.tracker.update(
                iteration,
                summary.iterations_run,
                action.max_iter,
                summary.console.clone(),
                app.learning_rate().unwrap_or(action.lr),
            );

            if action.save_every_n > 0 && iteration % action.save_every_n == 0 {
                summary.checkpoint = Some(save::<B, A>(app, model_dir, iteration)?);
            }

            if !app.interpret_output(&outputs)? {
                info!(iteration, "Application requested stop");
                break;
            }
        }

        let final_path = checkpoint_path(model_dir, summary.final_iteration);
        if summary.iterations_run > 0 && summary.checkpoint.as_ref() != Some(&final_path) {
            summary.checkpoint = Some(save::<B, A>(app, model_dir, summary.final_iteration)?);
        }
        Ok(summary)
    }
}

fn save<B, A>(app: &A, model_dir: &Path, iteration: usize) -> Result<PathBuf>
where
    B: AutodiffBackend,
    A: Application<B>,
{
    let path = checkpoint_path(model_dir, iteration);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    app.save_model(&path)?;
    Ok(path)
}
