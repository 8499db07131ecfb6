//! Name-keyed optimiser lookup over burn's optimisers.

use burn::module::AutodiffModule;
use burn::optim::decay::WeightDecayConfig;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{
    AdaGradConfig, AdamConfig, GradientsParams, Optimizer as BurnOptimizer, RmsPropConfig, SgdConfig,
};
use burn::tensor::backend::AutodiffBackend;
use std::fmt;

use crate::error::{EngineError, Result};

/// Updates a module from its gradients.
///
/// # Type Parameters
/// * `M` - The module being trained
/// * `B` - The autodiff backend
pub trait Optimiser<M, B>
where
    M: AutodiffModule<B>,
    B: AutodiffBackend,
{
    /// Apply one update and return the updated module.
    fn step(&mut self, module: M, gradients: GradientsParams) -> M;

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, lr: f64);
}

/// Any burn optimiser with a fixed learning rate.
struct BurnOptimiser<O> {
    optimizer: O,
    learning_rate: f64,
}

impl<M, B, O> Optimiser<M, B> for BurnOptimiser<O>
where
    M: AutodiffModule<B>,
    B: AutodiffBackend,
    O: BurnOptimizer<M, B>,
{
    fn step(&mut self, module: M, gradients: GradientsParams) -> M {
        self.optimizer.step(self.learning_rate, module, gradients)
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, lr: f64) {
        self.learning_rate = lr;
    }
}

/// Registered optimisers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimiserKind {
    Adam,
    GradientDescent,
    Momentum,
    Nesterov,
    Adagrad,
    RmsProp,
}

const MOMENTUM: f64 = 0.9;
/// Decay of the RMSProp squared-gradient average.
const RMSPROP_DECAY: f32 = 0.9;

impl OptimiserKind {
    pub const ALL: [Self; 6] = [
        Self::Adam,
        Self::GradientDescent,
        Self::Momentum,
        Self::Nesterov,
        Self::Adagrad,
        Self::RmsProp,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Adam => "adam",
            Self::GradientDescent => "gradientdescent",
            Self::Momentum => "momentum",
            Self::Nesterov => "nesterov",
            Self::Adagrad => "adagrad",
            Self::RmsProp => "rmsprop",
        }
    }

    /// Build a fresh optimiser; `weight_decay` of 0 disables decay.
    pub fn get_instance<M, B>(&self, learning_rate: f64, weight_decay: f32) -> Box<dyn Optimiser<M, B>>
    where
        M: AutodiffModule<B> + 'static,
        B: AutodiffBackend,
    {
        let decay = (weight_decay > 0.0).then(|| WeightDecayConfig::new(weight_decay));
        let sgd = |momentum: Option<MomentumConfig>| {
            SgdConfig::new()
                .with_weight_decay(decay.clone())
                .with_momentum(momentum)
                .init::<B, M>()
        };

        match self {
            Self::Adam => boxed(
                AdamConfig::new().with_weight_decay(decay.clone()).init::<B, M>(),
                learning_rate,
            ),
            Self::GradientDescent => boxed(sgd(None), learning_rate),
            Self::Momentum => boxed(
                sgd(Some(MomentumConfig::new().with_momentum(MOMENTUM))),
                learning_rate,
            ),
            Self::Nesterov => boxed(
                sgd(Some(
                    MomentumConfig::new()
                        .with_momentum(MOMENTUM)
                        .with_dampening(0.0)
                        .with_nesterov(true),
                )),
                learning_rate,
            ),
            Self::Adagrad => boxed(
                AdaGradConfig::new().with_weight_decay(decay.clone()).init::<B, M>(),
                learning_rate,
            ),
            Self::RmsProp => boxed(
                RmsPropConfig::new()
                    .with_alpha(RMSPROP_DECAY)
                    .with_momentum(0.0)
                    .with_weight_decay(decay.clone())
                    .init::<B, M>(),
                learning_rate,
            ),
        }
    }
}

fn boxed<M, B, O>(optimizer: O, learning_rate: f64) -> Box<dyn Optimiser<M, B>>
where
    M: AutodiffModule<B>,
    B: AutodiffBackend,
    O: BurnOptimizer<M, B> + 'static,
{
    Box::new(BurnOptimiser {
        optimizer,
        learning_rate,
    })
}

impl fmt::Display for OptimiserKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Name-keyed lookup of optimisers.
pub struct OptimiserFactory;

impl OptimiserFactory {
    /// Resolve `name` case-insensitively; `sgd` aliases `gradientdescent`.
    pub fn create(name: &str) -> Result<OptimiserKind> {
        let key = name.to_ascii_lowercase();
        if key == "sgd" {
            return Ok(OptimiserKind::GradientDescent);
        }
        OptimiserKind::ALL
            .into_iter()
            .find(|kind| kind.name() == key)
            .ok_or_else(|| EngineError::UnknownOptimiser {
                name: name.to_string(),
                available: OptimiserKind::ALL
                    .iter()
                    .map(OptimiserKind::name)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}
