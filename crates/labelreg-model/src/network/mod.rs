//! Registration networks and their name-keyed factory.
//!
//! Every network maps a `(fixed, moving)` pair of `[B, 1, D, H, W]` volumes to
//! a [`FieldPrediction`] of voxel displacements ordered `(z, y, x)`.

pub mod affine;
pub mod blocks;
pub mod dense;

use burn::module::Module;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ModelError, Result};
use crate::field::FieldPrediction;
use crate::interpolation::Boundary;
use crate::resampler::{Interpolation, ResamplerLayer};

pub use affine::INetAffine;
pub use dense::INetDense;

/// Channel counts of the network levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationNetConfig {
    /// Output channels of each stride-2 level of the affine encoder.
    pub affine_features: Vec<usize>,
    /// Channels of each resolution level of the dense network, finest first.
    pub dense_features: Vec<usize>,
}

impl Default for RegistrationNetConfig {
    fn default() -> Self {
        Self {
            affine_features: vec![4, 8, 16, 32],
            dense_features: vec![8, 16, 32],
        }
    }
}

impl RegistrationNetConfig {
    fn validate(&self, kind: NetworkKind) -> Result<()> {
        if kind.has_affine() && self.affine_features.is_empty() {
            return Err(ModelError::InvalidConfiguration(
                "affine_features must not be empty".to_string(),
            ));
        }
        if kind.has_dense() && self.dense_features.is_empty() {
            return Err(ModelError::InvalidConfiguration(
                "dense_features must not be empty".to_string(),
            ));
        }
        if self
            .affine_features
            .iter()
            .chain(&self.dense_features)
            .any(|&f| f == 0)
        {
            return Err(ModelError::InvalidConfiguration(
                "feature counts must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Registered network architectures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkKind {
    Affine,
    Dense,
    HybridPreWarp,
    HybridTwoStream,
}

impl NetworkKind {
    pub const ALL: [Self; 4] = [
        Self::Affine,
        Self::Dense,
        Self::HybridPreWarp,
        Self::HybridTwoStream,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Affine => "inet_affine",
            Self::Dense => "inet_dense",
            Self::HybridPreWarp => "inet_hybrid_pre_warp",
            Self::HybridTwoStream => "inet_hybrid_two_stream",
        }
    }

    fn has_affine(&self) -> bool {
        !matches!(self, Self::Dense)
    }

    fn has_dense(&self) -> bool {
        !matches!(self, Self::Affine)
    }

    /// Build the network with freshly initialised weights.
    pub fn init<B: Backend>(
        self,
        decay: f32,
        config: &RegistrationNetConfig,
        device: &B::Device,
    ) -> Result<RegistrationNet<B>> {
        config.validate(self)?;
        if !decay.is_finite() || decay < 0.0 {
            return Err(ModelError::InvalidConfiguration(format!(
                "decay must be a non-negative number, got {}",
                decay
            )));
        }

        tracing::debug!(network = self.name(), decay, ?config, "Building registration network");

        Ok(RegistrationNet {
            affine: self
                .has_affine()
                .then(|| INetAffine::new(&config.affine_features, device)),
            dense: self
                .has_dense()
                .then(|| INetDense::new(&config.dense_features, device)),
            pre_warp: matches!(self, Self::HybridPreWarp),
            decay,
        })
    }
}

impl fmt::Display for NetworkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Name-keyed lookup of network architectures.
pub struct ApplicationNetFactory;

impl ApplicationNetFactory {
    /// Resolve `name`, ignoring case, `_` and `-`.
    pub fn create(name: &str) -> Result<NetworkKind> {
        let key = normalise_name(name);
        NetworkKind::ALL
            .into_iter()
            .find(|kind| normalise_name(kind.name()) == key)
            .ok_or_else(|| ModelError::UnknownNetwork {
                name: name.to_string(),
                available: NetworkKind::ALL
                    .iter()
                    .map(NetworkKind::name)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
    }
}

fn normalise_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// A registration network with an optional affine and an optional dense stream.
#[derive(Module, Debug)]
pub struct RegistrationNet<B: Backend> {
    affine: Option<INetAffine<B>>,
    dense: Option<INetDense<B>>,
    pre_warp: bool,
    decay: f32,
}

impl<B: Backend> RegistrationNet<B> {
    pub fn kind(&self) -> NetworkKind {
        match (self.affine.is_some(), self.dense.is_some(), self.pre_warp) {
            (true, true, true) => NetworkKind::HybridPreWarp,
            (true, true, false) => NetworkKind::HybridTwoStream,
            (false, true, _) => NetworkKind::Dense,
            _ => NetworkKind::Affine,
        }
    }

    /// Weight decay coefficient applied by the optimiser.
    pub fn decay(&self) -> f32 {
        self.decay
    }

    /// Window extents must be multiples of this value.
    pub fn spatial_divisor(&self) -> usize {
        self.dense.as_ref().map_or(1, INetDense::spatial_divisor)
    }

    pub fn forward(&self, fixed: Tensor<B, 5>, moving: Tensor<B, 5>) -> FieldPrediction<B> {
        match (&self.affine, &self.dense) {
            (Some(affine), None) => FieldPrediction::Single(affine.forward(fixed, moving)),
            (None, Some(dense)) => FieldPrediction::Single(dense.forward(fixed, moving)),
            (Some(affine), Some(dense)) => {
                let global = affine.forward(fixed.clone(), moving.clone());
                if self.pre_warp {
                    let warped = ResamplerLayer::new(Interpolation::Linear, Boundary::Replicate)
                        .forward(moving, global.clone());
                    let local = dense.forward(fixed, warped);
                    FieldPrediction::Single(global + local)
                } else {
                    let local = dense.forward(fixed, moving);
                    FieldPrediction::Composite {
                        affine: global,
                        local,
                    }
                }
            }
            // Not produced by `NetworkKind::init`; no stream means no motion.
            (None, None) => {
                let [b, _, d, h, w] = fixed.dims();
                FieldPrediction::Single(Tensor::zeros([b, 3, d, h, w], &fixed.device()))
            }
        }
    }
}
