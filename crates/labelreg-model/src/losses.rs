//! Regression losses between a warped volume and its target.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ModelError;

/// Supported regression loss types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RegressionLossType {
    /// Mean absolute residual.
    L1Loss,
    /// Half the sum of squared residuals.
    #[default]
    L2Loss,
    /// Root of the mean squared residual.
    #[serde(rename = "RMSE")]
    Rmse,
    /// Mean absolute error.
    #[serde(rename = "MAE")]
    Mae,
    /// Huber loss with delta 1.
    Huber,
}

impl RegressionLossType {
    pub const ALL: [Self; 5] = [Self::L1Loss, Self::L2Loss, Self::Rmse, Self::Mae, Self::Huber];

    pub fn name(&self) -> &'static str {
        match self {
            Self::L1Loss => "L1Loss",
            Self::L2Loss => "L2Loss",
            Self::Rmse => "RMSE",
            Self::Mae => "MAE",
            Self::Huber => "Huber",
        }
    }
}

impl fmt::Display for RegressionLossType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RegressionLossType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ModelError::UnknownLossType(s.to_string()))
    }
}

/// Regression loss between `prediction` and `ground_truth`.
///
/// The reduction runs over every element of the batch. An optional weight map
/// of the same shape rescales residuals by `weight / sum(weight)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LossFunction {
    loss_type: RegressionLossType,
}

impl LossFunction {
    pub fn new(loss_type: RegressionLossType) -> Self {
        Self { loss_type }
    }

    pub fn loss_type(&self) -> RegressionLossType {
        self.loss_type
    }

    /// Compute the loss as a `[1]` tensor.
    pub fn forward<B: Backend, const D: usize>(
        &self,
        prediction: Tensor<B, D>,
        ground_truth: Tensor<B, D>,
        weight_map: Option<Tensor<B, D>>,
    ) -> Tensor<B, 1> {
        let residuals = prediction - ground_truth;

        match self.loss_type {
            RegressionLossType::L2Loss => {
                let residuals = match weight_map {
                    Some(weights) => {
                        let total = weights.clone().sum().unsqueeze::<D>();
                        residuals * weights / total
                    }
                    None => residuals,
                };
                residuals.powf_scalar(2.0).sum().div_scalar(2.0)
            }
            RegressionLossType::L1Loss | RegressionLossType::Mae => {
                weighted_mean(residuals.abs(), weight_map)
            }
            RegressionLossType::Rmse => weighted_mean(residuals.powf_scalar(2.0), weight_map).sqrt(),
            RegressionLossType::Huber => {
                let abs = residuals.abs();
                let quadratic = abs.clone().lower_elem(1.0).float();
                let linear = quadratic.clone().neg().add_scalar(1.0);
                let per_element = abs.clone().powf_scalar(2.0).mul_scalar(0.5) * quadratic
                    + abs.sub_scalar(0.5) * linear;
                weighted_mean(per_element, weight_map)
            }
        }
    }
}

fn weighted_mean<B: Backend, const D: usize>(
    values: Tensor<B, D>,
    weight_map: Option<Tensor<B, D>>,
) -> Tensor<B, 1> {
    match weight_map {
        Some(weights) => (values * weights.clone()).sum() / weights.sum(),
        None => values.mean(),
    }
}
