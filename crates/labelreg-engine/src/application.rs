//! Training applications and the label-driven registration adapter.

use burn::module::Module;
use burn::optim::GradientsParams;
use burn::record::CompactRecorder;
use burn::tensor::backend::AutodiffBackend;
use burn::tensor::Tensor;
use labelreg_model::{
    ApplicationNetFactory, Boundary, Interpolation, LossFunction, RegistrationNet,
    RegressionLossType, ResamplerLayer,
};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use crate::collector::{Collection, GradientsCollector, OutputsCollector};
use crate::config::{ActionParams, DataParams, NetParams, RegistrationParams, TaskSections};
use crate::error::{EngineError, Result};
use crate::optimiser::{Optimiser, OptimiserFactory};
use crate::reader::ImageReader;
use crate::sampler::{PairwiseSampler, FIXED_FIELDS, MOVING_FIELDS};

/// Lifecycle driven by [`ApplicationDriver`](crate::driver::ApplicationDriver).
///
/// The driver calls the `initialise_*` methods once, in declaration order,
/// then alternates `connect_data_and_network` and `set_network_gradient_op`
/// every iteration.
pub trait Application<B: AutodiffBackend> {
    /// Configuration section holding the task parameters.
    const REQUIRED_CONFIG_SECTION: &'static str;

    type TaskParam: TaskSections + DeserializeOwned + Clone;

    fn is_training(&self) -> bool;

    fn initialise_dataset_loader(
        &mut self,
        data_param: DataParams,
        task_param: Self::TaskParam,
    ) -> Result<()>;

    fn initialise_sampler(&mut self) -> Result<()>;

    fn initialise_network(&mut self) -> Result<()>;

    /// Run one forward pass and register outputs and gradients.
    fn connect_data_and_network(
        &mut self,
        outputs_collector: &mut OutputsCollector<B>,
        gradients_collector: &mut GradientsCollector,
    ) -> Result<()>;

    /// Apply the collected gradients.
    fn set_network_gradient_op(&mut self, gradients_collector: &mut GradientsCollector) -> Result<()>;

    /// Whether the driver should keep iterating.
    fn interpret_output(&mut self, batch_output: &OutputsCollector<B>) -> Result<bool>;

    fn save_model(&self, path: &Path) -> Result<()>;

    /// Load the weights written by `save_model`.
    fn restore_model(&mut self, path: &Path) -> Result<()>;

    /// Learning rate in use, once an optimiser exists.
    fn learning_rate(&self) -> Option<f64> {
        None
    }
}

/// Label-driven registration.
///
/// Pairs of fixed and moving subjects are fed to a registration network; the
/// predicted displacement warps the moving label, and the network is trained
/// to minimise the L2 distance between the warped moving label and the fixed
/// label. Images guide the network but are never compared directly.
pub struct RegApp<B: AutodiffBackend> {
    net_param: NetParams,
    action_param: ActionParams,
    is_training: bool,
    seed: Option<u64>,
    device: B::Device,

    data_param: Option<DataParams>,
    registration_param: Option<RegistrationParams>,
    readers: Option<(Arc<ImageReader>, Arc<ImageReader>)>,
    sampler: Option<PairwiseSampler<B, ImageReader>>,
    net: Option<RegistrationNet<B>>,
    optimiser: Option<Box<dyn Optimiser<RegistrationNet<B>, B>>>,
}

impl<B: AutodiffBackend> RegApp<B> {
    pub fn new(
        net_param: NetParams,
        action_param: ActionParams,
        is_training: bool,
        device: &B::Device,
    ) -> Self {
        info!("Starting label-driven registration");
        Self {
            net_param,
            action_param,
            is_training,
            seed: None,
            device: device.clone(),
            data_param: None,
            registration_param: None,
            readers: None,
            sampler: None,
            net: None,
            optimiser: None,
        }
    }

    /// Seed window sampling for reproducible runs.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn readers(&self) -> Option<(&ImageReader, &ImageReader)> {
        self.readers
            .as_ref()
            .map(|(fixed, moving)| (fixed.as_ref(), moving.as_ref()))
    }

    pub fn sampler(&self) -> Option<&PairwiseSampler<B, ImageReader>> {
        self.sampler.as_ref()
    }

    pub fn network(&self) -> Option<&RegistrationNet<B>> {
        self.net.as_ref()
    }

    pub fn registration_param(&self) -> Option<&RegistrationParams> {
        self.registration_param.as_ref()
    }

    pub fn has_optimiser(&self) -> bool {
        self.optimiser.is_some()
    }

    fn ensure_training(&self, stage: &'static str) -> Result<()> {
        if self.is_training {
            Ok(())
        } else {
            Err(EngineError::UnsupportedMode { stage })
        }
    }
}

impl<B: AutodiffBackend> Application<B> for RegApp<B> {
    const REQUIRED_CONFIG_SECTION: &'static str = "REGISTRATION";

    type TaskParam = RegistrationParams;

    fn is_training(&self) -> bool {
        self.is_training
    }

    fn initialise_dataset_loader(
        &mut self,
        data_param: DataParams,
        task_param: RegistrationParams,
    ) -> Result<()> {
        self.ensure_training("initialise_dataset_loader")?;

        let mut fixed = ImageReader::new(FIXED_FIELDS);
        let mut moving = ImageReader::new(MOVING_FIELDS);
        for reader in [&mut fixed, &mut moving] {
            reader.initialise(&data_param, &task_param)?;
        }

        self.readers = Some((Arc::new(fixed), Arc::new(moving)));
        self.data_param = Some(data_param);
        self.registration_param = Some(task_param);
        Ok(())
    }

    fn initialise_sampler(&mut self) -> Result<()> {
        self.ensure_training("initialise_sampler")?;

        let (fixed, moving) = self
            .readers
            .as_ref()
            .ok_or(EngineError::NotInitialised("dataset loader"))?;
        let data_param = self
            .data_param
            .as_ref()
            .ok_or(EngineError::NotInitialised("dataset loader"))?;

        self.sampler = Some(PairwiseSampler::new(
            Arc::clone(fixed),
            Arc::clone(moving),
            data_param,
            self.net_param.batch_size,
            self.action_param.sample_per_volume,
            self.seed,
            &self.device,
        )?);
        Ok(())
    }

    fn initialise_network(&mut self) -> Result<()> {
        let kind = ApplicationNetFactory::create(&self.net_param.name)?;
        let net = kind.init::<B>(self.net_param.decay, &self.net_param.net_config(), &self.device)?;
        info!(
            network = %kind,
            parameters = net.num_params(),
            "Network initialised"
        );
        self.net = Some(net);
        Ok(())
    }

    fn connect_data_and_network(
        &mut self,
        outputs_collector: &mut OutputsCollector<B>,
        gradients_collector: &mut GradientsCollector,
    ) -> Result<()> {
        self.ensure_training("connect_data_and_network")?;

        let sampler = self
            .sampler
            .as_mut()
            .ok_or(EngineError::NotInitialised("sampler"))?;
        let net = self
            .net
            .as_ref()
            .ok_or(EngineError::NotInitialised("network"))?;

        let divisor = net.spatial_divisor();
        if !sampler.window().is_divisible_by(divisor) {
            return Err(EngineError::invalid_configuration(format!(
                "spatial_window_size {} must be divisible by {} for {}",
                sampler.window(),
                divisor,
                net.kind()
            )));
        }

        let image_windows = sampler.next_batch()?;
        let [fixed_image, fixed_label, moving_image, moving_label] = split_windows(image_windows)?
            .map(channels_first);

        let predicted_field = net.forward(fixed_image, moving_image).into_dense_field();

        let resampler = ResamplerLayer::new(Interpolation::Linear, Boundary::Replicate);
        let resampled_moving_label = resampler.forward(moving_label, predicted_field);

        let loss_func = LossFunction::new(RegressionLossType::L2Loss);
        let label_loss = loss_func.forward(resampled_moving_label, fixed_label, None);
        outputs_collector.add_to_collection(label_loss.clone(), "label_loss", Collection::Console)?;

        if self.optimiser.is_none() {
            let kind = OptimiserFactory::create(&self.action_param.optimiser)?;
            debug!(optimiser = %kind, lr = self.action_param.lr, "Building optimiser");
            self.optimiser = Some(kind.get_instance(self.action_param.lr, net.decay()));
        }

        let grads = GradientsParams::from_grads(label_loss.backward(), net);
        gradients_collector.add_to_collection(grads);
        Ok(())
    }

    fn set_network_gradient_op(&mut self, gradients_collector: &mut GradientsCollector) -> Result<()> {
        let Some(grads) = gradients_collector.take()? else {
            return Ok(());
        };
        let optimiser = self
            .optimiser
            .as_mut()
            .ok_or(EngineError::NotInitialised("optimiser"))?;
        let net = self.net.take().ok_or(EngineError::NotInitialised("network"))?;
        self.net = Some(optimiser.step(net, grads));
        Ok(())
    }

    fn interpret_output(&mut self, _batch_output: &OutputsCollector<B>) -> Result<bool> {
        self.ensure_training("interpret_output")?;
        Ok(true)
    }

    fn save_model(&self, path: &Path) -> Result<()> {
        let net = self.net.as_ref().ok_or(EngineError::NotInitialised("network"))?;
        net.clone()
            .save_file(path, &CompactRecorder::new())
            .map_err(|err| EngineError::checkpoint(format!("{}: {}", path.display(), err)))?;
        info!(path = %path.display(), "Saved network weights");
        Ok(())
    }

    /// Only network weights are checkpointed. Optimiser state (Adam moments,
    /// momentum buffers) is dropped and rebuilt from zero on the next
    /// `connect_data_and_network`.
    fn restore_model(&mut self, path: &Path) -> Result<()> {
        let net = self.net.as_ref().ok_or(EngineError::NotInitialised("network"))?;
        let restored = net
            .clone()
            .load_file(path, &CompactRecorder::new(), &self.device)
            .map_err(|err| EngineError::checkpoint(format!("{}: {}", path.display(), err)))?;
        self.net = Some(restored);
        self.optimiser = None;
        info!(path = %path.display(), "Restored network weights");
        Ok(())
    }

    fn learning_rate(&self) -> Option<f64> {
        self.optimiser.as_ref().map(|o| o.learning_rate())
    }
}

/// Split `[B, D, H, W, 4]` windows into
/// `(fixed_image, fixed_label, moving_image, moving_label)`, each `[B, D, H, W, 1]`.
pub fn split_windows<B: burn::tensor::backend::Backend>(
    image_windows: Tensor<B, 5>,
) -> Result<[Tensor<B, 5>; 4]> {
    let dims = image_windows.dims();
    if dims[4] != 4 {
        return Err(EngineError::ShapeMismatch {
            expected: vec![dims[0], dims[1], dims[2], dims[3], 4],
            actual: dims.to_vec(),
        });
    }
    Ok(std::array::from_fn(|i| image_windows.clone().narrow(4, i, 1)))
}

/// `[B, D, H, W, C]` to `[B, C, D, H, W]`.
pub fn channels_first<B: burn::tensor::backend::Backend>(volume: Tensor<B, 5>) -> Tensor<B, 5> {
    volume.permute([0, 4, 1, 2, 3])
}
