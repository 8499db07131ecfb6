//! Random pairing of fixed and moving subjects into training windows.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use labelreg_core::WindowShape;
use labelreg_model::interpolation::resize_volume;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use tracing::debug;

use crate::config::DataParams;
use crate::error::{EngineError, Result};
use crate::reader::{ImageReader, ImageSource, Subject};

/// Fields read from the fixed reader, in window channel order.
pub const FIXED_FIELDS: [&str; 2] = ["fixed_image", "fixed_label"];
/// Fields read from the moving reader, in window channel order.
pub const MOVING_FIELDS: [&str; 2] = ["moving_image", "moving_label"];

/// Draws random `(fixed, moving)` subject pairs and emits batches of
/// `[batch, D, H, W, 4]` windows with channels
/// `(fixed_image, fixed_label, moving_image, moving_label)`.
///
/// Every volume is resized to the window with trilinear interpolation. Each
/// pair contributes `window_per_image` windows before a new pair is drawn.
pub struct PairwiseSampler<B: Backend, S: ImageSource = ImageReader> {
    reader_0: Arc<S>,
    reader_1: Arc<S>,
    window: WindowShape,
    batch_size: usize,
    window_per_image: usize,
    normalise: BTreeSet<&'static str>,
    rng: StdRng,
    queue: VecDeque<Tensor<B, 4>>,
    device: B::Device,
}

impl<B: Backend, S: ImageSource> PairwiseSampler<B, S> {
    pub fn new(
        reader_0: Arc<S>,
        reader_1: Arc<S>,
        data_param: &DataParams,
        batch_size: usize,
        window_per_image: usize,
        seed: Option<u64>,
        device: &B::Device,
    ) -> Result<Self> {
        if batch_size == 0 || window_per_image == 0 {
            return Err(EngineError::invalid_configuration(
                "batch_size and window_per_image must be positive",
            ));
        }
        require_fields(reader_0.as_ref(), &FIXED_FIELDS)?;
        require_fields(reader_1.as_ref(), &MOVING_FIELDS)?;
        if reader_0.is_empty() || reader_1.is_empty() {
            return Err(EngineError::data("pairwise sampling needs subjects in both readers"));
        }

        let fixed_section = reader_0
            .section_name(FIXED_FIELDS[0])
            .and_then(|name| data_param.get(name))
            .ok_or_else(|| {
                EngineError::invalid_configuration("no data section for fixed_image")
            })?;
        let window = fixed_section.spatial_window_size.ok_or_else(|| {
            EngineError::invalid_configuration("spatial_window_size is required for fixed_image")
        })?;

        let mut normalise = BTreeSet::new();
        for (reader, field) in [(&reader_0, FIXED_FIELDS[0]), (&reader_1, MOVING_FIELDS[0])] {
            let enabled = reader
                .section_name(field)
                .and_then(|name| data_param.get(name))
                .is_some_and(|section| section.normalisation);
            if enabled {
                normalise.insert(field);
            }
        }

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        debug!(
            %window,
            batch_size,
            window_per_image,
            ?normalise,
            "Pairwise sampler ready"
        );

        Ok(Self {
            reader_0,
            reader_1,
            window,
            batch_size,
            window_per_image,
            normalise,
            rng,
            queue: VecDeque::new(),
            device: device.clone(),
        })
    }

    pub fn window(&self) -> WindowShape {
        self.window
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Windows waiting to be batched.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Next batch `[batch, D, H, W, 4]`.
    pub fn next_batch(&mut self) -> Result<Tensor<B, 5>> {
        while self.queue.len() < self.batch_size {
            self.enqueue_pair()?;
        }
        let windows: Vec<Tensor<B, 4>> = self.queue.drain(..self.batch_size).collect();
        Ok(Tensor::stack(windows, 0))
    }

    fn enqueue_pair(&mut self) -> Result<()> {
        let fixed_index = self.rng.random_range(0..self.reader_0.len());
        let moving_index = self.rng.random_range(0..self.reader_1.len());
        debug!(
            fixed = ?self.reader_0.subject_id(fixed_index),
            moving = ?self.reader_1.subject_id(moving_index),
            "Sampling pair"
        );

        let fixed = self.reader_0.load::<B>(fixed_index, &self.device)?;
        let moving = self.reader_1.load::<B>(moving_index, &self.device)?;

        let mut channels = Vec::with_capacity(4);
        for field in FIXED_FIELDS {
            channels.push(self.window_of(&fixed, field)?);
        }
        for field in MOVING_FIELDS {
            channels.push(self.window_of(&moving, field)?);
        }
        let window = Tensor::cat(channels, 3);

        for _ in 0..self.window_per_image {
            self.queue.push_back(window.clone());
        }
        Ok(())
    }

    /// One field resized to the window, `[D, H, W, 1]`.
    fn window_of(&self, subject: &Subject<B>, field: &str) -> Result<Tensor<B, 4>> {
        let image = subject
            .get(field)
            .ok_or_else(|| EngineError::data(format!("subject has no '{}' volume", field)))?;
        let volume = if self.normalise.contains(field) {
            image.normalised().to_batch_tensor()
        } else {
            image.to_batch_tensor()
        };

        let [d, h, w] = self.window.extents();
        Ok(resize_volume(volume, [d, h, w]).reshape([d, h, w, 1]))
    }
}

fn require_fields<S: ImageSource>(reader: &S, fields: &[&str]) -> Result<()> {
    let available = reader.fields();
    match fields.iter().find(|f| !available.contains(*f)) {
        Some(missing) => Err(EngineError::invalid_configuration(format!(
            "reader does not provide '{}' (fields: {:?})",
            missing, available
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DataSection;
    use labelreg_core::{Image, ImageGeometry};
    use burn_ndarray::NdArray;
    use std::cell::Cell;

    type TestBackend = NdArray<f32>;

    /// Subjects whose volumes are constant, one value per field.
    struct ConstantSource {
        fields: [&'static str; 2],
        values: Vec<[f32; 2]>,
        shape: [usize; 3],
        loads: Cell<usize>,
    }

    impl ConstantSource {
        fn new(fields: [&'static str; 2], values: Vec<[f32; 2]>) -> Self {
            Self {
                fields,
                values,
                shape: [4, 4, 4],
                loads: Cell::new(0),
            }
        }
    }

    impl ImageSource for ConstantSource {
        fn fields(&self) -> Vec<&str> {
            self.fields.to_vec()
        }

        fn len(&self) -> usize {
            self.values.len()
        }

        fn subject_id(&self, _index: usize) -> Option<&str> {
            None
        }

        fn section_name(&self, field: &str) -> Option<&str> {
            self.fields.iter().any(|f| *f == field).then_some("section")
        }

        fn load<B: Backend>(&self, index: usize, device: &B::Device) -> Result<Subject<B>> {
            self.loads.set(self.loads.get() + 1);
            let n = self.shape.iter().product();
            self.fields
                .iter()
                .zip(self.values[index])
                .map(|(field, value)| {
                    let image = Image::from_voxels(vec![value; n], self.shape, ImageGeometry::identity(), device)
                        .map_err(|e| EngineError::data(e.to_string()))?;
                    Ok((field.to_string(), image))
                })
                .collect()
        }
    }

    fn data_param(window: [usize; 3], normalisation: bool) -> DataParams {
        let mut data = DataParams::new();
        data.insert(
            "section".to_string(),
            DataSection {
                spatial_window_size: Some(WindowShape::new(window).unwrap()),
                normalisation,
                ..Default::default()
            },
        );
        data
    }

    fn sources() -> (Arc<ConstantSource>, Arc<ConstantSource>) {
        (
            Arc::new(ConstantSource::new(FIXED_FIELDS, vec![[1.0, 2.0]])),
            Arc::new(ConstantSource::new(MOVING_FIELDS, vec![[3.0, 4.0]])),
        )
    }

    #[test]
    fn test_batch_layout_and_channel_order() {
        let (fixed, moving) = sources();
        let device = Default::default();
        let mut sampler = PairwiseSampler::<TestBackend, _>::new(
            fixed,
            moving,
            &data_param([2, 3, 2], false),
            3,
            1,
            Some(0),
            &device,
        )
        .unwrap();

        let batch = sampler.next_batch().unwrap();
        assert_eq!(batch.dims(), [3, 2, 3, 2, 4]);

        for (channel, expected) in [1.0f32, 2.0, 3.0, 4.0].into_iter().enumerate() {
            let values = batch.clone().narrow(4, channel, 1).into_data().to_vec::<f32>().unwrap();
            assert!(values.iter().all(|v| (*v - expected).abs() < 1e-6));
        }
    }

    #[test]
    fn test_windows_per_image_reuse_pairs() {
        let (fixed, moving) = sources();
        let device = Default::default();
        let mut sampler = PairwiseSampler::<TestBackend, _>::new(
            fixed.clone(),
            moving.clone(),
            &data_param([2, 2, 2], false),
            4,
            2,
            Some(0),
            &device,
        )
        .unwrap();

        sampler.next_batch().unwrap();
        assert_eq!(fixed.loads.get(), 2);
        assert_eq!(moving.loads.get(), 2);
        assert_eq!(sampler.queued(), 0);

        let mut sampler = PairwiseSampler::<TestBackend, _>::new(
            fixed.clone(),
            moving,
            &data_param([2, 2, 2], false),
            1,
            3,
            Some(0),
            &device,
        )
        .unwrap();
        sampler.next_batch().unwrap();
        assert_eq!(sampler.queued(), 2);
    }

    #[test]
    fn test_normalisation_leaves_labels_untouched() {
        let (fixed, moving) = sources();
        let device = Default::default();
        let mut sampler = PairwiseSampler::<TestBackend, _>::new(
            fixed,
            moving,
            &data_param([2, 2, 2], true),
            1,
            1,
            Some(0),
            &device,
        )
        .unwrap();

        let batch = sampler.next_batch().unwrap();
        let channel = |c: usize| batch.clone().narrow(4, c, 1).mean().into_scalar();
        // Constant images centre to zero; labels keep their values.
        assert!(channel(0).abs() < 1e-6);
        assert!((channel(1) - 2.0).abs() < 1e-6);
        assert!(channel(2).abs() < 1e-6);
        assert!((channel(3) - 4.0).abs() < 1e-6);
    }

    #[test]
    fn test_requires_window_size() {
        let (fixed, moving) = sources();
        let device = Default::default();
        let mut data = data_param([2, 2, 2], false);
        data.values_mut().for_each(|s| s.spatial_window_size = None);

        let result =
            PairwiseSampler::<TestBackend, _>::new(fixed, moving, &data, 1, 1, None, &device);
        assert!(matches!(result, Err(EngineError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_rejects_swapped_readers() {
        let (fixed, moving) = sources();
        let device = Default::default();
        let result = PairwiseSampler::<TestBackend, _>::new(
            moving,
            fixed,
            &data_param([2, 2, 2], false),
            1,
            1,
            None,
            &device,
        );
        assert!(matches!(result, Err(EngineError::InvalidConfiguration(_))));
    }
}
