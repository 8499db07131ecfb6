//! Grid sampling of 5D volumes.
//!
//! Volumes are `[B, C, D, H, W]`; sampling grids are `[B, 3, D', H', W']`
//! holding voxel coordinates ordered `(z, y, x)`. The output takes the grid's
//! spatial shape.

use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::ModelError;

/// How samples outside the volume are resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Boundary {
    /// Clamp coordinates to the nearest edge voxel.
    #[default]
    Replicate,
    /// Out-of-volume corners contribute zero.
    Zero,
}

impl FromStr for Boundary {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "replicate" => Ok(Self::Replicate),
            "zero" => Ok(Self::Zero),
            _ => Err(ModelError::UnknownResamplerOption(s.to_string())),
        }
    }
}

/// Gathers voxel values at integer corner coordinates of a sampling grid.
struct CornerSampler<B: Backend> {
    flat: Tensor<B, 3>,
    channels: usize,
    source: [usize; 3],
    target: [usize; 4],
    boundary: Boundary,
}

impl<B: Backend> CornerSampler<B> {
    fn new(image: Tensor<B, 5>, grid_dims: [usize; 5], boundary: Boundary) -> Self {
        let [b, c, d, h, w] = image.dims();
        let [_, _, od, oh, ow] = grid_dims;
        Self {
            flat: image.reshape([b, c, d * h * w]),
            channels: c,
            source: [d, h, w],
            target: [b, od, oh, ow],
            boundary,
        }
    }

    /// Values at corners `(z, y, x)`, each coordinate `[B, 1, D', H', W']`.
    fn fetch(&self, z: Tensor<B, 5>, y: Tensor<B, 5>, x: Tensor<B, 5>) -> Tensor<B, 5> {
        let [d, h, w] = self.source;
        let [b, od, oh, ow] = self.target;
        let c = self.channels;

        let mask = match self.boundary {
            Boundary::Replicate => None,
            Boundary::Zero => Some(
                inside(z.clone(), d) * inside(y.clone(), h) * inside(x.clone(), w),
            ),
        };

        let zi: Tensor<B, 5, Int> = z.clamp(0.0, (d - 1) as f32).int();
        let yi: Tensor<B, 5, Int> = y.clamp(0.0, (h - 1) as f32).int();
        let xi: Tensor<B, 5, Int> = x.clamp(0.0, (w - 1) as f32).int();
        let index = zi.mul_scalar((h * w) as i32) + yi.mul_scalar(w as i32) + xi;

        let index = index.reshape([b, 1, od * oh * ow]).repeat(&[1, c, 1]);
        let values = self.flat.clone().gather(2, index).reshape([b, c, od, oh, ow]);

        match mask {
            Some(mask) => values * mask,
            None => values,
        }
    }
}

/// 1.0 where `0 <= coord <= size - 1`, else 0.0.
fn inside<B: Backend>(coord: Tensor<B, 5>, size: usize) -> Tensor<B, 5> {
    let lower = coord.clone().greater_equal_elem(0.0).float();
    let upper = coord.lower_equal_elem((size - 1) as f32).float();
    lower * upper
}

fn split_grid<B: Backend>(grid: Tensor<B, 5>) -> (Tensor<B, 5>, Tensor<B, 5>, Tensor<B, 5>) {
    let z = grid.clone().narrow(1, 0, 1);
    let y = grid.clone().narrow(1, 1, 1);
    let x = grid.narrow(1, 2, 1);
    (z, y, x)
}

/// Trilinear interpolation.
///
/// # Arguments
/// * `image` - Input volume `[B, C, D, H, W]`
/// * `grid` - Sampling grid `[B, 3, D', H', W']` in voxel coordinates `(z, y, x)`
/// * `boundary` - Out-of-volume handling
///
/// # Returns
/// * Interpolated volume `[B, C, D', H', W']`
pub fn trilinear_interpolation<B: Backend>(
    image: Tensor<B, 5>,
    grid: Tensor<B, 5>,
    boundary: Boundary,
) -> Tensor<B, 5> {
    let sampler = CornerSampler::new(image, grid.dims(), boundary);
    let (z, y, x) = split_grid(grid);

    let z0 = z.clone().floor();
    let y0 = y.clone().floor();
    let x0 = x.clone().floor();
    let z1 = z0.clone().add_scalar(1.0);
    let y1 = y0.clone().add_scalar(1.0);
    let x1 = x0.clone().add_scalar(1.0);

    let wz1 = z - z0.clone();
    let wz0 = wz1.clone().neg().add_scalar(1.0);
    let wy1 = y - y0.clone();
    let wy0 = wy1.clone().neg().add_scalar(1.0);
    let wx1 = x - x0.clone();
    let wx0 = wx1.clone().neg().add_scalar(1.0);

    let v000 = sampler.fetch(z0.clone(), y0.clone(), x0.clone());
    let v001 = sampler.fetch(z0.clone(), y0.clone(), x1.clone());
    let v010 = sampler.fetch(z0.clone(), y1.clone(), x0.clone());
    let v011 = sampler.fetch(z0, y1.clone(), x1.clone());
    let v100 = sampler.fetch(z1.clone(), y0.clone(), x0.clone());
    let v101 = sampler.fetch(z1.clone(), y0, x1.clone());
    let v110 = sampler.fetch(z1.clone(), y1.clone(), x0);
    let v111 = sampler.fetch(z1, y1, x1);

    // x, then y, then z
    let w00 = v000 * wx0.clone() + v001 * wx1.clone();
    let w01 = v010 * wx0.clone() + v011 * wx1.clone();
    let w10 = v100 * wx0.clone() + v101 * wx1.clone();
    let w11 = v110 * wx0 + v111 * wx1;

    let w0 = w00 * wy0.clone() + w01 * wy1.clone();
    let w1 = w10 * wy0 + w11 * wy1;

    w0 * wz0 + w1 * wz1
}

/// Nearest-neighbour interpolation over the same grid convention.
pub fn nearest_interpolation<B: Backend>(
    image: Tensor<B, 5>,
    grid: Tensor<B, 5>,
    boundary: Boundary,
) -> Tensor<B, 5> {
    let sampler = CornerSampler::new(image, grid.dims(), boundary);
    let (z, y, x) = split_grid(grid);
    sampler.fetch(
        z.add_scalar(0.5).floor(),
        y.add_scalar(0.5).floor(),
        x.add_scalar(0.5).floor(),
    )
}

/// Voxel coordinates along one axis, broadcastable over `[B, 1, D, H, W]`.
fn axis_coordinates<B: Backend>(size: usize, axis: usize, device: &B::Device) -> Tensor<B, 5> {
    let mut shape = [1, 1, 1, 1, 1];
    shape[axis + 2] = size;
    Tensor::arange(0..size as i64, device).float().reshape(shape)
}

/// Add the identity voxel grid to a displacement field `[B, 3, D, H, W]`.
pub fn displacement_to_grid<B: Backend>(field: Tensor<B, 5>) -> Tensor<B, 5> {
    let [_, _, d, h, w] = field.dims();
    let device = field.device();
    let (dz, dy, dx) = split_grid(field);

    let z = dz + axis_coordinates::<B>(d, 0, &device);
    let y = dy + axis_coordinates::<B>(h, 1, &device);
    let x = dx + axis_coordinates::<B>(w, 2, &device);
    Tensor::cat(vec![z, y, x], 1)
}

/// Subtract the identity voxel grid from a sampling grid `[B, 3, D, H, W]`.
pub fn grid_to_displacement<B: Backend>(grid: Tensor<B, 5>) -> Tensor<B, 5> {
    let [_, _, d, h, w] = grid.dims();
    let device = grid.device();
    let (z, y, x) = split_grid(grid);

    let dz = z - axis_coordinates::<B>(d, 0, &device);
    let dy = y - axis_coordinates::<B>(h, 1, &device);
    let dx = x - axis_coordinates::<B>(w, 2, &device);
    Tensor::cat(vec![dz, dy, dx], 1)
}

/// Corner-aligned trilinear resize of `[B, C, D, H, W]` to `[B, C, size]`.
///
/// A target extent of 1 samples the centre of the source axis.
pub fn resize_volume<B: Backend>(image: Tensor<B, 5>, size: [usize; 3]) -> Tensor<B, 5> {
    let [b, _, d, h, w] = image.dims();
    if [d, h, w] == size {
        return image;
    }
    let device = image.device();
    let [od, oh, ow] = size;

    let axis = |from: usize, to: usize, axis: usize| -> Tensor<B, 5> {
        let coords = axis_coordinates::<B>(to, axis, &device);
        if to > 1 {
            coords.mul_scalar((from - 1) as f32 / (to - 1) as f32)
        } else {
            coords.add_scalar((from - 1) as f32 / 2.0)
        }
    };

    let z = axis(d, od, 0).repeat(&[b, 1, 1, oh, ow]);
    let y = axis(h, oh, 1).repeat(&[b, 1, od, 1, ow]);
    let x = axis(w, ow, 2).repeat(&[b, 1, od, oh, 1]);
    let grid = Tensor::cat(vec![z, y, x], 1);

    trilinear_interpolation(image, grid, Boundary::Replicate)
}
