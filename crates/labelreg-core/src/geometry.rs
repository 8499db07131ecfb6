//! Physical-space geometry of a 3D volume.
//!
//! A geometry describes how voxel indices map to physical coordinates:
//! `point = origin + Direction * (index * spacing)`.
//! Axes are ordered `(z, y, x)` to match the `[D, H, W]` tensor layout.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Origin, spacing and orientation of a volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageGeometry {
    /// Physical coordinate of voxel `(0, 0, 0)`.
    pub origin: Vector3<f64>,
    /// Physical distance between voxels along each axis.
    pub spacing: Vector3<f64>,
    /// Column `i` is the physical direction of index axis `i`.
    pub direction: Matrix3<f64>,
}

impl Default for ImageGeometry {
    fn default() -> Self {
        Self::identity()
    }
}

impl ImageGeometry {
    /// Create a geometry, rejecting non-positive spacing and singular directions.
    pub fn new(origin: [f64; 3], spacing: [f64; 3], direction: Matrix3<f64>) -> Result<Self> {
        if spacing.iter().any(|s| !(*s > 0.0)) {
            return Err(CoreError::degenerate_geometry(format!(
                "spacing must be positive, got {:?}",
                spacing
            )));
        }
        if direction.determinant().abs() < 1e-12 {
            return Err(CoreError::degenerate_geometry("direction matrix is singular"));
        }
        Ok(Self {
            origin: Vector3::from(origin),
            spacing: Vector3::from(spacing),
            direction,
        })
    }

    /// Unit spacing, zero origin, axis-aligned.
    pub fn identity() -> Self {
        Self {
            origin: Vector3::zeros(),
            spacing: Vector3::new(1.0, 1.0, 1.0),
            direction: Matrix3::identity(),
        }
    }

    /// Map a continuous index to a physical point.
    pub fn index_to_physical(&self, index: [f64; 3]) -> [f64; 3] {
        let scaled = Vector3::from(index).component_mul(&self.spacing);
        let point = self.origin + self.direction * scaled;
        [point[0], point[1], point[2]]
    }

    /// Map a physical point to a continuous index.
    ///
    /// `index = (Direction^-1 * (point - origin)) / spacing`
    pub fn physical_to_index(&self, point: [f64; 3]) -> Result<[f64; 3]> {
        let inv_dir = self
            .direction
            .try_inverse()
            .ok_or_else(|| CoreError::degenerate_geometry("direction matrix is singular"))?;
        let rotated = inv_dir * (Vector3::from(point) - self.origin);
        let index = rotated.component_div(&self.spacing);
        Ok([index[0], index[1], index[2]])
    }

    /// Spacing after resampling `from` voxels onto `to` voxels per axis,
    /// keeping the physical extent between the corner voxels.
    pub fn resized(&self, from: [usize; 3], to: [usize; 3]) -> Self {
        let mut spacing = self.spacing;
        for axis in 0..3 {
            if from[axis] > 1 && to[axis] > 1 {
                spacing[axis] *= (from[axis] - 1) as f64 / (to[axis] - 1) as f64;
            }
        }
        Self { spacing, ..*self }
    }
}
