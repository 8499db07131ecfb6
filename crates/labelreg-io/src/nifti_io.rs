use anyhow::{Context, Result};
use burn::tensor::backend::Backend;
use burn::tensor::{Shape, Tensor, TensorData};
use labelreg_core::{Image, ImageGeometry};
use nalgebra::{Matrix3, Vector3};
use nifti::{IntoNdArray, NiftiHeader, NiftiObject, ReaderOptions};
use std::path::Path;

/// Whether `path` names a NIfTI file (`.nii` or `.nii.gz`).
pub fn is_nifti_path<P: AsRef<Path>>(path: P) -> bool {
    let name = path
        .as_ref()
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    name.ends_with(".nii") || name.ends_with(".nii.gz")
}

/// Voxel-to-world affine rows, preferring sform, then qform, then pixdim.
fn header_affine(header: &NiftiHeader) -> [[f32; 4]; 3] {
    if header.sform_code > 0 {
        return [header.srow_x, header.srow_y, header.srow_z];
    }

    if header.qform_code > 0 {
        let b = header.quatern_b;
        let c = header.quatern_c;
        let d = header.quatern_d;
        let a = (1.0 - (b * b + c * c + d * d).min(1.0)).sqrt();
        let qfac = if header.pixdim[0] == 0.0 { 1.0 } else { header.pixdim[0] };

        let dx = header.pixdim[1];
        let dy = header.pixdim[2];
        let dz = header.pixdim[3] * qfac;

        return [
            [
                (a * a + b * b - c * c - d * d) * dx,
                (2.0 * b * c - 2.0 * a * d) * dy,
                (2.0 * b * d + 2.0 * a * c) * dz,
                header.quatern_x,
            ],
            [
                (2.0 * b * c + 2.0 * a * d) * dx,
                (a * a + c * c - b * b - d * d) * dy,
                (2.0 * c * d - 2.0 * a * b) * dz,
                header.quatern_y,
            ],
            [
                (2.0 * b * d - 2.0 * a * c) * dx,
                (2.0 * c * d + 2.0 * a * b) * dy,
                (a * a + d * d - c * c - b * b) * dz,
                header.quatern_z,
            ],
        ];
    }

    let spacing = |v: f32| if v > 0.0 { v } else { 1.0 };
    [
        [spacing(header.pixdim[1]), 0.0, 0.0, 0.0],
        [0.0, spacing(header.pixdim[2]), 0.0, 0.0],
        [0.0, 0.0, spacing(header.pixdim[3]), 0.0],
    ]
}

/// Convert a NIfTI `(x, y, z)` affine into a geometry over `(z, y, x)` index axes.
fn geometry_from_affine(affine: [[f32; 4]; 3]) -> Result<ImageGeometry> {
    let origin = [affine[0][3] as f64, affine[1][3] as f64, affine[2][3] as f64];

    let mut columns = [Vector3::zeros(); 3];
    let mut spacing = [1.0; 3];
    let fallback = [Vector3::x(), Vector3::y(), Vector3::z()];
    for axis in 0..3 {
        let column = Vector3::new(
            affine[0][axis] as f64,
            affine[1][axis] as f64,
            affine[2][axis] as f64,
        );
        let norm = column.norm();
        if norm > 1e-9 {
            columns[axis] = column / norm;
            spacing[axis] = norm;
        } else {
            columns[axis] = fallback[axis];
        }
    }

    // Tensor axis 0 is NIfTI axis z.
    let direction = Matrix3::from_columns(&[columns[2], columns[1], columns[0]]);
    ImageGeometry::new(origin, [spacing[2], spacing[1], spacing[0]], direction)
        .context("NIfTI header describes a degenerate geometry")
}

/// Read a 3D NIfTI volume into `[Z, Y, X]` layout.
pub fn read_nifti<B: Backend, P: AsRef<Path>>(path: P, device: &B::Device) -> Result<Image<B>> {
    let path = path.as_ref();
    let obj = ReaderOptions::new()
        .read_file(path)
        .with_context(|| format!("Failed to read NIfTI file {}", path.display()))?;
    let geometry = geometry_from_affine(header_affine(obj.header()))?;

    let volume = obj
        .into_volume()
        .into_ndarray::<f32>()
        .context("Failed to convert volume to ndarray")?;

    // Trailing singleton axes (e.g. a 4D file with one time point) are dropped.
    let mut shape = volume.shape().to_vec();
    while shape.len() > 3 && shape.last() == Some(&1) {
        shape.pop();
    }
    if shape.len() != 3 {
        anyhow::bail!(
            "Expected 3D NIfTI file {}, found shape {:?}",
            path.display(),
            volume.shape()
        );
    }

    // Logical iteration order is row-major over (x, y, z) whatever the memory layout.
    let voxels: Vec<f32> = volume.iter().copied().collect();
    let data = TensorData::new(voxels, Shape::new([shape[0], shape[1], shape[2]]));
    let tensor = Tensor::<B, 3>::from_data(data, device).permute([2, 1, 0]);

    tracing::debug!("Read {} with shape {:?}", path.display(), tensor.dims());
    Ok(Image::new(tensor, geometry))
}

/// Write an image as NIfTI, storing its geometry in the sform.
pub fn write_nifti<B: Backend, P: AsRef<Path>>(path: P, image: &Image<B>) -> Result<()> {
    use ndarray::Array3;
    use nifti::writer::WriterOptions;

    let [nz, ny, nx] = image.shape();
    let voxels = image
        .data()
        .clone()
        .permute([2, 1, 0])
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow::anyhow!("Failed to get tensor data: {:?}", e))?;
    let array = Array3::from_shape_vec((nx, ny, nz), voxels)
        .context("Failed to create ndarray from image data")?;

    let geometry = image.geometry();
    let mut header = NiftiHeader::default();
    header.sform_code = 1;
    header.qform_code = 0;
    // NIfTI column j is tensor axis 2 - j.
    let mut rows = [[0.0f32; 4]; 3];
    for (row, values) in rows.iter_mut().enumerate() {
        for column in 0..3 {
            let axis = 2 - column;
            values[column] = (geometry.direction[(row, axis)] * geometry.spacing[axis]) as f32;
        }
        values[3] = geometry.origin[row] as f32;
    }
    header.srow_x = rows[0];
    header.srow_y = rows[1];
    header.srow_z = rows[2];
    header.pixdim[1] = geometry.spacing[2] as f32;
    header.pixdim[2] = geometry.spacing[1] as f32;
    header.pixdim[3] = geometry.spacing[0] as f32;

    WriterOptions::new(path.as_ref())
        .reference_header(&header)
        .write_nifti(&array)
        .map_err(|e| anyhow::anyhow!("Failed to write NIfTI file: {}", e))?;

    Ok(())
}
