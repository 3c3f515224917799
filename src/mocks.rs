//! Stand-in models and synthetic input files for tests.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use ndarray::prelude::*;
use npyz::{AutoSerialize, Order, WriteOptions, WriterBuilder};

use crate::errors::Result;
use crate::traits::{VolumeClassificationModel, VolumeSegmentationModel};

/// Labels each voxel by binning its intensity into `num_classes` equal bins.
#[derive(Debug, Clone)]
pub struct MockSegmentationModel {
    pub num_classes: usize,
}

impl MockSegmentationModel {
    pub const fn new(num_classes: usize) -> Self {
        Self { num_classes }
    }

    pub fn label_for(value: f32, num_classes: usize) -> u8 {
        (value.clamp(0.0, 1.0) * (num_classes - 1) as f32).round() as u8
    }

    /// One-hot logits for the class `value` falls in.
    pub fn logits_for(value: f32, num_classes: usize) -> Array1<f32> {
        let label = Self::label_for(value, num_classes) as usize;
        Array1::from_shape_fn(num_classes, |c| if c == label { 1.0 } else { 0.0 })
    }
}

impl VolumeSegmentationModel for MockSegmentationModel {
    fn predict(&self, windows: ArrayView5<f32>) -> Result<Array5<f32>> {
        let (b, _, d, h, w) = windows.dim();
        let classes = self.num_classes;
        Ok(Array5::from_shape_fn((b, classes, d, h, w), |(n, c, z, y, x)| {
            let label = Self::label_for(windows[[n, 0, z, y, x]], classes) as usize;
            if c == label {
                1.0
            } else {
                0.0
            }
        }))
    }
}

/// Leans toward "Abnormal" when the mean input intensity is above 0.5.
#[derive(Debug, Clone, Copy)]
pub struct MockClassificationModel;

impl VolumeClassificationModel for MockClassificationModel {
    fn predict(&self, input: ArrayView5<f32>) -> Result<Array2<f32>> {
        let batch = input.len_of(Axis(0));
        Ok(Array2::from_shape_fn((batch, 2), |(n, c)| {
            let mean = input.index_axis(Axis(0), n).mean().unwrap_or(0.0);
            let score = (mean - 0.5) * 4.0;
            if c == 1 {
                score
            } else {
                -score
            }
        }))
    }
}

/// Header fields a synthetic NIfTI-1 file can vary.
#[derive(Debug, Clone, PartialEq)]
pub struct NiftiFixture {
    /// First three rows of the voxel-to-world affine, stored as the sform.
    pub srows: [[f32; 4]; 3],
    pub scl_slope: f32,
    pub scl_inter: f32,
}

impl NiftiFixture {
    /// Axis-aligned RAS grid with the given voxel size.
    pub const fn with_spacing(spacing: [f32; 3]) -> Self {
        Self::with_srows([
            [spacing[0], 0.0, 0.0, 0.0],
            [0.0, spacing[1], 0.0, 0.0],
            [0.0, 0.0, spacing[2], 0.0],
        ])
    }

    pub const fn with_srows(srows: [[f32; 4]; 3]) -> Self {
        Self {
            srows,
            scl_slope: 1.0,
            scl_inter: 0.0,
        }
    }

    pub const fn scaled(mut self, slope: f32, intercept: f32) -> Self {
        self.scl_slope = slope;
        self.scl_inter = intercept;
        self
    }

    /// Writes a single-file NIfTI-1 (`.nii`) holding float32 `frames`, each
    /// indexed `[x, y, z]`. More than one frame makes a 4D series.
    pub fn write(&self, path: &Path, frames: &[ArrayView3<f32>]) -> std::io::Result<()> {
        let Some(first) = frames.first() else {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "no frames"));
        };
        let (nx, ny, nz) = first.dim();
        if frames.iter().any(|frame| frame.dim() != (nx, ny, nz)) {
            return Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, "frame shapes differ"));
        }

        let mut header = vec![0u8; 348];
        let mut put = |offset: usize, bytes: &[u8]| header[offset..offset + bytes.len()].copy_from_slice(bytes);

        put(0, &348i32.to_le_bytes());
        let rank: i16 = if frames.len() > 1 { 4 } else { 3 };
        let dims: [i16; 8] = [rank, nx as i16, ny as i16, nz as i16, frames.len() as i16, 1, 1, 1];
        for (i, dim) in dims.iter().enumerate() {
            put(40 + 2 * i, &dim.to_le_bytes());
        }
        put(70, &16i16.to_le_bytes()); // float32
        put(72, &32i16.to_le_bytes());

        let mut pixdim = [1.0f32; 8];
        for v in 0..3 {
            pixdim[v + 1] = (0..3).map(|w| self.srows[w][v].powi(2)).sum::<f32>().sqrt();
        }
        for (i, value) in pixdim.iter().enumerate() {
            put(76 + 4 * i, &value.to_le_bytes());
        }
        put(108, &352f32.to_le_bytes());
        put(112, &self.scl_slope.to_le_bytes());
        put(116, &self.scl_inter.to_le_bytes());
        put(254, &1i16.to_le_bytes()); // sform_code
        for (r, row) in self.srows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                put(280 + 16 * r + 4 * c, &value.to_le_bytes());
            }
        }
        put(344, b"n+1\0");

        let mut file = BufWriter::new(File::create(path)?);
        file.write_all(&header)?;
        file.write_all(&[0u8; 4])?;
        for frame in frames {
            // x varies fastest on disk
            for value in frame.t().iter() {
                file.write_all(&value.to_le_bytes())?;
            }
        }
        file.flush()
    }
}

/// Writes a float32 NIfTI-1 file with a diagonal sform of the given voxel spacing.
pub fn write_nifti(path: &Path, data: ArrayView3<f32>, spacing: [f32; 3]) -> std::io::Result<()> {
    NiftiFixture::with_spacing(spacing).write(path, &[data])
}

/// Writes `data` as `.npy` with its element type's default dtype, laid out in `order`.
pub fn write_npy_as<T, D>(path: &Path, data: ArrayView<T, D>, order: Order) -> std::io::Result<()>
where
    T: AutoSerialize + Copy,
    D: Dimension,
{
    let shape: Vec<u64> = data.shape().iter().map(|&d| d as u64).collect();
    let mut writer = WriteOptions::<T>::new()
        .default_dtype()
        .shape(&shape)
        .order(order)
        .writer(BufWriter::new(File::create(path)?))
        .begin_nd()?;
    match order {
        Order::C => writer.extend(data.iter().copied())?,
        Order::Fortran => writer.extend(data.t().iter().copied())?,
    }
    writer.finish()
}

/// Writes a C-order little-endian float32 `.npy` file.
pub fn write_npy(path: &Path, data: ArrayView3<f32>) -> std::io::Result<()> {
    write_npy_as(path, data, Order::C)
}

/// A cube of `background` with a brighter block in the middle, in scanner
/// units (the loader maps 0..5000 onto 0..1).
pub fn synthetic_knee(shape: (usize, usize, usize)) -> Array3<f32> {
    let (nx, ny, nz) = shape;
    Array3::from_shape_fn(shape, |(x, y, z)| {
        let inside = |i: usize, n: usize| i >= n / 4 && i < n - n / 4;
        if inside(x, nx) && inside(y, ny) && inside(z, nz) {
            4000.0
        } else if x > 0 && y > 0 && z > 0 {
            1000.0
        } else {
            0.0
        }
    })
}
