//! Reading uploaded files into normalized volumes.
//!
//! Segmentation inputs are NIfTI images that go through reorientation,
//! resampling, intensity scaling and foreground cropping. Classification
//! inputs are `.npy` arrays that are min-max normalized and fitted to a fixed
//! depth.

use std::fs::{self, File};
use std::io::{BufReader, Cursor, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use ndarray::{prelude::*, IxDyn, ShapeBuilder};
use nifti::volume::ndarray::IntoNdArray;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject, NiftiVolume};
use npyz::{DType, NpyFile, TypeChar};
use tracing::debug;

use crate::errors::{MriSegError, Result};
use crate::volumeops::{
    crop_foreground, fit_depth, normalize_min_max, orientation::voxel_spacing,
    resample_isotropic, scale_intensity_range, Affine, Orientation,
};

/// Intensity window mapped onto `[0, 1]` before segmentation.
pub const INTENSITY_RANGE: (f32, f32) = (0.0, 5000.0);
/// Isotropic voxel size, in mm, the segmentation network was trained on.
pub const TARGET_SPACING: f64 = 1.0;
/// Guards the min-max normalization against constant inputs.
pub const NORMALIZATION_EPSILON: f32 = 1e-5;

/// Normalized segmentation input in RAS voxel order.
pub type Volume = Array3<f32>;

/// Classification input shaped `(channel, depth, height, width)`.
pub type ClassificationInput = Array4<f32>;

/// A loaded image before canonicalization.
#[derive(Debug, Clone)]
pub struct VoxelGrid {
    pub data: Array3<f32>,
    pub affine: Affine,
}

/// Reads a NIfTI-1 file, gzip-compressed or not, keeping the first volume of
/// 4D series. Voxels are indexed `[x, y, z]`.
pub fn read_nifti(path: &Path) -> Result<VoxelGrid> {
    let bytes = fs::read(path).map_err(|e| MriSegError::FileSystem {
        path: path.to_path_buf(),
        operation: "read upload".to_string(),
        source: e,
    })?;

    let object = if is_gzip(&bytes) {
        InMemNiftiObject::from_reader(GzDecoder::new(Cursor::new(&bytes)))
    } else {
        InMemNiftiObject::from_reader(Cursor::new(&bytes))
    }
    .map_err(|e| loading_error(path, "NIfTI decode", e))?;

    let affine = header_affine(object.header());
    let volume = object.into_volume();
    let dims = volume.dim().to_vec();
    if dims.len() < 3 || dims[..3].contains(&0) {
        return Err(loading_error(
            path,
            "NIfTI dimension check",
            format!("expected a non-empty 3D or 4D image, got dimensions {:?}", dims),
        ));
    }

    // scl_slope/scl_inter are applied by the conversion
    let mut voxels = volume
        .into_ndarray::<f32>()
        .map_err(|e| loading_error(path, "NIfTI voxel read", e))?;
    while voxels.ndim() > 3 {
        voxels = voxels.index_axis_move(Axis(3), 0);
    }

    let mut data = voxels.into_dimensionality::<Ix3>()?;
    data.mapv_inplace(|v| if v.is_finite() { v } else { 0.0 });
    let data = data.as_standard_layout().into_owned();
    debug!(path = %path.display(), shape = ?data.dim(), "loaded NIfTI volume");

    Ok(VoxelGrid { data, affine })
}

/// Voxel-to-world affine, preferring sform, then qform, then the pixdim-only
/// base transform.
pub fn header_affine(header: &NiftiHeader) -> Affine {
    if header.sform_code > 0 {
        let rows = [header.srow_x, header.srow_y, header.srow_z];
        let mut affine = identity();
        for (dst, src) in affine.iter_mut().zip(rows.iter()) {
            for (d, s) in dst.iter_mut().zip(src.iter()) {
                *d = *s as f64;
            }
        }
        return affine;
    }

    let pixdim = header.pixdim.map(f64::from);
    if header.qform_code > 0 {
        let (b, c, d) = (
            header.quatern_b as f64,
            header.quatern_c as f64,
            header.quatern_d as f64,
        );
        let a = (1.0 - (b * b + c * c + d * d)).max(0.0).sqrt();
        let rotation = [
            [a * a + b * b - c * c - d * d, 2.0 * (b * c - a * d), 2.0 * (b * d + a * c)],
            [2.0 * (b * c + a * d), a * a + c * c - b * b - d * d, 2.0 * (c * d - a * b)],
            [2.0 * (b * d - a * c), 2.0 * (c * d + a * b), a * a + d * d - b * b - c * c],
        ];
        let qfac = if pixdim[0] < 0.0 { -1.0 } else { 1.0 };
        let zooms = [pixdim[1], pixdim[2], pixdim[3] * qfac];
        let offset = [
            header.quatern_x as f64,
            header.quatern_y as f64,
            header.quatern_z as f64,
        ];

        let mut affine = identity();
        for w in 0..3 {
            for v in 0..3 {
                affine[w][v] = rotation[w][v] * zooms[v];
            }
            affine[w][3] = offset[w];
        }
        return affine;
    }

    // No transform stored: radiological x flip, image centered on the origin.
    let mut affine = identity();
    let zooms = [-pixdim[1], pixdim[2], pixdim[3]];
    for v in 0..3 {
        let extent = header.dim[v + 1] as f64;
        affine[v][v] = zooms[v];
        affine[v][3] = -zooms[v] * (extent - 1.0) / 2.0;
    }
    affine
}

/// Reorient to RAS, resample to 1 mm, clip and rescale intensities, crop to
/// the foreground. The order is fixed.
pub fn preprocess_segmentation(grid: VoxelGrid) -> Result<Volume> {
    let orientation = Orientation::from_affine(&grid.affine)?;
    let spacing = orientation.apply_spacing(voxel_spacing(&grid.affine));
    let volume = orientation.apply(grid.data);
    debug!(?orientation, ?spacing, shape = ?volume.dim(), "reoriented to RAS");

    let mut volume = resample_isotropic(&volume, spacing, TARGET_SPACING)?;
    debug!(shape = ?volume.dim(), "resampled to isotropic spacing");

    let (a_min, a_max) = INTENSITY_RANGE;
    scale_intensity_range(&mut volume, a_min, a_max, 0.0, 1.0);

    let volume = crop_foreground(volume).ok_or_else(|| {
        MriSegError::preprocessing("foreground crop", "volume has no foreground voxels")
    })?;
    debug!(shape = ?volume.dim(), "cropped to foreground");
    Ok(volume)
}

pub fn load_segmentation_volume(path: &Path) -> Result<Volume> {
    preprocess_segmentation(read_nifti(path)?)
}

/// Reads a 3D `.npy` array as `f32`. Leading singleton axes beyond the third
/// are dropped, so `(1, D, H, W)` is accepted too.
pub fn read_npy(path: &Path) -> Result<Array3<f32>> {
    let file = File::open(path).map_err(|e| MriSegError::FileSystem {
        path: path.to_path_buf(),
        operation: "open upload".to_string(),
        source: e,
    })?;
    let npy = NpyFile::new(BufReader::new(file)).map_err(|e| loading_error(path, "npy header parse", e))?;

    let mut shape: Vec<usize> = npy.shape().iter().map(|&d| d as usize).collect();
    let fortran = npy.order() == npyz::Order::Fortran;
    let data = read_npy_values(npy).map_err(|e| loading_error(path, "npy data read", e))?;

    while shape.len() > 3 && shape[0] == 1 {
        shape.remove(0);
    }
    if shape.len() != 3 || shape.contains(&0) {
        return Err(loading_error(
            path,
            "npy dimension check",
            format!("expected a non-empty (depth, height, width) array, got shape {:?}", shape),
        ));
    }

    let array = ArrayD::from_shape_vec(IxDyn(&shape).set_f(fortran), data)?
        .into_dimensionality::<Ix3>()?
        .as_standard_layout()
        .into_owned();
    debug!(path = %path.display(), shape = ?array.dim(), "loaded npy array");
    Ok(array)
}

fn read_npy_values<R: Read>(npy: NpyFile<R>) -> std::result::Result<Vec<f32>, String> {
    let DType::Plain(type_str) = npy.dtype() else {
        return Err("structured dtypes are not supported".to_string());
    };

    let values = match (type_str.type_char(), type_str.size_field()) {
        (TypeChar::Float, 4) => npy.into_vec::<f32>().map_err(|e| e.to_string())?,
        (TypeChar::Float, 8) => cast(npy.into_vec::<f64>())?,
        (TypeChar::Int, 1) => cast(npy.into_vec::<i8>())?,
        (TypeChar::Int, 2) => cast(npy.into_vec::<i16>())?,
        (TypeChar::Int, 4) => cast(npy.into_vec::<i32>())?,
        (TypeChar::Int, 8) => cast(npy.into_vec::<i64>())?,
        (TypeChar::Uint, 1) => cast(npy.into_vec::<u8>())?,
        (TypeChar::Uint, 2) => cast(npy.into_vec::<u16>())?,
        (TypeChar::Uint, 4) => cast(npy.into_vec::<u32>())?,
        (TypeChar::Uint, 8) => cast(npy.into_vec::<u64>())?,
        _ => return Err(format!("unsupported dtype {}", type_str)),
    };
    Ok(values)
}

fn cast<T: num_traits::AsPrimitive<f32>>(
    values: std::io::Result<Vec<T>>,
) -> std::result::Result<Vec<f32>, String> {
    values
        .map(|v| v.into_iter().map(|x| x.as_()).collect())
        .map_err(|e| e.to_string())
}

/// Min-max normalize, fit the depth axis to `fixed_slices`, prepend a channel axis.
///
/// Height and width are not checked; a model that needs specific spatial
/// dimensions rejects the input at inference time.
pub fn preprocess_classification(mut array: Array3<f32>, fixed_slices: usize) -> ClassificationInput {
    normalize_min_max(&mut array, NORMALIZATION_EPSILON);
    fit_depth(array.view(), fixed_slices).insert_axis(Axis(0))
}

pub fn load_classification_input(path: &Path, fixed_slices: usize) -> Result<ClassificationInput> {
    Ok(preprocess_classification(read_npy(path)?, fixed_slices))
}

fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0x1f && bytes[1] == 0x8b
}

fn identity() -> Affine {
    [
        [1.0, 0.0, 0.0, 0.0],
        [0.0, 1.0, 0.0, 0.0],
        [0.0, 0.0, 1.0, 0.0],
        [0.0, 0.0, 0.0, 1.0],
    ]
}

fn loading_error<E: std::fmt::Display>(path: &Path, operation: &str, err: E) -> MriSegError {
    MriSegError::VolumeLoading {
        path: path.display().to_string(),
        operation: operation.to_string(),
        source: err.to_string().into(),
    }
}
