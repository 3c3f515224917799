//! Mid-volume slice extraction and color-mapped PNG rendering.

use std::io::Cursor;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{imageops, imageops::FilterType, ImageFormat, Rgb, RgbImage};
use ndarray::prelude::*;
use serde::Serialize;

use crate::config::ColorMap;
use crate::errors::Result;
use crate::inference::LabelVolume;

/// Index of the middle plane along every axis of `shape`.
pub const fn mid_indices(shape: (usize, usize, usize)) -> (usize, usize, usize) {
    (shape.0 / 2, shape.1 / 2, shape.2 / 2)
}

/// The three orthogonal planes through the middle of a label volume.
#[derive(Debug, Clone, PartialEq)]
pub struct OrthogonalSlices {
    /// Last axis fixed: `(D, H)`.
    pub axial: Array2<u8>,
    /// Middle axis fixed: `(D, W)`.
    pub coronal: Array2<u8>,
    /// First axis fixed: `(H, W)`.
    pub sagittal: Array2<u8>,
}

impl OrthogonalSlices {
    pub fn from_labels(labels: &LabelVolume) -> Self {
        let (d, h, w) = mid_indices(labels.dim());
        Self {
            axial: labels.slice(s![.., .., w]).to_owned(),
            coronal: labels.slice(s![.., h, ..]).to_owned(),
            sagittal: labels.slice(s![d, .., ..]).to_owned(),
        }
    }
}

/// Rendered slices as `data:image/png;base64,` URIs.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct SliceImages {
    pub axial: String,
    pub coronal: String,
    pub sagittal: String,
}

#[derive(Debug, Clone, Copy)]
pub struct SliceRenderer {
    pub colormap: ColorMap,
    /// Longer side of the output image.
    pub size: u32,
}

impl SliceRenderer {
    pub const fn new(colormap: ColorMap, size: u32) -> Self {
        Self { colormap, size }
    }

    pub fn render_all(&self, labels: &LabelVolume) -> Result<SliceImages> {
        let slices = OrthogonalSlices::from_labels(labels);
        Ok(SliceImages {
            axial: self.data_uri(slices.axial.view())?,
            coronal: self.data_uri(slices.coronal.view())?,
            sagittal: self.data_uri(slices.sagittal.view())?,
        })
    }

    pub fn data_uri(&self, slice: ArrayView2<u8>) -> Result<String> {
        Ok(format!("data:image/png;base64,{}", STANDARD.encode(self.png(slice)?)))
    }

    pub fn png(&self, slice: ArrayView2<u8>) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        self.rasterize(slice)
            .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
        Ok(buffer)
    }

    /// Draws `slice` transposed with its origin at the bottom-left: pixel
    /// `(x, y)` shows `slice[[x, rows - 1 - y]]`. Values are stretched over
    /// the slice's own range before coloring.
    pub fn rasterize(&self, slice: ArrayView2<u8>) -> RgbImage {
        let (cols, rows) = slice.dim();
        let (lo, hi) = slice
            .iter()
            .fold((u8::MAX, u8::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
        let span = hi.saturating_sub(lo) as f32;

        let raster = RgbImage::from_fn(cols as u32, rows as u32, |x, y| {
            let value = slice[[x as usize, rows - 1 - y as usize]];
            let t = if span > 0.0 {
                (value - lo) as f32 / span
            } else {
                0.0
            };
            self.colormap.color(t)
        });

        let (width, height) = fit_longer_side(cols as u32, rows as u32, self.size);
        if (width, height) == raster.dimensions() {
            raster
        } else {
            imageops::resize(&raster, width, height, FilterType::Nearest)
        }
    }
}

fn fit_longer_side(width: u32, height: u32, size: u32) -> (u32, u32) {
    let longer = width.max(height).max(1) as f64;
    let scale = size as f64 / longer;
    (
        ((width as f64 * scale).round() as u32).max(1),
        ((height as f64 * scale).round() as u32).max(1),
    )
}

impl ColorMap {
    /// Color for `t` in `[0, 1]`.
    pub fn color(self, t: f32) -> Rgb<u8> {
        let t = t.clamp(0.0, 1.0);
        match self {
            ColorMap::Viridis => interpolate(&VIRIDIS, t),
            ColorMap::Jet => {
                let channel = |offset: f32| {
                    let v = (1.5 - (4.0 * t - offset).abs()).clamp(0.0, 1.0);
                    (v * 255.0).round() as u8
                };
                Rgb([channel(3.0), channel(2.0), channel(1.0)])
            }
        }
    }
}

const VIRIDIS: [[u8; 3]; 9] = [
    [68, 1, 84],
    [72, 40, 120],
    [62, 73, 137],
    [49, 104, 142],
    [38, 130, 142],
    [31, 158, 137],
    [53, 183, 121],
    [110, 206, 88],
    [253, 231, 37],
];

fn interpolate(stops: &[[u8; 3]], t: f32) -> Rgb<u8> {
    let position = t * (stops.len() - 1) as f32;
    let lower = (position.floor() as usize).min(stops.len() - 1);
    let upper = (lower + 1).min(stops.len() - 1);
    let frac = position - lower as f32;

    let mix = |c: usize| {
        let a = stops[lower][c] as f32;
        let b = stops[upper][c] as f32;
        (a + (b - a) * frac).round() as u8
    };
    Rgb([mix(0), mix(1), mix(2)])
}
