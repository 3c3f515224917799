use ndarray::prelude::*;
use std::ops::Range;

/// Bounding box of the voxels with value `> 0`, one half-open range per axis.
pub fn foreground_bounds(volume: ArrayView3<f32>) -> Option<[Range<usize>; 3]> {
    let (d, h, w) = volume.dim();
    let mut bounds = [d, h, w, 0, 0, 0]; // [min0, min1, min2, max0, max1, max2]
    let mut found = false;

    for ((z, y, x), &v) in volume.indexed_iter() {
        if v > 0.0 {
            update_bounds(&mut bounds, z, y, x);
            found = true;
        }
    }

    found.then(|| {
        [
            bounds[0]..bounds[3] + 1,
            bounds[1]..bounds[4] + 1,
            bounds[2]..bounds[5] + 1,
        ]
    })
}

/// Crops to the foreground bounding box; `None` when nothing is foreground.
pub fn crop_foreground(volume: Array3<f32>) -> Option<Array3<f32>> {
    let [z, y, x] = foreground_bounds(volume.view())?;
    if z.len() == volume.len_of(Axis(0))
        && y.len() == volume.len_of(Axis(1))
        && x.len() == volume.len_of(Axis(2))
    {
        return Some(volume);
    }
    Some(volume.slice_move(s![z, y, x]).as_standard_layout().into_owned())
}

fn update_bounds(bounds: &mut [usize; 6], z: usize, y: usize, x: usize) {
    bounds[0] = bounds[0].min(z);
    bounds[1] = bounds[1].min(y);
    bounds[2] = bounds[2].min(x);
    bounds[3] = bounds[3].max(z);
    bounds[4] = bounds[4].max(y);
    bounds[5] = bounds[5].max(x);
}
