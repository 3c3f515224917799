use ndarray::prelude::*;
use num_traits::Float;

/// Clips to `[a_min, a_max]` and maps that range linearly onto `[b_min, b_max]`.
pub fn scale_intensity_range<D: Dimension>(
    array: &mut Array<f32, D>,
    a_min: f32,
    a_max: f32,
    b_min: f32,
    b_max: f32,
) {
    let span = a_max - a_min;
    if span == 0.0 {
        array.fill(b_min);
        return;
    }

    let range = b_max - b_min;
    array.mapv_inplace(|v| (v.clamp(a_min, a_max) - a_min) / span * range + b_min);
}

/// `(x - min) / (max - min + eps)`. Constant arrays become all zeros.
pub fn normalize_min_max<A, D>(array: &mut Array<A, D>, eps: A)
where
    A: Float,
    D: Dimension,
{
    let Some((min, max)) = min_max(array.view()) else {
        return;
    };

    let denom = max - min + eps;
    array.mapv_inplace(|v| (v - min) / denom);
}

pub fn min_max<A, D>(array: ArrayView<A, D>) -> Option<(A, A)>
where
    A: Float,
    D: Dimension,
{
    let mut iter = array.iter();
    let first = *iter.next()?;
    Some(iter.fold((first, first), |(lo, hi), &v| (lo.min(v), hi.max(v))))
}
