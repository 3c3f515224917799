//! Array-level operations on 3D volumes.
//!
//! Everything here works on in-memory `ndarray` volumes and knows nothing about
//! file formats or models.

pub mod crop_foreground;
pub mod intensity;
pub mod orientation;
pub mod padding;
pub mod resample;

pub use crop_foreground::crop_foreground;
pub use intensity::{normalize_min_max, scale_intensity_range};
pub use orientation::{Affine, Orientation};
pub use padding::{fit_depth, DepthAdjustment};
pub use resample::resample_isotropic;
