use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::errors::{MriSegError, Result};

/// Color map used when rasterizing label slices.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ColorMap {
    /// Perceptually uniform, dark purple to yellow.
    #[default]
    Viridis,
    /// Blue to red rainbow.
    Jet,
}

/// Largest accepted upload limit, 2 GiB, so the byte count fits any `usize`.
pub const MAX_BODY_LIMIT_MB: usize = 2047;

#[derive(Parser, Clone, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// ONNX graph of the 3D segmentation U-Net
    #[arg(short = 'm', long, env = "MRI_SEG_MODEL")]
    pub segmentation_model: PathBuf,

    /// ONNX graph of the 3D classification ResNet; /classify is disabled without it
    #[arg(short = 'c', long, env = "MRI_CLS_MODEL")]
    pub classification_model: Option<PathBuf>,

    #[arg(long, env = "MRI_HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(short, long, env = "MRI_PORT", default_value_t = 8000)]
    pub port: u16,

    /// Scratch directory for uploaded files
    #[arg(long, env = "MRI_UPLOAD_DIR", default_value = "uploads")]
    pub upload_dir: PathBuf,

    #[arg(long, default_value_t = 6)]
    pub num_classes: usize,

    /// Depth every classification input is padded or cropped to
    #[arg(long, default_value_t = 32)]
    pub fixed_slices: usize,

    /// Edge length of the cubic sliding window
    #[arg(long, default_value_t = 64)]
    pub roi_size: usize,

    #[arg(long, default_value_t = 1)]
    pub sw_batch_size: usize,

    #[arg(long, default_value_t = 0.25)]
    pub sw_overlap: f32,

    #[arg(long, value_enum, default_value_t = ColorMap::Viridis)]
    pub colormap: ColorMap,

    /// Longer side, in pixels, of each rendered slice
    #[arg(long, default_value_t = 512)]
    pub render_size: u32,

    #[arg(short, long, default_value_t = 0)]
    pub device_id: i32,

    #[arg(
        short, long, default_value_t = std::thread::available_parallelism().map_or(1, |n| n.get())
    )]
    pub num_threads: usize,

    #[arg(long, default_value_t = 512)]
    pub body_limit_mb: usize,
}

impl Config {
    /// Check everything that would otherwise only fail on the first request.
    pub fn validate(&self) -> Result<()> {
        check_file("segmentation_model", &self.segmentation_model)?;
        if let Some(path) = &self.classification_model {
            check_file("classification_model", path)?;
        }

        if !(2..=256).contains(&self.num_classes) {
            return Err(invalid("num_classes", "must be between 2 and 256"));
        }
        if self.fixed_slices == 0 {
            return Err(invalid("fixed_slices", "must be positive"));
        }
        if self.roi_size == 0 {
            return Err(invalid("roi_size", "must be positive"));
        }
        if self.sw_batch_size == 0 {
            return Err(invalid("sw_batch_size", "must be positive"));
        }
        if !(0.0..1.0).contains(&self.sw_overlap) {
            return Err(invalid("sw_overlap", "must be in [0, 1)"));
        }
        if self.render_size == 0 {
            return Err(invalid("render_size", "must be positive"));
        }
        if self.num_threads == 0 {
            return Err(invalid("num_threads", "must be positive"));
        }
        if !(1..=MAX_BODY_LIMIT_MB).contains(&self.body_limit_mb) {
            return Err(invalid(
                "body_limit_mb",
                &format!("must be between 1 and {}", MAX_BODY_LIMIT_MB),
            ));
        }

        self.socket_addr()?;
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| MriSegError::Configuration {
                message: format!("invalid listen address {}:{}: {}", self.host, self.port, e),
            })
    }

    pub const fn body_limit_bytes(&self) -> usize {
        self.body_limit_mb * 1024 * 1024
    }

    pub const fn roi(&self) -> [usize; 3] {
        [self.roi_size; 3]
    }

    /// Class indices reported alongside every segmentation.
    pub fn classes(&self) -> Vec<usize> {
        (0..self.num_classes).collect()
    }
}

fn check_file(field: &str, path: &std::path::Path) -> Result<()> {
    if path.is_file() {
        Ok(())
    } else {
        Err(invalid(field, &format!("{} does not exist", path.display())))
    }
}

fn invalid(field: &str, reason: &str) -> MriSegError {
    MriSegError::Validation {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn parse(args: &[&str]) -> Config {
        let mut argv = vec!["mri-seg-rs"];
        argv.extend_from_slice(args);
        Config::parse_from(argv)
    }

    #[test]
    fn test_defaults() {
        let config = parse(&["-m", "unet.onnx"]);
        assert_eq!(config.port, 8000);
        assert_eq!(config.num_classes, 6);
        assert_eq!(config.fixed_slices, 32);
        assert_eq!(config.roi(), [64, 64, 64]);
        assert_eq!(config.sw_batch_size, 1);
        assert_eq!(config.colormap, ColorMap::Viridis);
        assert!(config.classification_model.is_none());
        assert_eq!(config.classes(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_validate_missing_model() {
        let config = parse(&["-m", "/nonexistent/unet.onnx"]);
        assert!(matches!(
            config.validate(),
            Err(MriSegError::Validation { field, .. }) if field == "segmentation_model"
        ));
    }

    #[test]
    fn test_validate_ranges() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let model = temp_dir.path().join("unet.onnx");
        std::fs::write(&model, b"onnx")?;
        let model = model.to_string_lossy().into_owned();

        assert!(parse(&["-m", model.as_str()]).validate().is_ok());
        assert!(parse(&["-m", model.as_str(), "--sw-overlap", "1.0"]).validate().is_err());
        assert!(parse(&["-m", model.as_str(), "--num-classes", "1"]).validate().is_err());
        assert!(parse(&["-m", model.as_str(), "--host", "not a host"]).validate().is_err());
        Ok(())
    }

    #[test]
    fn test_validate_body_limit() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let model = temp_dir.path().join("unet.onnx");
        std::fs::write(&model, b"onnx")?;
        let model = model.to_string_lossy().into_owned();
        let with_limit = |limit: &str| parse(&["-m", model.as_str(), "--body-limit-mb", limit]);

        assert!(with_limit("1").validate().is_ok());
        assert!(with_limit("2047").validate().is_ok());
        assert!(matches!(
            with_limit("0").validate(),
            Err(MriSegError::Validation { field, .. }) if field == "body_limit_mb"
        ));
        assert!(with_limit("2048").validate().is_err());
        assert!(with_limit(&usize::MAX.to_string()).validate().is_err());
        Ok(())
    }
}
