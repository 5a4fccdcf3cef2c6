use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

/// Single-band reflectance raster (rows x cols)
pub type BandImage = Array2<f32>;

/// Elevation raster on the same grid as the bands
pub type Elevation = Array2<f32>;

/// Binary layer, every pixel is 0 or 1
pub type Mask = Array2<u8>;

/// Classified raster holding one [`Label`] value per pixel
pub type LabelImage = Array2<u8>;

/// Per-date binary masks stacked along the first axis (date x rows x cols)
pub type MaskStack = Array3<u8>;

/// Per-pixel occurrence counts
pub type OccurrenceImage = Array2<u16>;

/// Labels of the final snow product
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Label {
    NoSnow = 0,
    Snow = 100,
    Cloud = 205,
    NoData = 254,
}

impl Label {
    pub const ALL: [Label; 4] = [Label::NoSnow, Label::Snow, Label::Cloud, Label::NoData];

    /// Raw pixel value written in the product
    pub const fn value(self) -> u8 {
        self as u8
    }

    pub fn from_value(value: u8) -> Option<Self> {
        match value {
            0 => Some(Label::NoSnow),
            100 => Some(Label::Snow),
            205 => Some(Label::Cloud),
            254 => Some(Label::NoData),
            _ => None,
        }
    }

    /// Cloud and no-data pixels carry no usable ground observation
    pub fn is_unusable(value: u8) -> bool {
        value == Label::Cloud.value() || value == Label::NoData.value()
    }
}

impl std::fmt::Display for Label {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Label::NoSnow => write!(f, "no_snow"),
            Label::Snow => write!(f, "snow"),
            Label::Cloud => write!(f, "cloud"),
            Label::NoData => write!(f, "no_data"),
        }
    }
}

/// Affine georeferencing in GDAL order
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Ground resolution along x (absolute pixel width)
    pub fn resolution(&self) -> f64 {
        self.pixel_width.abs()
    }

    /// Same origin with a new pixel size, keeping the sign of each axis
    pub fn with_resolution(&self, resolution: f64) -> Self {
        Self {
            pixel_width: resolution.copysign(self.pixel_width),
            pixel_height: resolution.copysign(self.pixel_height),
            ..*self
        }
    }

    /// Map coordinates of the centre of pixel (row, col)
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let c = col as f64 + 0.5;
        let r = row as f64 + 0.5;
        (
            self.top_left_x + c * self.pixel_width + r * self.rotation_x,
            self.top_left_y + c * self.rotation_y + r * self.pixel_height,
        )
    }

    /// Fractional (row, col) of a map coordinate, None for a degenerate transform
    pub fn geo_to_pixel(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let det = self.pixel_width * self.pixel_height - self.rotation_x * self.rotation_y;
        if det.abs() < f64::EPSILON {
            return None;
        }
        let dx = x - self.top_left_x;
        let dy = y - self.top_left_y;
        let col = (dx * self.pixel_height - dy * self.rotation_x) / det;
        let row = (dy * self.pixel_width - dx * self.rotation_y) / det;
        Some((row, col))
    }
}

/// Raster grid description: georeferencing, projection and size
#[derive(Debug, Clone, PartialEq)]
pub struct RasterGrid {
    pub geo_transform: GeoTransform,
    pub projection: String,
    pub rows: usize,
    pub cols: usize,
}

impl RasterGrid {
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }
}

/// In-memory raster with its grid
#[derive(Debug, Clone)]
pub struct GeoRaster<T> {
    pub data: Array2<T>,
    pub geo_transform: GeoTransform,
    pub projection: String,
    pub no_data: Option<f64>,
}

impl<T> GeoRaster<T> {
    pub fn grid(&self) -> RasterGrid {
        let (rows, cols) = self.data.dim();
        RasterGrid {
            geo_transform: self.geo_transform,
            projection: self.projection.clone(),
            rows,
            cols,
        }
    }
}

/// Error types for snow processing
#[derive(Debug, thiserror::Error)]
pub enum SnowError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("Grid mismatch: {0}")]
    GridMismatch(String),

    #[error("Empty time series: {0}")]
    EmptyTimeSeries(String),

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for snow processing
pub type SnowResult<T> = Result<T, SnowError>;

/// Fails with a grid mismatch when two rasters do not share dimensions
pub fn ensure_same_shape(
    what: &str,
    expected: (usize, usize),
    actual: (usize, usize),
) -> SnowResult<()> {
    if expected != actual {
        return Err(SnowError::GridMismatch(format!(
            "{} is {}x{} but the scene grid is {}x{}",
            what, actual.0, actual.1, expected.0, expected.1
        )));
    }
    Ok(())
}
