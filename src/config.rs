//! Processing configuration
//!
//! Scene detection is driven by a JSON document with `general`, `cloud`, `snow`
//! and `inputs` sections. Thresholds without a sensible default are required and
//! a missing one aborts the run before any raster is read.

use crate::types::{SnowError, SnowResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Encoding convention of the supplied cloud mask
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CloudMaskMode {
    /// Bit-coded mask, any non-zero value is cloud (MAJA / Theia)
    #[serde(alias = "bitmask")]
    Maja,
    /// Bit-coded mask where the all-cloud layer is selected by its own code
    Lasrc,
    /// Scene classification labels (Sen2Cor SCL)
    Sen2cor,
}

impl Default for CloudMaskMode {
    fn default() -> Self {
        CloudMaskMode::Maja
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    pub output_dir: PathBuf,
    #[serde(default = "default_nodata")]
    pub nodata_value: f64,
    /// Memory budget in MB, forwarded to GDAL's block cache
    #[serde(default = "default_ram")]
    pub ram_budget: usize,
    /// Worker threads for pixel operations, None lets rayon decide
    #[serde(default)]
    pub thread_count: Option<usize>,
    /// Output resolution in metres, -1 keeps the coarsest input resolution
    #[serde(default = "default_target_resolution")]
    pub target_resolution: f64,
    /// Reflectance scaling applied to the red thresholds (10 for Sentinel-2 L2A)
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    #[serde(default)]
    pub mode: CloudMaskMode,
    /// Coarsening factor of the red band pyramid used for dark cloud detection
    #[serde(default = "default_resampling_factor")]
    pub resampling_factor: usize,
    pub shadow_in_code: u16,
    pub shadow_out_code: u16,
    pub all_cloud_code: u16,
    pub high_cloud_code: u16,
    pub dark_cloud_red_threshold: f32,
    pub back_to_cloud_red_threshold: f32,
    #[serde(default)]
    pub strict_cloud_mode: bool,
    #[serde(default)]
    pub disambiguate_cloud_surrounded_snow: bool,
    #[serde(default = "default_dilation_radius")]
    pub dilation_radius: usize,
    #[serde(default = "default_disambiguation_threshold")]
    pub disambiguation_threshold: f64,
    #[serde(default = "default_min_component_area")]
    pub min_component_area: usize,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            mode: CloudMaskMode::Maja,
            resampling_factor: default_resampling_factor(),
            shadow_in_code: 32,
            shadow_out_code: 64,
            all_cloud_code: 1,
            high_cloud_code: 128,
            dark_cloud_red_threshold: 300.0,
            back_to_cloud_red_threshold: 100.0,
            strict_cloud_mode: false,
            disambiguate_cloud_surrounded_snow: false,
            dilation_radius: default_dilation_radius(),
            disambiguation_threshold: default_disambiguation_threshold(),
            min_component_area: default_min_component_area(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnowParams {
    /// Elevation bin width in metres
    pub dz: f32,
    pub ndsi_pass1: f32,
    pub red_pass1: f32,
    pub ndsi_pass2: f32,
    pub red_pass2: f32,
    /// Minimal fraction of pass 1 snow pixels for pass 2 to run
    pub min_snow_fraction_in_pass1: f64,
    /// Minimal snow fraction of an elevation bin
    pub fsnow_lim: f64,
    /// Minimal clear fraction of an elevation bin
    #[serde(default = "default_fclear_lim")]
    pub min_clear_fraction_per_bin: f64,
}

impl Default for SnowParams {
    fn default() -> Self {
        Self {
            dz: 100.0,
            ndsi_pass1: 0.4,
            red_pass1: 200.0,
            ndsi_pass2: 0.15,
            red_pass2: 40.0,
            min_snow_fraction_in_pass1: 0.001,
            fsnow_lim: 0.1,
            min_clear_fraction_per_bin: default_fclear_lim(),
        }
    }
}

/// One band taken from a (possibly multi-band) raster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandInput {
    pub path: PathBuf,
    #[serde(default = "default_band_index")]
    pub band_index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputsConfig {
    pub green_band: BandInput,
    pub red_band: BandInput,
    pub swir_band: BandInput,
    pub dem: PathBuf,
    pub cloud_mask: PathBuf,
    /// Optional slope-correction quality raster and its flag threshold
    #[serde(default)]
    pub slope_mask: Option<PathBuf>,
    #[serde(default)]
    pub slope_threshold: Option<f32>,
}

/// Complete configuration of a scene detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnowConfig {
    pub general: GeneralConfig,
    pub cloud: CloudConfig,
    pub snow: SnowParams,
    pub inputs: InputsConfig,
}

impl SnowConfig {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> SnowResult<Self> {
        let config: SnowConfig = serde_json::from_str(json)
            .map_err(|e| SnowError::Config(format!("Invalid snow configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> SnowResult<Self> {
        log::info!("Loading configuration from: {}", path.as_ref().display());
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> SnowResult<()> {
        if self.general.nodata_value.is_nan() {
            return Err(SnowError::Config("general.nodata_value must be a number".to_string()));
        }
        if self.general.target_resolution != -1.0 && self.general.target_resolution <= 0.0 {
            return Err(SnowError::Config(format!(
                "general.target_resolution must be positive or -1, got {}",
                self.general.target_resolution
            )));
        }
        if self.general.multiplier <= 0.0 {
            return Err(SnowError::Config("general.multiplier must be positive".to_string()));
        }
        if self.general.thread_count == Some(0) {
            return Err(SnowError::Config("general.thread_count must be at least 1".to_string()));
        }
        self.cloud.validate()?;
        self.snow.validate()?;
        self.inputs.validate()?;
        Ok(())
    }
}

impl CloudConfig {
    pub fn validate(&self) -> SnowResult<()> {
        if self.mode != CloudMaskMode::Sen2cor {
            let codes = [
                ("shadow_in_code", self.shadow_in_code),
                ("shadow_out_code", self.shadow_out_code),
                ("high_cloud_code", self.high_cloud_code),
            ];
            for (name, code) in codes {
                if code == 0 {
                    return Err(SnowError::Config(format!("cloud.{} must be non-zero", name)));
                }
            }
            if self.mode == CloudMaskMode::Lasrc && self.all_cloud_code == 0 {
                return Err(SnowError::Config(
                    "cloud.all_cloud_code must be non-zero in lasrc mode".to_string(),
                ));
            }
        }
        if self.resampling_factor == 0 {
            return Err(SnowError::Config("cloud.resampling_factor must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.disambiguation_threshold) {
            return Err(SnowError::Config(format!(
                "cloud.disambiguation_threshold must lie in [0, 1], got {}",
                self.disambiguation_threshold
            )));
        }
        if !self.dark_cloud_red_threshold.is_finite() || !self.back_to_cloud_red_threshold.is_finite() {
            return Err(SnowError::Config("cloud red thresholds must be finite".to_string()));
        }
        Ok(())
    }
}

impl SnowParams {
    pub fn validate(&self) -> SnowResult<()> {
        if !(self.dz > 0.0) {
            return Err(SnowError::Config(format!("snow.dz must be positive, got {}", self.dz)));
        }
        for (name, value) in [("ndsi_pass1", self.ndsi_pass1), ("ndsi_pass2", self.ndsi_pass2)] {
            if !(-1.0..=1.0).contains(&value) {
                return Err(SnowError::Config(format!(
                    "snow.{} must lie in [-1, 1], got {}",
                    name, value
                )));
            }
        }
        for (name, value) in [
            ("min_snow_fraction_in_pass1", self.min_snow_fraction_in_pass1),
            ("fsnow_lim", self.fsnow_lim),
            ("min_clear_fraction_per_bin", self.min_clear_fraction_per_bin),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SnowError::Config(format!(
                    "snow.{} must lie in [0, 1], got {}",
                    name, value
                )));
            }
        }
        if !self.red_pass1.is_finite() || !self.red_pass2.is_finite() {
            return Err(SnowError::Config("snow red thresholds must be finite".to_string()));
        }
        Ok(())
    }
}

impl InputsConfig {
    pub fn validate(&self) -> SnowResult<()> {
        for (name, band) in [
            ("green_band", &self.green_band),
            ("red_band", &self.red_band),
            ("swir_band", &self.swir_band),
        ] {
            if band.path.as_os_str().is_empty() {
                return Err(SnowError::Config(format!("inputs.{}.path is empty", name)));
            }
            if band.band_index == 0 {
                return Err(SnowError::Config(format!(
                    "inputs.{}.band_index is 1-based, got 0",
                    name
                )));
            }
        }
        if self.dem.as_os_str().is_empty() {
            return Err(SnowError::Config("inputs.dem is empty".to_string()));
        }
        if self.cloud_mask.as_os_str().is_empty() {
            return Err(SnowError::Config("inputs.cloud_mask is empty".to_string()));
        }
        if self.slope_mask.is_some() != self.slope_threshold.is_some() {
            return Err(SnowError::Config(
                "inputs.slope_mask and inputs.slope_threshold must be given together".to_string(),
            ));
        }
        Ok(())
    }
}

/// Secondary sensor used to densify the primary time series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DensificationConfig {
    pub tile_id: String,
    pub input_dir: PathBuf,
}

/// Configuration of a multitemporal snow occurrence run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultitempConfig {
    pub tile_id: String,
    pub date_start: NaiveDate,
    pub date_stop: NaiveDate,
    #[serde(default)]
    pub date_margin_days: i64,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Existing list of output dates (one `YYYYMMDD` per line); daily calendar otherwise
    #[serde(default)]
    pub output_dates_file: Option<PathBuf>,
    #[serde(default)]
    pub densification: Option<DensificationConfig>,
    #[serde(default)]
    pub thread_count: Option<usize>,
    /// Pixels need more snow days than this to get snow onset/melt-out dates
    #[serde(default = "default_snow_season_min_days")]
    pub snow_season_min_days: usize,
}

impl MultitempConfig {
    pub fn from_json_str(json: &str) -> SnowResult<Self> {
        let config: MultitempConfig = serde_json::from_str(json)
            .map_err(|e| SnowError::Config(format!("Invalid multitemporal configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> SnowResult<Self> {
        log::info!("Loading multitemporal configuration from: {}", path.as_ref().display());
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&content)
    }

    pub fn validate(&self) -> SnowResult<()> {
        if self.tile_id.trim().is_empty() {
            return Err(SnowError::Config("tile_id is empty".to_string()));
        }
        if self.date_stop < self.date_start {
            return Err(SnowError::Config(format!(
                "date_stop {} precedes date_start {}",
                self.date_stop, self.date_start
            )));
        }
        if self.date_margin_days < 0 {
            return Err(SnowError::Config("date_margin_days must not be negative".to_string()));
        }
        if self.thread_count == Some(0) {
            return Err(SnowError::Config("thread_count must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Identifier used to name the outputs: `<tile>_<start>_<stop>`
    pub fn processing_id(&self) -> String {
        format!(
            "{}_{}_{}",
            self.tile_id,
            self.date_start.format("%Y%m%d"),
            self.date_stop.format("%Y%m%d")
        )
    }
}

/// Builds the rayon pool that bounds pixel-level parallelism
pub fn build_thread_pool(thread_count: Option<usize>) -> SnowResult<rayon::ThreadPool> {
    let mut builder = rayon::ThreadPoolBuilder::new();
    if let Some(n) = thread_count {
        builder = builder.num_threads(n);
    }
    builder
        .build()
        .map_err(|e| SnowError::Config(format!("Failed to build thread pool: {}", e)))
}

fn default_nodata() -> f64 {
    -10000.0
}

fn default_ram() -> usize {
    512
}

fn default_target_resolution() -> f64 {
    -1.0
}

fn default_multiplier() -> f64 {
    1.0
}

fn default_resampling_factor() -> usize {
    12
}

fn default_dilation_radius() -> usize {
    5
}

fn default_disambiguation_threshold() -> f64 {
    0.85
}

fn default_min_component_area() -> usize {
    25000
}

fn default_fclear_lim() -> f64 {
    0.1
}

fn default_band_index() -> usize {
    1
}

fn default_snow_season_min_days() -> usize {
    10
}
