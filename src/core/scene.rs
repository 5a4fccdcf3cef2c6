//! Single-scene snow detection from rasters on disk
//!
//! Reads the configured bands, DEM and cloud mask, resamples them onto the
//! band grid by map coordinates, runs the classifier inside a bounded thread
//! pool and writes the products to `<output_dir>/LIS_PRODUCTS`.

use crate::config::{build_thread_pool, BandInput, SnowConfig};
use crate::core::classifier::{SceneBands, SnowClassification, SnowDetector};
use crate::core::reproject::{reproject_bilinear, reproject_nearest};
use crate::io::metadata::SceneMetadata;
use crate::io::raster::{set_cache_size, RasterReader, RasterWriter};
use crate::types::{GeoRaster, Label, Mask, RasterGrid, SnowError, SnowResult};
use std::path::{Path, PathBuf};

pub const PRODUCTS_DIR: &str = "LIS_PRODUCTS";
pub const SEB_FILE: &str = "LIS_SEB.TIF";
pub const SNOW_ALL_FILE: &str = "LIS_SNOW_ALL.TIF";
pub const HISTOGRAM_FILE: &str = "LIS_HISTO.TXT";
pub const METADATA_FILE: &str = "LIS_METADATA.XML";

/// Files written for a scene
#[derive(Debug, Clone)]
pub struct SceneOutputs {
    pub product_dir: PathBuf,
    pub seb: PathBuf,
    pub snow_all: PathBuf,
    pub histogram: PathBuf,
    pub metadata: PathBuf,
    pub zs: i32,
}

/// Runs snow detection on one scene described by a configuration
pub struct SceneProcessor {
    config: SnowConfig,
    detector: SnowDetector,
}

impl SceneProcessor {
    pub fn new(config: SnowConfig) -> SnowResult<Self> {
        config.validate()?;
        let detector = SnowDetector::from_config(&config)?;
        Ok(Self { config, detector })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> SnowResult<Self> {
        Self::new(SnowConfig::from_file(path)?)
    }

    pub fn config(&self) -> &SnowConfig {
        &self.config
    }

    /// Load, classify and write the scene
    pub fn run(&self) -> SnowResult<SceneOutputs> {
        set_cache_size(self.config.general.ram_budget)?;
        let pool = build_thread_pool(self.config.general.thread_count)?;
        pool.install(|| {
            let (bands, grid) = self.load_inputs()?;
            let classification = self.detector.detect(&bands)?;
            self.write_outputs(&classification, &grid)
        })
    }

    /// Read every input and resample it onto the processing grid
    pub fn load_inputs(&self) -> SnowResult<(SceneBands, RasterGrid)> {
        let inputs = &self.config.inputs;
        let nodata = self.config.general.nodata_value;

        let green = read_band(&inputs.green_band)?;
        let red = read_band(&inputs.red_band)?;
        let swir = read_band(&inputs.swir_band)?;
        let grid = self.target_grid(&[&green, &red, &swir])?;
        log::info!(
            "Processing grid: {}x{} at {} m",
            grid.rows,
            grid.cols,
            grid.geo_transform.resolution()
        );

        let band_nodata = nodata as f32;
        let green = reproject_bilinear(&green, &grid, Some(band_nodata), band_nodata)?;
        let red = reproject_bilinear(&red, &grid, Some(band_nodata), band_nodata)?;
        let swir = reproject_bilinear(&swir, &grid, Some(band_nodata), band_nodata)?;

        log::info!("Reading DEM from: {}", inputs.dem.display());
        let dem = RasterReader::read_band::<f32, _>(&inputs.dem, 1)?;
        let dem_nodata = dem.no_data.map(|v| v as f32);
        let mut dem = reproject_bilinear(&dem, &grid, dem_nodata, f32::NAN)?;
        if let Some(nd) = dem_nodata {
            dem.mapv_inplace(|z| if z == nd { f32::NAN } else { z });
        }

        log::info!("Reading cloud mask from: {}", inputs.cloud_mask.display());
        let cloud = RasterReader::read_band::<u16, _>(&inputs.cloud_mask, 1)?;
        let cloud_source = reproject_nearest(&cloud, &grid, 0)?;

        let slope_flag = match (&inputs.slope_mask, inputs.slope_threshold) {
            (Some(path), Some(threshold)) => {
                log::info!("Reading slope correction flags from: {}", path.display());
                let slope = RasterReader::read_band::<f32, _>(path, 1)?;
                let slope = reproject_nearest(&slope, &grid, 0.0)?;
                let flags: Mask = slope.mapv(|v| u8::from(v >= threshold));
                Some(flags)
            }
            _ => None,
        };

        let bands = SceneBands {
            green,
            red,
            swir,
            dem,
            cloud_source,
            slope_flag,
        };
        bands.check_grid()?;
        Ok((bands, grid))
    }

    /// Grid of the first band at the target resolution
    fn target_grid(&self, bands: &[&GeoRaster<f32>]) -> SnowResult<RasterGrid> {
        let reference = bands
            .first()
            .ok_or_else(|| SnowError::Config("No input band".to_string()))?;
        let reference_grid = reference.grid();
        if reference_grid.rows == 0 || reference_grid.cols == 0 {
            return Err(SnowError::InvalidFormat("Input band has an empty extent".to_string()));
        }

        let target = if self.config.general.target_resolution > 0.0 {
            self.config.general.target_resolution
        } else {
            bands
                .iter()
                .map(|b| b.geo_transform.resolution())
                .fold(f64::MIN, f64::max)
        };
        if !(target > 0.0) {
            return Err(SnowError::InvalidFormat(format!("Invalid band resolution {}", target)));
        }

        let scale = reference_grid.geo_transform.resolution() / target;
        let rows = ((reference_grid.rows as f64 * scale).round() as usize).max(1);
        let cols = ((reference_grid.cols as f64 * scale).round() as usize).max(1);
        Ok(RasterGrid {
            geo_transform: reference_grid.geo_transform.with_resolution(target),
            projection: reference_grid.projection,
            rows,
            cols,
        })
    }

    /// Write the product rasters, histogram and metadata
    pub fn write_outputs(&self, classification: &SnowClassification, grid: &RasterGrid) -> SnowResult<SceneOutputs> {
        let product_dir = self.config.general.output_dir.join(PRODUCTS_DIR);
        std::fs::create_dir_all(&product_dir)?;

        let outputs = SceneOutputs {
            seb: product_dir.join(SEB_FILE),
            snow_all: product_dir.join(SNOW_ALL_FILE),
            histogram: product_dir.join(HISTOGRAM_FILE),
            metadata: product_dir.join(METADATA_FILE),
            zs: classification.zs,
            product_dir,
        };

        RasterWriter::write(
            &outputs.seb,
            &classification.labels,
            grid,
            Some(Label::NoData.value() as f64),
        )?;
        RasterWriter::write(&outputs.snow_all, &classification.snow_all, grid, None)?;
        classification.histogram.write_text(&outputs.histogram)?;

        let metadata = SceneMetadata {
            product_id: self.product_id(),
            zs: classification.zs,
            snow_percent: classification.snow_percent(),
            cloud_percent: classification.cloud_percent(),
        };
        metadata.write(&outputs.metadata)?;

        log::info!("Scene products written to {}", outputs.product_dir.display());
        Ok(outputs)
    }

    /// Name of the input product, taken from the directory holding the green band
    pub fn product_id(&self) -> String {
        let green = &self.config.inputs.green_band.path;
        green
            .parent()
            .and_then(|p| p.file_name())
            .or_else(|| green.file_stem())
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

fn read_band(input: &BandInput) -> SnowResult<GeoRaster<f32>> {
    log::info!("Reading band {} from: {}", input.band_index, input.path.display());
    RasterReader::read_band::<f32, _>(&input.path, input.band_index)
}
