//! Snow occurrence maps over a date range from snow products on disk

use crate::config::{build_thread_pool, MultitempConfig};
use crate::core::multitemp::{
    filter_products, select_densification, DatedMask, MultitempAggregator, Occurrence,
};
use crate::core::reproject::reproject_nearest;
use crate::io::dates::{daily_calendar, read_dates, write_dates};
use crate::io::product::{find_products, SnowProduct};
use crate::io::raster::{RasterReader, RasterWriter};
use crate::types::{GeoRaster, Label, RasterGrid, SnowError, SnowResult};
use chrono::NaiveDate;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub const INPUT_DATES_FILE: &str = "input_dates.txt";
pub const OUTPUT_DATES_FILE: &str = "output_dates.txt";

/// Files written by an annual map run
#[derive(Debug, Clone)]
pub struct AnnualMapOutputs {
    pub output_dir: PathBuf,
    pub snow_occurrence: PathBuf,
    pub cloud_occurrence: PathBuf,
    pub daily_snow_masks: PathBuf,
    pub input_dates: PathBuf,
    pub output_dates: PathBuf,
    pub snow_onset: PathBuf,
    pub snow_melt_out: PathBuf,
    pub observations: PathBuf,
    pub input_count: usize,
}

pub struct AnnualMapProcessor {
    config: MultitempConfig,
}

impl AnnualMapProcessor {
    pub fn new(config: MultitempConfig) -> SnowResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> SnowResult<Self> {
        Self::new(MultitempConfig::from_file(path)?)
    }

    pub fn run(&self) -> SnowResult<AnnualMapOutputs> {
        let pool = build_thread_pool(self.config.thread_count)?;
        pool.install(|| self.process())
    }

    fn process(&self) -> SnowResult<AnnualMapOutputs> {
        log::info!("Annual snow map {}", self.config.processing_id());
        let extract_dir = tempfile::tempdir()?;

        let primary = filter_products(
            find_products(&self.config.input_dir)?,
            &self.config.tile_id,
            self.config.date_start,
            self.config.date_stop,
            self.config.date_margin_days,
        );

        let mut reference: Option<RasterGrid> = None;
        let mut masks = Vec::new();
        for product in &primary {
            if let Some(mask) = self.load_mask(product, extract_dir.path(), &mut reference) {
                masks.push(mask);
            }
        }
        let reference = match reference {
            Some(grid) => grid,
            None => {
                let message = format!(
                    "No usable snow product of tile {} between {} and {}",
                    self.config.tile_id, self.config.date_start, self.config.date_stop
                );
                log::error!("{}", message);
                return Err(SnowError::EmptyTimeSeries(message));
            }
        };

        if let Some(densification) = &self.config.densification {
            let primary_dates: HashSet<NaiveDate> = masks.iter().map(|m| m.date).collect();
            let secondary = filter_products(
                find_products(&densification.input_dir)?,
                &densification.tile_id,
                self.config.date_start,
                self.config.date_stop,
                self.config.date_margin_days,
            );
            let mut reference = Some(reference.clone());
            for product in &select_densification(&primary_dates, secondary) {
                if let Some(mask) = self.load_mask(product, extract_dir.path(), &mut reference) {
                    masks.push(mask);
                }
            }
        }

        let output_dates = self.output_calendar()?;
        let aggregator = MultitempAggregator::new(output_dates, self.config.snow_season_min_days);
        let occurrence = aggregator.aggregate(masks)?;
        self.write_outputs(&occurrence, &reference)
    }

    /// Load a product's snow mask on the reference grid, None when it cannot be used
    fn load_mask(
        &self,
        product: &SnowProduct,
        extract_dir: &Path,
        reference: &mut Option<RasterGrid>,
    ) -> Option<DatedMask> {
        let loaded = product
            .snow_mask(extract_dir)
            .and_then(|path| RasterReader::read_band::<u8, _>(&path, 1));
        let raster: GeoRaster<u8> = match loaded {
            Ok(raster) => raster,
            Err(e) => {
                log::warn!("Skipping {}: {}", product.name.name, e);
                return None;
            }
        };

        let labels = match reference.as_ref() {
            None => {
                *reference = Some(raster.grid());
                raster.data
            }
            Some(grid) if raster.grid() == *grid => raster.data,
            Some(grid) => match reproject_nearest(&raster, grid, Label::NoData.value()) {
                Ok(labels) => labels,
                Err(e) => {
                    log::warn!("Skipping {}: reprojection failed: {}", product.name.name, e);
                    return None;
                }
            },
        };

        Some(DatedMask {
            date: product.acquisition_date(),
            labels,
            source: product.name.name.clone(),
        })
    }

    /// Dates of the gap-filled series: the configured file or every day of the range
    pub fn output_calendar(&self) -> SnowResult<Vec<NaiveDate>> {
        match &self.config.output_dates_file {
            Some(path) if path.exists() => {
                log::info!("Output dates read from {}", path.display());
                read_dates(path)
            }
            _ => Ok(daily_calendar(self.config.date_start, self.config.date_stop)),
        }
    }

    fn write_outputs(&self, occurrence: &Occurrence, grid: &RasterGrid) -> SnowResult<AnnualMapOutputs> {
        let id = self.config.processing_id();
        let output_dir = self.config.output_dir.join(&id);
        std::fs::create_dir_all(&output_dir)?;

        let outputs = AnnualMapOutputs {
            snow_occurrence: output_dir.join(format!("SNOW_OCCURENCE_{}.tif", id)),
            cloud_occurrence: output_dir.join(format!("CLOUD_OCCURENCE_{}.tif", id)),
            daily_snow_masks: output_dir.join(format!("DAILY_SNOW_MASKS_{}.tif", id)),
            input_dates: output_dir.join(INPUT_DATES_FILE),
            output_dates: output_dir.join(OUTPUT_DATES_FILE),
            snow_onset: output_dir.join(format!("SOD_{}.tif", id)),
            snow_melt_out: output_dir.join(format!("SMOD_{}.tif", id)),
            observations: output_dir.join(format!("NOBS_{}.tif", id)),
            input_count: occurrence.input_dates.len(),
            output_dir,
        };

        write_dates(&outputs.input_dates, &occurrence.input_dates)?;
        write_dates(&outputs.output_dates, &occurrence.output_dates)?;
        RasterWriter::write(&outputs.snow_occurrence, &occurrence.snow_occurrence, grid, None)?;
        RasterWriter::write(&outputs.cloud_occurrence, &occurrence.cloud_occurrence, grid, None)?;
        if occurrence.daily.stack.is_empty() {
            log::warn!("Empty output calendar, no daily snow masks written");
        } else {
            RasterWriter::write_stack(&outputs.daily_snow_masks, &occurrence.daily.stack, grid, None)?;
        }
        RasterWriter::write(&outputs.snow_onset, &occurrence.season.onset, grid, None)?;
        RasterWriter::write(&outputs.snow_melt_out, &occurrence.season.melt_out, grid, None)?;
        RasterWriter::write(&outputs.observations, &occurrence.observations, grid, None)?;

        log::info!(
            "Annual map from {} products written to {}",
            outputs.input_count,
            outputs.output_dir.display()
        );
        Ok(outputs)
    }
}
