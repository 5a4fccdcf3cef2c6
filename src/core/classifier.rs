//! Multi-pass snow and cloud classification of a single scene
//!
//! Pass 0 refines the cloud mask, pass 1 applies conservative NDSI and red
//! thresholds, pass 1.5 optionally rejects cloud-surrounded snow, pass 2
//! relaxes the thresholds above the snow line and pass 3 merges both snow
//! masks. Every pass works on in-memory buffers produced by the previous one.

use crate::config::{CloudConfig, SnowConfig, SnowParams};
use crate::core::cloud_layers::{CloudLayerResolver, CloudLayers};
use crate::core::disambiguation::{DisambiguationParams, DisambiguationReport, Disambiguator};
use crate::core::raster_ops::{count_nonzero, percent_of};
use crate::core::snow_line::{
    ElevationHistogram, SnowLineEstimator, SnowLineParams, UNDETERMINED_ZS,
};
use crate::types::{
    ensure_same_shape, BandImage, Elevation, Label, LabelImage, Mask, SnowError, SnowResult,
};
use ndarray::{Array2, Zip};

/// Bits of the pass summary raster
pub mod snow_all_bits {
    pub const PASS1: u8 = 1;
    pub const PASS2: u8 = 1 << 1;
    pub const CLOUD_PASS1: u8 = 1 << 2;
    pub const REFINED_CLOUD: u8 = 1 << 3;
    pub const ALL_CLOUD: u8 = 1 << 4;
    pub const BAD_SLOPE: u8 = 1 << 5;
}

/// Co-registered inputs of one scene
#[derive(Debug, Clone)]
pub struct SceneBands {
    pub green: BandImage,
    pub red: BandImage,
    pub swir: BandImage,
    pub dem: Elevation,
    pub cloud_source: Array2<u16>,
    /// Pixels whose slope correction is unreliable
    pub slope_flag: Option<Mask>,
}

impl SceneBands {
    pub fn dim(&self) -> (usize, usize) {
        self.green.dim()
    }

    /// Every raster must share the green band's grid
    pub fn check_grid(&self) -> SnowResult<()> {
        let dim = self.dim();
        if dim.0 == 0 || dim.1 == 0 {
            return Err(SnowError::InvalidFormat("Scene has an empty extent".to_string()));
        }
        ensure_same_shape("Red band", dim, self.red.dim())?;
        ensure_same_shape("SWIR band", dim, self.swir.dim())?;
        ensure_same_shape("DEM", dim, self.dem.dim())?;
        ensure_same_shape("Cloud mask", dim, self.cloud_source.dim())?;
        if let Some(slope) = &self.slope_flag {
            ensure_same_shape("Slope flag", dim, slope.dim())?;
        }
        Ok(())
    }
}

/// Outputs of pass 0
#[derive(Debug, Clone)]
pub struct Pass0 {
    pub cloud: CloudLayers,
    pub nodata: Mask,
}

/// Outputs of pass 2
#[derive(Debug, Clone)]
pub struct Pass2Outcome {
    pub zs: i32,
    pub histogram: ElevationHistogram,
    pub pass2: Mask,
    /// pass 3 when pass 2 ran, pass 1 otherwise
    pub snow: Mask,
    pub snow_fraction_pass1: f64,
}

impl Pass2Outcome {
    pub fn ran(&self) -> bool {
        self.zs != UNDETERMINED_ZS
    }
}

/// Every intermediate and final product of a scene
#[derive(Debug, Clone)]
pub struct SnowClassification {
    pub labels: LabelImage,
    pub zs: i32,
    pub histogram: ElevationHistogram,
    pub ndsi: BandImage,
    pub pass1: Mask,
    pub pass2: Mask,
    pub pass3: Mask,
    pub cloud_pass1: Mask,
    pub cloud: CloudLayers,
    pub nodata: Mask,
    pub snow_all: Mask,
    pub disambiguation: Option<DisambiguationReport>,
}

impl SnowClassification {
    /// Snow pixels over the pixels with data, in percent
    pub fn snow_percent(&self) -> f64 {
        percent_of(&self.labels, Label::Snow.value(), Some(Label::NoData.value()))
    }

    /// Cloud pixels over the pixels with data, in percent
    pub fn cloud_percent(&self) -> f64 {
        percent_of(&self.labels, Label::Cloud.value(), Some(Label::NoData.value()))
    }
}

/// Scene classifier with thresholds in the reflectance units of the bands
pub struct SnowDetector {
    cloud: CloudConfig,
    snow: SnowParams,
    nodata_value: f32,
    disambiguation: Option<DisambiguationParams>,
    snow_line: SnowLineParams,
}

impl SnowDetector {
    /// Thresholds are taken as given, see [`SnowDetector::from_config`] for scaling
    pub fn new(cloud: CloudConfig, snow: SnowParams, nodata_value: f64) -> SnowResult<Self> {
        cloud.validate()?;
        snow.validate()?;
        let disambiguation = cloud
            .disambiguate_cloud_surrounded_snow
            .then(|| DisambiguationParams::from_cloud_config(&cloud));
        let snow_line = SnowLineParams::from_snow_params(&snow);
        Ok(Self {
            cloud,
            snow,
            nodata_value: nodata_value as f32,
            disambiguation,
            snow_line,
        })
    }

    /// Build from a full configuration, scaling red thresholds by the multiplier
    pub fn from_config(config: &SnowConfig) -> SnowResult<Self> {
        let multiplier = config.general.multiplier as f32;
        let mut cloud = config.cloud.clone();
        cloud.dark_cloud_red_threshold *= multiplier;
        cloud.back_to_cloud_red_threshold *= multiplier;
        let mut snow = config.snow.clone();
        snow.red_pass1 *= multiplier;
        snow.red_pass2 *= multiplier;
        if multiplier != 1.0 {
            log::info!("Red thresholds scaled by {}", multiplier);
        }
        Self::new(cloud, snow, config.general.nodata_value)
    }

    pub fn with_snow_line_params(mut self, params: SnowLineParams) -> Self {
        self.snow_line = params;
        self
    }

    /// Run every pass on a scene
    pub fn detect(&self, bands: &SceneBands) -> SnowResult<SnowClassification> {
        bands.check_grid()?;
        let (rows, cols) = bands.dim();
        log::info!("Snow detection on a {}x{} scene", rows, cols);

        let pass0 = self.pass0(bands)?;
        let ndsi = compute_ndsi(&bands.green, &bands.swir)?;
        let pass1_raw = self.pass1(&ndsi, &bands.red, &pass0.cloud.refined);

        let (pass1, cloud_pass1, disambiguation) = match &self.disambiguation {
            Some(params) => {
                log::info!("Pass 1.5: cloud-surrounded snow disambiguation");
                let out = Disambiguator::new(params.clone()).apply(&pass1_raw, &pass0.cloud.refined)?;
                (out.snow, out.cloud, Some(out.report))
            }
            None => (pass1_raw, pass0.cloud.refined.clone(), None),
        };

        let outcome = self.pass2(bands, &ndsi, &pass1, &cloud_pass1, &pass0.nodata)?;
        let labels = self.composite(&outcome.snow, &cloud_pass1, &pass0)?;
        let snow_all = self.snow_all(&pass1, &outcome.pass2, &cloud_pass1, &pass0.cloud, bands.slope_flag.as_ref());

        let classification = SnowClassification {
            labels,
            zs: outcome.zs,
            histogram: outcome.histogram,
            ndsi,
            pass1,
            pass2: outcome.pass2,
            pass3: outcome.snow,
            cloud_pass1,
            cloud: pass0.cloud,
            nodata: pass0.nodata,
            snow_all,
            disambiguation,
        };
        log::info!(
            "Snow detection done: zs={} snow={:.2}% cloud={:.2}%",
            classification.zs,
            classification.snow_percent(),
            classification.cloud_percent()
        );
        Ok(classification)
    }

    /// Cloud layers and no-data mask
    pub fn pass0(&self, bands: &SceneBands) -> SnowResult<Pass0> {
        log::info!("Pass 0: cloud refinement");
        let resolver = CloudLayerResolver::new(&self.cloud);
        let cloud = resolver.resolve(&bands.cloud_source, &bands.red, Some(self.nodata_value))?;

        let nd = self.nodata_value;
        let nodata = Zip::from(&bands.green)
            .and(&bands.red)
            .and(&bands.swir)
            .par_map_collect(|&g, &r, &s| u8::from(g == nd || r == nd || s == nd));
        log::debug!("No-data pixels: {}", count_nonzero(&nodata));
        Ok(Pass0 { cloud, nodata })
    }

    /// Conservative snow test on cloud-free pixels
    pub fn pass1(&self, ndsi: &BandImage, red: &BandImage, refined_cloud: &Mask) -> Mask {
        let ndsi_lim = self.snow.ndsi_pass1;
        let red_lim = self.snow.red_pass1;
        let pass1 = Zip::from(ndsi)
            .and(red)
            .and(refined_cloud)
            .par_map_collect(|&n, &r, &c| u8::from(c == 0 && n > ndsi_lim && r > red_lim));
        log::info!("Pass 1: {} snow pixels", count_nonzero(&pass1));
        pass1
    }

    /// Snow line estimation then relaxed snow test above it
    pub fn pass2(
        &self,
        bands: &SceneBands,
        ndsi: &BandImage,
        pass1: &Mask,
        cloud_pass1: &Mask,
        nodata: &Mask,
    ) -> SnowResult<Pass2Outcome> {
        let total = pass1.len();
        let snow_fraction_pass1 = if total == 0 {
            0.0
        } else {
            count_nonzero(pass1) as f64 / total as f64
        };

        let valid = nodata.mapv(|v| u8::from(v == 0));
        let estimator = SnowLineEstimator::new(self.snow_line.clone());
        let line = estimator.estimate(&bands.dem, pass1, cloud_pass1, Some(&valid))?;

        let fallback = |zs_reason: &str, histogram: ElevationHistogram| {
            log::warn!("Pass 2 skipped: {}", zs_reason);
            Pass2Outcome {
                zs: UNDETERMINED_ZS,
                histogram,
                pass2: Mask::zeros(pass1.dim()),
                snow: pass1.clone(),
                snow_fraction_pass1,
            }
        };

        if snow_fraction_pass1 <= self.snow.min_snow_fraction_in_pass1 {
            return Ok(fallback(
                &format!(
                    "pass 1 snow fraction {:.5} does not exceed {}",
                    snow_fraction_pass1, self.snow.min_snow_fraction_in_pass1
                ),
                line.histogram,
            ));
        }
        if !line.is_determined() {
            return Ok(fallback("snow line undetermined", line.histogram));
        }

        let zs = line.zs;
        let zs_f = zs as f32;
        let ndsi_lim = self.snow.ndsi_pass2;
        let red_lim = self.snow.red_pass2;
        let pass2 = Zip::from(cloud_pass1)
            .and(&bands.dem)
            .and(ndsi)
            .and(&bands.red)
            .par_map_collect(|&c, &z, &n, &r| {
                u8::from(c == 0 && z > zs_f && n > ndsi_lim && r > red_lim)
            });
        let pass3 = Zip::from(pass1)
            .and(&pass2)
            .par_map_collect(|&a, &b| u8::from(a != 0 || b != 0));
        log::info!(
            "Pass 2: zs={} m, {} snow pixels, pass 3: {} snow pixels",
            zs,
            count_nonzero(&pass2),
            count_nonzero(&pass3)
        );

        Ok(Pass2Outcome {
            zs,
            histogram: line.histogram,
            pass2,
            snow: pass3,
            snow_fraction_pass1,
        })
    }

    /// Final labels from the generic snow mask and the cloud layers
    pub fn composite(&self, snow: &Mask, cloud_pass1: &Mask, pass0: &Pass0) -> SnowResult<LabelImage> {
        ensure_same_shape("Cloud mask", snow.dim(), cloud_pass1.dim())?;
        ensure_same_shape("No-data mask", snow.dim(), pass0.nodata.dim())?;
        let strict = self.cloud.strict_cloud_mode;
        let layers = &pass0.cloud;

        let mut labels = LabelImage::zeros(snow.dim());
        Zip::from(&mut labels)
            .and(snow)
            .and(cloud_pass1)
            .and(&layers.refined)
            .and(&layers.back_to_cloud)
            .and(&layers.all_cloud)
            .par_for_each(|label, &s, &c1, &refined, &back, &all| {
                let is_snow = s != 0 && !(strict && all != 0);
                // cloud_pass1 only differs from the refined mask on discarded snow
                let discarded = c1 != refined;
                *label = if is_snow {
                    Label::Snow.value()
                } else if refined != 0 || discarded || back != 0 {
                    Label::Cloud.value()
                } else {
                    Label::NoSnow.value()
                };
            });

        Zip::from(&mut labels).and(&pass0.nodata).par_for_each(|label, &nd| {
            if nd != 0 {
                *label = Label::NoData.value();
            }
        });
        Ok(labels)
    }

    fn snow_all(
        &self,
        pass1: &Mask,
        pass2: &Mask,
        cloud_pass1: &Mask,
        cloud: &CloudLayers,
        slope_flag: Option<&Mask>,
    ) -> Mask {
        use snow_all_bits::*;
        let mut bits = Zip::from(pass1)
            .and(pass2)
            .and(cloud_pass1)
            .and(&cloud.refined)
            .and(&cloud.all_cloud)
            .par_map_collect(|&p1, &p2, &c1, &refined, &all| {
                let mut v = 0u8;
                if p1 != 0 {
                    v |= PASS1;
                }
                if p2 != 0 {
                    v |= PASS2;
                }
                if c1 != 0 {
                    v |= CLOUD_PASS1;
                }
                if refined != 0 {
                    v |= REFINED_CLOUD;
                }
                if all != 0 {
                    v |= ALL_CLOUD;
                }
                v
            });
        if let Some(slope) = slope_flag {
            Zip::from(&mut bits).and(slope).par_for_each(|v, &flag| {
                if flag != 0 {
                    *v |= BAD_SLOPE;
                }
            });
        }
        bits
    }
}

/// Normalised difference snow index, 0 where green + swir is 0
pub fn compute_ndsi(green: &BandImage, swir: &BandImage) -> SnowResult<BandImage> {
    ensure_same_shape("SWIR band", green.dim(), swir.dim())?;
    Ok(Zip::from(green).and(swir).par_map_collect(|&g, &s| {
        let sum = g + s;
        if sum == 0.0 {
            0.0
        } else {
            (g - s) / sum
        }
    }))
}
