//! Snow line elevation from an elevation histogram of pass 1 snow
//!
//! Pixels are binned by DEM elevation into left-open, right-closed bins of
//! width `dz`: bin `k` covers `(k·dz, (k+1)·dz]`. Each bin counts its pixels,
//! the cloud-free ones and the snow-covered ones among those. The snow line
//! `zs` is the lowest elevation above which the bins are consistently snowy.

use crate::config::SnowParams;
use crate::types::{ensure_same_shape, Elevation, Mask, SnowError, SnowResult};
use ndarray::Zip;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

/// Sentinel for a snow line that could not be determined
pub const UNDETERMINED_ZS: i32 = -1;

/// Elevations outside this range (metres) are treated as DEM fill values
pub const ELEVATION_RANGE: (f64, f64) = (-1.0e4, 1.0e4);

/// Upper bound on the number of histogram bins
pub const MAX_HISTOGRAM_BINS: usize = 100_000;

/// Order in which the histogram bins are scanned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanDirection {
    /// From the highest bin downwards, zs is the bottom of the snowy run
    TopDown,
    /// From the lowest bin upwards, zs is the first snowy bin
    BottomUp,
}

/// Snow line search parameters
#[derive(Debug, Clone)]
pub struct SnowLineParams {
    /// Bin width in metres
    pub dz: f64,
    /// Minimal snow fraction of the clear pixels of a bin
    pub fsnow_lim: f64,
    /// Minimal clear fraction for a bin to be conclusive
    pub fclear_lim: f64,
    pub direction: ScanDirection,
    /// Shift of the selected bin, in bins (positive is upwards)
    pub bin_offset: isize,
}

impl Default for SnowLineParams {
    fn default() -> Self {
        Self {
            dz: 100.0,
            fsnow_lim: 0.1,
            fclear_lim: 0.1,
            direction: ScanDirection::TopDown,
            bin_offset: 0,
        }
    }
}

impl SnowLineParams {
    pub fn from_snow_params(params: &SnowParams) -> Self {
        Self {
            dz: params.dz as f64,
            fsnow_lim: params.fsnow_lim,
            fclear_lim: params.min_clear_fraction_per_bin,
            ..Self::default()
        }
    }
}

/// Pixel counts of one elevation bin
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramBin {
    /// Exclusive lower bound
    pub lower: f64,
    /// Inclusive upper bound
    pub upper: f64,
    pub total: u64,
    pub clear: u64,
    /// Snow pixels among the clear ones
    pub snow: u64,
}

impl HistogramBin {
    pub fn clear_fraction(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.clear as f64 / self.total as f64
        }
    }

    pub fn snow_fraction(&self) -> f64 {
        if self.clear == 0 {
            0.0
        } else {
            self.snow as f64 / self.clear as f64
        }
    }

    /// Enough cloud-free pixels to say anything about snow
    pub fn is_conclusive(&self, fclear_lim: f64) -> bool {
        self.clear > 0 && self.clear_fraction() >= fclear_lim
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct BinCounts {
    total: u64,
    clear: u64,
    snow: u64,
}

/// Contiguous elevation histogram, lowest bin first
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationHistogram {
    dz: f64,
    bins: Vec<HistogramBin>,
}

impl ElevationHistogram {
    /// Bin every valid pixel of the DEM.
    ///
    /// A pixel is clear when `cloud` is 0 and counts as snow when it is clear
    /// and set in `snow`. Non-finite elevations, elevations outside
    /// [`ELEVATION_RANGE`] and pixels outside `valid` are left out. Fails when
    /// the occupied span would need more than [`MAX_HISTOGRAM_BINS`] bins.
    pub fn from_rasters(
        dem: &Elevation,
        snow: &Mask,
        cloud: &Mask,
        valid: Option<&Mask>,
        dz: f64,
    ) -> SnowResult<Self> {
        if !(dz > 0.0) {
            return Err(SnowError::Processing(format!("Histogram bin width must be positive, got {}", dz)));
        }
        ensure_same_shape("Snow mask", dem.dim(), snow.dim())?;
        ensure_same_shape("Cloud mask", dem.dim(), cloud.dim())?;
        if let Some(valid) = valid {
            ensure_same_shape("Validity mask", dem.dim(), valid.dim())?;
        }

        let (min_z, max_z) = ELEVATION_RANGE;
        let mut counts: BTreeMap<i64, BinCounts> = BTreeMap::new();
        let mut out_of_range = 0usize;
        Zip::indexed(dem).and(snow).and(cloud).for_each(|idx, &z, &s, &c| {
            if !z.is_finite() {
                return;
            }
            let z = z as f64;
            if z < min_z || z > max_z {
                out_of_range += 1;
                return;
            }
            if let Some(valid) = valid {
                if valid[idx] == 0 {
                    return;
                }
            }
            let k = ((z / dz).ceil() as i64).saturating_sub(1);
            let entry = counts.entry(k).or_default();
            entry.total += 1;
            if c == 0 {
                entry.clear += 1;
                if s != 0 {
                    entry.snow += 1;
                }
            }
        });

        if out_of_range > 0 {
            log::warn!(
                "{} DEM pixels outside [{}, {}] m left out of the histogram",
                out_of_range, min_z, max_z
            );
        }

        let bins = match (counts.keys().next(), counts.keys().next_back()) {
            (Some(&first), Some(&last)) if last.saturating_sub(first) >= MAX_HISTOGRAM_BINS as i64 => {
                return Err(SnowError::Processing(format!(
                    "Elevation span {} to {} m needs more than {} bins of {} m",
                    first as f64 * dz,
                    (last as f64 + 1.0) * dz,
                    MAX_HISTOGRAM_BINS,
                    dz
                )));
            }
            (Some(&first), Some(&last)) => (first..=last)
                .map(|k| {
                    let c = counts.get(&k).copied().unwrap_or_default();
                    HistogramBin {
                        lower: k as f64 * dz,
                        upper: (k + 1) as f64 * dz,
                        total: c.total,
                        clear: c.clear,
                        snow: c.snow,
                    }
                })
                .collect(),
            _ => Vec::new(),
        };

        log::debug!("Elevation histogram: {} bins of {} m", bins.len(), dz);
        Ok(Self { dz, bins })
    }

    pub fn from_bins(dz: f64, bins: Vec<HistogramBin>) -> Self {
        Self { dz, bins }
    }

    pub fn dz(&self) -> f64 {
        self.dz
    }

    pub fn bins(&self) -> &[HistogramBin] {
        &self.bins
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }

    /// One line per bin: `elevation total clear snow fraction`
    pub fn to_text(&self) -> String {
        let mut text = String::from("# elevation total clear snow snow_fraction\n");
        for bin in &self.bins {
            let _ = writeln!(
                text,
                "{} {} {} {} {:.6}",
                bin.lower,
                bin.total,
                bin.clear,
                bin.snow,
                bin.snow_fraction()
            );
        }
        text
    }

    pub fn write_text<P: AsRef<Path>>(&self, path: P) -> SnowResult<()> {
        std::fs::write(path.as_ref(), self.to_text())?;
        log::info!("Histogram written to {}", path.as_ref().display());
        Ok(())
    }
}

/// Result of a snow line search
#[derive(Debug, Clone)]
pub struct SnowLine {
    /// Elevation in metres, or [`UNDETERMINED_ZS`]
    pub zs: i32,
    pub histogram: ElevationHistogram,
}

impl SnowLine {
    pub fn is_determined(&self) -> bool {
        self.zs != UNDETERMINED_ZS
    }
}

/// Finds the snow line of a scene
pub struct SnowLineEstimator {
    params: SnowLineParams,
}

impl SnowLineEstimator {
    pub fn new(params: SnowLineParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SnowLineParams {
        &self.params
    }

    /// Build the histogram and scan it
    pub fn estimate(
        &self,
        dem: &Elevation,
        snow: &Mask,
        cloud: &Mask,
        valid: Option<&Mask>,
    ) -> SnowResult<SnowLine> {
        let histogram = ElevationHistogram::from_rasters(dem, snow, cloud, valid, self.params.dz)?;
        let zs = self.snow_line(&histogram);
        Ok(SnowLine { zs, histogram })
    }

    /// Lower bound of the selected bin, or [`UNDETERMINED_ZS`]
    pub fn snow_line(&self, histogram: &ElevationHistogram) -> i32 {
        let selected = match self.params.direction {
            ScanDirection::TopDown => self.scan_top_down(histogram.bins()),
            ScanDirection::BottomUp => self.scan_bottom_up(histogram.bins()),
        };

        match selected {
            Some(index) => {
                let last = histogram.bins().len() as isize - 1;
                let shifted = (index as isize + self.params.bin_offset).clamp(0, last) as usize;
                let zs = histogram.bins()[shifted].lower.round() as i32;
                log::info!("Snow line found at {} m", zs);
                zs
            }
            None => {
                log::info!("No snow line found in {} bins", histogram.bins().len());
                UNDETERMINED_ZS
            }
        }
    }

    fn satisfies(&self, bin: &HistogramBin) -> bool {
        bin.snow_fraction() >= self.params.fsnow_lim
    }

    fn scan_top_down(&self, bins: &[HistogramBin]) -> Option<usize> {
        let mut lowest = None;
        for (index, bin) in bins.iter().enumerate().rev() {
            if !bin.is_conclusive(self.params.fclear_lim) {
                continue;
            }
            log::debug!(
                "Bin ({}, {}]: clear {}/{}, snow fraction {:.3}",
                bin.lower, bin.upper, bin.clear, bin.total, bin.snow_fraction()
            );
            if self.satisfies(bin) {
                lowest = Some(index);
            } else {
                break;
            }
        }
        lowest
    }

    fn scan_bottom_up(&self, bins: &[HistogramBin]) -> Option<usize> {
        bins.iter()
            .position(|bin| bin.is_conclusive(self.params.fclear_lim) && self.satisfies(bin))
    }
}
