//! Cloud-surrounded snow disambiguation (pass 1.5)
//!
//! Large pass 1 snow patches whose surroundings are almost entirely cloudy are
//! likely bright cloud tops mistaken for snow. Every component is judged
//! against the masks as they were before the pass, then all rejected
//! components are moved from snow to cloud at once.

use crate::config::CloudConfig;
use crate::core::raster_ops::{connected_components, count_nonzero, disc_offsets};
use crate::types::{ensure_same_shape, Mask, SnowResult};
use ndarray::Array2;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

#[derive(Debug, Clone)]
pub struct DisambiguationParams {
    /// Radius of the disc used to grow each component
    pub dilation_radius: usize,
    /// Cloud fraction of the surroundings above which a component is rejected
    pub cloud_threshold: f64,
    /// Components of this many pixels or fewer are left alone
    pub min_component_area: usize,
}

impl Default for DisambiguationParams {
    fn default() -> Self {
        Self {
            dilation_radius: 5,
            cloud_threshold: 0.85,
            min_component_area: 25000,
        }
    }
}

impl DisambiguationParams {
    pub fn from_cloud_config(config: &CloudConfig) -> Self {
        Self {
            dilation_radius: config.dilation_radius,
            cloud_threshold: config.disambiguation_threshold,
            min_component_area: config.min_component_area,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DisambiguationReport {
    pub components: usize,
    pub examined: usize,
    pub removed: usize,
    pub pixels_removed: usize,
}

/// Masks after disambiguation
#[derive(Debug, Clone)]
pub struct Disambiguated {
    pub snow: Mask,
    pub cloud: Mask,
    pub report: DisambiguationReport,
}

pub struct Disambiguator {
    params: DisambiguationParams,
    offsets: Vec<(isize, isize)>,
}

impl Disambiguator {
    pub fn new(params: DisambiguationParams) -> Self {
        let offsets = disc_offsets(params.dilation_radius);
        Self { params, offsets }
    }

    /// Remove cloud-surrounded components from `snow` and add them to `cloud`
    pub fn apply(&self, snow: &Mask, cloud: &Mask) -> SnowResult<Disambiguated> {
        ensure_same_shape("Cloud mask", snow.dim(), cloud.dim())?;
        let components = connected_components(snow);
        log::info!(
            "Disambiguating {} snow components (area > {}, radius {}, threshold {})",
            components.len(),
            self.params.min_component_area,
            self.params.dilation_radius,
            self.params.cloud_threshold
        );

        let candidates: Vec<&Vec<(usize, usize)>> = components
            .iter()
            .filter(|c| c.len() > self.params.min_component_area)
            .collect();

        #[cfg(feature = "parallel")]
        let decisions: Vec<bool> = candidates
            .par_iter()
            .map(|c| self.is_cloud_surrounded(c, snow, cloud))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let decisions: Vec<bool> = candidates
            .iter()
            .map(|c| self.is_cloud_surrounded(c, snow, cloud))
            .collect();

        let mut out_snow = snow.clone();
        let mut out_cloud = cloud.clone();
        let mut report = DisambiguationReport {
            components: components.len(),
            examined: candidates.len(),
            ..DisambiguationReport::default()
        };
        for (component, rejected) in candidates.iter().zip(decisions) {
            if !rejected {
                continue;
            }
            for &(r, c) in component.iter() {
                out_snow[[r, c]] = 0;
                out_cloud[[r, c]] = 1;
            }
            report.removed += 1;
            report.pixels_removed += component.len();
        }

        log::info!(
            "Pass 1.5 removed {}/{} components ({} pixels), {} snow pixels left",
            report.removed,
            report.examined,
            report.pixels_removed,
            count_nonzero(&out_snow)
        );
        Ok(Disambiguated {
            snow: out_snow,
            cloud: out_cloud,
            report,
        })
    }

    /// Cloud fraction of the dilated ring around a component
    pub fn boundary_cloud_fraction(
        &self,
        component: &[(usize, usize)],
        snow: &Mask,
        cloud: &Mask,
    ) -> f64 {
        if component.is_empty() {
            return 0.0;
        }
        let (rows, cols) = snow.dim();
        let radius = self.params.dilation_radius;
        let (mut r0, mut r1, mut c0, mut c1) = (usize::MAX, 0, usize::MAX, 0);
        for &(r, c) in component {
            r0 = r0.min(r);
            r1 = r1.max(r);
            c0 = c0.min(c);
            c1 = c1.max(c);
        }
        let top = r0.saturating_sub(radius);
        let left = c0.saturating_sub(radius);
        let bottom = (r1 + radius).min(rows - 1);
        let right = (c1 + radius).min(cols - 1);

        let mut dilated = Array2::<bool>::from_elem((bottom - top + 1, right - left + 1), false);
        for &(r, c) in component {
            for &(dy, dx) in &self.offsets {
                let y = r as isize + dy;
                let x = c as isize + dx;
                if y < top as isize || x < left as isize || y > bottom as isize || x > right as isize {
                    continue;
                }
                dilated[[y as usize - top, x as usize - left]] = true;
            }
        }

        let mut boundary = 0usize;
        let mut cloudy = 0usize;
        for ((i, j), &inside) in dilated.indexed_iter() {
            if !inside || snow[[top + i, left + j]] != 0 {
                continue;
            }
            boundary += 1;
            if cloud[[top + i, left + j]] != 0 {
                cloudy += 1;
            }
        }

        if boundary == 0 {
            0.0
        } else {
            cloudy as f64 / boundary as f64
        }
    }

    fn is_cloud_surrounded(&self, component: &[(usize, usize)], snow: &Mask, cloud: &Mask) -> bool {
        let fraction = self.boundary_cloud_fraction(component, snow, cloud);
        log::debug!(
            "Component of {} pixels: boundary cloud fraction {:.3}",
            component.len(),
            fraction
        );
        fraction > self.params.cloud_threshold
    }
}
