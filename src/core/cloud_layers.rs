//! Cloud layer extraction from the sensor-provided cloud mask
//!
//! The raw mask is decoded into binary layers (all clouds, shadows, high
//! clouds) according to its encoding, then combined into the refined cloud
//! mask used by the snow passes.

use crate::config::{CloudConfig, CloudMaskMode};
use crate::core::raster_ops::{count_nonzero, pyramid_resample, resample_bilinear, union};
use crate::types::{BandImage, Mask, SnowError, SnowResult};
use ndarray::{Array2, Zip};

/// Scene classification labels counted as cloud by Sen2Cor
const SEN2COR_SHADOW: u16 = 3;
const SEN2COR_CLOUD_MEDIUM: u16 = 8;
const SEN2COR_CLOUD_HIGH: u16 = 9;
const SEN2COR_CIRRUS: u16 = 10;

/// Binary layers derived from the raw cloud mask
#[derive(Debug, Clone)]
pub struct CloudLayers {
    pub all_cloud: Mask,
    pub shadow_in: Mask,
    pub shadow_out: Mask,
    pub high_cloud: Mask,
    /// (all cloud AND dark-cloud test) OR shadows OR high clouds
    pub refined: Mask,
    /// Flagged by the raw mask, released by the refinement, but bright in red
    pub back_to_cloud: Mask,
}

impl CloudLayers {
    /// Shadows cast by clouds inside or outside the scene
    pub fn shadow(&self) -> Mask {
        Zip::from(&self.shadow_in)
            .and(&self.shadow_out)
            .par_map_collect(|&a, &b| u8::from(a == 1 || b == 1))
    }
}

/// Decodes a cloud mask according to its encoding convention
pub struct CloudLayerResolver {
    mode: CloudMaskMode,
    shadow_in_code: u16,
    shadow_out_code: u16,
    all_cloud_code: u16,
    high_cloud_code: u16,
    dark_cloud_red_threshold: f32,
    back_to_cloud_red_threshold: f32,
    resampling_factor: usize,
}

impl CloudLayerResolver {
    /// Red thresholds are expected already scaled to the band's reflectance units
    pub fn new(config: &CloudConfig) -> Self {
        Self {
            mode: config.mode,
            shadow_in_code: config.shadow_in_code,
            shadow_out_code: config.shadow_out_code,
            all_cloud_code: config.all_cloud_code,
            high_cloud_code: config.high_cloud_code,
            dark_cloud_red_threshold: config.dark_cloud_red_threshold,
            back_to_cloud_red_threshold: config.back_to_cloud_red_threshold,
            resampling_factor: config.resampling_factor,
        }
    }

    /// Derive every cloud layer from the raw mask and the red band.
    ///
    /// The red band is resampled onto the mask grid when their sizes differ.
    /// Pixels equal to `red_no_data` are ignored by the red pyramid.
    pub fn resolve(
        &self,
        cloud_source: &Array2<u16>,
        red: &BandImage,
        red_no_data: Option<f32>,
    ) -> SnowResult<CloudLayers> {
        let (rows, cols) = cloud_source.dim();
        if rows == 0 || cols == 0 {
            return Err(SnowError::InvalidFormat("Cloud mask has an empty extent".to_string()));
        }
        log::info!("Resolving cloud layers ({:?} mode) on a {}x{} grid", self.mode, rows, cols);

        let red_on_grid;
        let red = if red.dim() != (rows, cols) {
            log::info!(
                "Resampling red band {}x{} onto the cloud mask grid {}x{}",
                red.nrows(), red.ncols(), rows, cols
            );
            red_on_grid = resample_bilinear(red, (rows, cols), red_no_data);
            &red_on_grid
        } else {
            red
        };

        let all_cloud = self.extract_all_clouds(cloud_source);
        let (shadow_in, shadow_out) = self.extract_shadows(cloud_source);
        let high_cloud = self.extract_high_clouds(cloud_source);

        let red_coarse = pyramid_resample(red, self.resampling_factor, red_no_data);
        let dark_threshold = self.dark_cloud_red_threshold;
        let always_cloud = union(&[&shadow_in, &shadow_out, &high_cloud])?;
        let refined = Zip::from(&all_cloud)
            .and(&red_coarse)
            .and(&always_cloud)
            .par_map_collect(|&cloud, &red_nn, &always| {
                let bright_cloud = cloud == 1 && red_nn > dark_threshold;
                u8::from(bright_cloud || always == 1)
            });

        let back_threshold = self.back_to_cloud_red_threshold;
        let back_to_cloud = Zip::from(&all_cloud)
            .and(&refined)
            .and(red)
            .par_map_collect(|&cloud, &refined, &r| {
                u8::from(cloud == 1 && refined == 0 && r > back_threshold)
            });

        log::debug!(
            "Cloud layers: all={} refined={} back_to_cloud={}",
            count_nonzero(&all_cloud),
            count_nonzero(&refined),
            count_nonzero(&back_to_cloud)
        );

        Ok(CloudLayers {
            all_cloud,
            shadow_in,
            shadow_out,
            high_cloud,
            refined,
            back_to_cloud,
        })
    }

    fn extract_all_clouds(&self, source: &Array2<u16>) -> Mask {
        match self.mode {
            CloudMaskMode::Sen2cor => source.mapv(|v| {
                u8::from(matches!(
                    v,
                    SEN2COR_SHADOW | SEN2COR_CLOUD_MEDIUM | SEN2COR_CLOUD_HIGH | SEN2COR_CIRRUS
                ))
            }),
            CloudMaskMode::Lasrc => bit_layer(source, self.all_cloud_code),
            CloudMaskMode::Maja => source.mapv(|v| u8::from(v > 0)),
        }
    }

    fn extract_shadows(&self, source: &Array2<u16>) -> (Mask, Mask) {
        match self.mode {
            CloudMaskMode::Sen2cor => (
                source.mapv(|v| u8::from(v == SEN2COR_SHADOW)),
                Mask::zeros(source.dim()),
            ),
            _ => (
                bit_layer(source, self.shadow_in_code),
                bit_layer(source, self.shadow_out_code),
            ),
        }
    }

    fn extract_high_clouds(&self, source: &Array2<u16>) -> Mask {
        match self.mode {
            CloudMaskMode::Sen2cor => source.mapv(|v| u8::from(v == SEN2COR_CIRRUS)),
            _ => bit_layer(source, self.high_cloud_code),
        }
    }
}

/// 1 where every bit of `code` is set; a zero code selects nothing
fn bit_layer(source: &Array2<u16>, code: u16) -> Mask {
    if code == 0 {
        return Mask::zeros(source.dim());
    }
    source.mapv(|v| u8::from(v & code == code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn maja_config() -> CloudConfig {
        CloudConfig {
            resampling_factor: 1,
            dark_cloud_red_threshold: 300.0,
            back_to_cloud_red_threshold: 100.0,
            ..CloudConfig::default()
        }
    }

    #[test]
    fn test_bitmask_layers() {
        let resolver = CloudLayerResolver::new(&maja_config());
        // clear, cloud, shadow-in, shadow-out, high cloud, cloud+high
        let source = array![[0u16, 1, 32 | 1, 64 | 1, 128 | 1, 129]];
        let red = array![[50.0f32, 500.0, 50.0, 50.0, 50.0, 50.0]];
        let layers = resolver.resolve(&source, &red, None).unwrap();

        assert_eq!(layers.all_cloud, array![[0u8, 1, 1, 1, 1, 1]]);
        assert_eq!(layers.shadow_in, array![[0u8, 0, 1, 0, 0, 0]]);
        assert_eq!(layers.shadow_out, array![[0u8, 0, 0, 1, 0, 0]]);
        assert_eq!(layers.high_cloud, array![[0u8, 0, 0, 0, 1, 1]]);
        assert_eq!(layers.refined, array![[0u8, 1, 1, 1, 1, 1]]);
        assert_eq!(layers.shadow(), array![[0u8, 0, 1, 1, 0, 0]]);
    }

    #[test]
    fn test_dark_cloud_released_and_back_to_cloud() {
        let resolver = CloudLayerResolver::new(&maja_config());
        let source = array![[1u16, 1, 1]];
        let red = array![[500.0f32, 150.0, 50.0]];
        let layers = resolver.resolve(&source, &red, None).unwrap();

        // bright cloud kept, dark ones released
        assert_eq!(layers.refined, array![[1u8, 0, 0]]);
        // released pixel brighter than the back-to-cloud threshold
        assert_eq!(layers.back_to_cloud, array![[0u8, 1, 0]]);
    }

    #[test]
    fn test_sen2cor_labels() {
        let config = CloudConfig {
            mode: CloudMaskMode::Sen2cor,
            ..maja_config()
        };
        let resolver = CloudLayerResolver::new(&config);
        let source = array![[3u16, 4, 8, 9, 10, 11]];
        let red = Array2::from_elem((1, 6), 1000.0f32);
        let layers = resolver.resolve(&source, &red, None).unwrap();

        assert_eq!(layers.all_cloud, array![[1u8, 0, 1, 1, 1, 0]]);
        assert_eq!(layers.shadow_in, array![[1u8, 0, 0, 0, 0, 0]]);
        assert_eq!(layers.high_cloud, array![[0u8, 0, 0, 0, 1, 0]]);
        assert_eq!(layers.refined, layers.all_cloud);
    }

    #[test]
    fn test_lasrc_uses_all_cloud_code() {
        let config = CloudConfig {
            mode: CloudMaskMode::Lasrc,
            all_cloud_code: 2,
            ..maja_config()
        };
        let resolver = CloudLayerResolver::new(&config);
        let source = array![[1u16, 2, 3]];
        let red = Array2::from_elem((1, 3), 1000.0f32);
        let layers = resolver.resolve(&source, &red, None).unwrap();
        assert_eq!(layers.all_cloud, array![[0u8, 1, 1]]);
    }

    #[test]
    fn test_red_resampled_to_mask_grid() {
        let resolver = CloudLayerResolver::new(&maja_config());
        let source = Array2::from_elem((4, 4), 1u16);
        let red = Array2::from_elem((2, 2), 800.0f32);
        let layers = resolver.resolve(&source, &red, None).unwrap();
        assert_eq!(layers.refined.dim(), (4, 4));
        assert!(layers.refined.iter().all(|&v| v == 1));
    }

    #[test]
    fn test_empty_mask_rejected() {
        let resolver = CloudLayerResolver::new(&maja_config());
        let source = Array2::<u16>::zeros((0, 3));
        let red = BandImage::zeros((0, 3));
        assert!(resolver.resolve(&source, &red, None).is_err());
    }
}
