//! snowmap: snow cover detection for optical satellite imagery
//!
//! Classifies a Sentinel-2 or Landsat scene into snow, no snow, cloud and
//! no data using the NDSI, a DEM-derived snow line and the mission cloud
//! mask, then aggregates series of classified scenes into gap-filled daily
//! snow masks and annual snow occurrence maps.

pub mod types;
pub mod config;
pub mod io;
pub mod core;

// Re-export main types and functions for easier access
pub use types::{
    BandImage, Elevation, GeoRaster, GeoTransform, Label, LabelImage, Mask, MaskStack,
    OccurrenceImage, RasterGrid, SnowError, SnowResult,
};
pub use config::{CloudConfig, CloudMaskMode, MultitempConfig, SnowConfig, SnowParams};
pub use io::{RasterReader, RasterWriter, SnowProduct};
pub use crate::core::{AnnualMapProcessor, SceneProcessor, SnowDetector};

#[cfg(feature = "python")]
mod python {
    use crate::core::{AnnualMapProcessor, SceneProcessor, SnowLineEstimator, SnowLineParams};
    use numpy::PyReadonlyArray2;
    use pyo3::prelude::*;

    fn to_py_err(e: crate::SnowError) -> PyErr {
        PyErr::new::<pyo3::exceptions::PyRuntimeError, _>(format!("{}", e))
    }

    /// Run snow detection for a JSON configuration, returns the snow line
    #[pyfunction]
    fn detect_snow(config_path: String) -> PyResult<i32> {
        let processor = SceneProcessor::from_file(&config_path).map_err(to_py_err)?;
        let outputs = processor.run().map_err(to_py_err)?;
        Ok(outputs.zs)
    }

    /// Build the annual snow map for a JSON configuration, returns its output directory
    #[pyfunction]
    fn run_annual_map(config_path: String) -> PyResult<String> {
        let processor = AnnualMapProcessor::from_file(&config_path).map_err(to_py_err)?;
        let outputs = processor.run().map_err(to_py_err)?;
        Ok(outputs.output_dir.to_string_lossy().to_string())
    }

    #[pyfunction]
    fn compute_snow_line(
        dem: PyReadonlyArray2<f32>,
        snow: PyReadonlyArray2<u8>,
        cloud: PyReadonlyArray2<u8>,
        dz: f64,
        fsnow_lim: f64,
        fclear_lim: f64,
    ) -> PyResult<i32> {
        let estimator = SnowLineEstimator::new(SnowLineParams {
            dz,
            fsnow_lim,
            fclear_lim,
            ..SnowLineParams::default()
        });
        let line = estimator
            .estimate(
                &dem.as_array().to_owned(),
                &snow.as_array().to_owned(),
                &cloud.as_array().to_owned(),
                None,
            )
            .map_err(to_py_err)?;
        Ok(line.zs)
    }

    /// Python module definition
    #[pymodule]
    fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(detect_snow, m)?)?;
        m.add_function(wrap_pyfunction!(run_annual_map, m)?)?;
        m.add_function(wrap_pyfunction!(compute_snow_line, m)?)?;
        Ok(())
    }
}
