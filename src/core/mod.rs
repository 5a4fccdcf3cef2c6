//! Snow detection and multitemporal aggregation

pub mod raster_ops;
pub mod cloud_layers;
pub mod snow_line;
pub mod disambiguation;
pub mod classifier;
pub mod reproject;
pub mod gap_filling;
pub mod snow_dates;
pub mod multitemp;
pub mod scene;
pub mod annual_map;

// Re-export main types
pub use cloud_layers::{CloudLayerResolver, CloudLayers};
pub use snow_line::{ElevationHistogram, HistogramBin, ScanDirection, SnowLine, SnowLineEstimator, SnowLineParams};
pub use disambiguation::{Disambiguated, DisambiguationParams, DisambiguationReport, Disambiguator};
pub use classifier::{compute_ndsi, SceneBands, SnowClassification, SnowDetector};
pub use reproject::{reproject_bilinear, reproject_nearest};
pub use gap_filling::{GapFilled, GapFiller};
pub use snow_dates::{observation_count, snow_season, SnowSeason};
pub use multitemp::{DatedMask, MultitempAggregator, Occurrence};
pub use scene::{SceneOutputs, SceneProcessor};
pub use annual_map::{AnnualMapOutputs, AnnualMapProcessor};
