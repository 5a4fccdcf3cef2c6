use crate::types::{GeoRaster, GeoTransform, RasterGrid, SnowError, SnowResult};
use gdal::raster::{Buffer, GdalType};
use gdal::{Dataset, DriverManager};
use ndarray::{Array2, Array3, Axis};
use std::path::Path;

/// GeoTIFF and GDAL-readable raster access
pub struct RasterReader;

impl RasterReader {
    /// Read one band (1-based index) with its georeferencing
    pub fn read_band<T, P>(path: P, band_index: usize) -> SnowResult<GeoRaster<T>>
    where
        T: GdalType + Copy,
        P: AsRef<Path>,
    {
        log::debug!("Reading band {} of {}", band_index, path.as_ref().display());
        let dataset = Dataset::open(path.as_ref())?;
        let band_count = dataset.raster_count() as usize;
        if band_index == 0 || band_index > band_count {
            return Err(SnowError::InvalidFormat(format!(
                "{} has {} bands, band {} requested",
                path.as_ref().display(),
                band_count,
                band_index
            )));
        }

        let geo_transform = GeoTransform::from_gdal(dataset.geo_transform()?);
        let projection = dataset.projection();
        let (width, height) = dataset.raster_size();

        let rasterband = dataset.rasterband(band_index as isize)?;
        let no_data = rasterband.no_data_value();
        let band_data = rasterband.read_as::<T>((0, 0), (width, height), (width, height), None)?;
        let data = Array2::from_shape_vec((height, width), band_data.data)
            .map_err(|e| SnowError::Processing(format!("Failed to reshape raster data: {}", e)))?;

        Ok(GeoRaster {
            data,
            geo_transform,
            projection,
            no_data,
        })
    }

    /// Grid of a raster without reading pixels
    pub fn read_grid<P: AsRef<Path>>(path: P) -> SnowResult<RasterGrid> {
        let dataset = Dataset::open(path.as_ref())?;
        let (cols, rows) = dataset.raster_size();
        Ok(RasterGrid {
            geo_transform: GeoTransform::from_gdal(dataset.geo_transform()?),
            projection: dataset.projection(),
            rows,
            cols,
        })
    }
}

/// GeoTIFF output
pub struct RasterWriter;

impl RasterWriter {
    pub fn write<T, P>(path: P, data: &Array2<T>, grid: &RasterGrid, no_data: Option<f64>) -> SnowResult<()>
    where
        T: GdalType + Copy,
        P: AsRef<Path>,
    {
        let stack = data.view().insert_axis(Axis(0));
        Self::write_bands(path.as_ref(), stack.iter().copied(), 1, grid, no_data)
    }

    /// Write a stack as a multi-band GeoTIFF, one band per index of the first axis
    pub fn write_stack<T, P>(path: P, data: &Array3<T>, grid: &RasterGrid, no_data: Option<f64>) -> SnowResult<()>
    where
        T: GdalType + Copy,
        P: AsRef<Path>,
    {
        let bands = data.len_of(Axis(0));
        Self::write_bands(path.as_ref(), data.iter().copied(), bands, grid, no_data)
    }

    fn write_bands<T, I>(
        path: &Path,
        values: I,
        bands: usize,
        grid: &RasterGrid,
        no_data: Option<f64>,
    ) -> SnowResult<()>
    where
        T: GdalType + Copy,
        I: Iterator<Item = T>,
    {
        if bands == 0 {
            return Err(SnowError::Processing(format!(
                "Refusing to write {} without bands",
                path.display()
            )));
        }
        log::info!("Writing {} band(s) to {}", bands, path.display());
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let (height, width) = grid.shape();
        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let mut dataset = driver.create_with_band_type::<T, _>(
            path,
            width as isize,
            height as isize,
            bands as isize,
        )?;
        dataset.set_geo_transform(&grid.geo_transform.to_gdal())?;
        if !grid.projection.is_empty() {
            dataset.set_projection(&grid.projection)?;
        }

        let values: Vec<T> = values.collect();
        let band_len = width * height;
        if values.len() != band_len * bands {
            return Err(SnowError::GridMismatch(format!(
                "{} values do not fill {} band(s) of {}x{}",
                values.len(),
                bands,
                height,
                width
            )));
        }
        for (k, chunk) in values.chunks(band_len).enumerate() {
            let mut rasterband = dataset.rasterband(k as isize + 1)?;
            let buffer = Buffer::new((width, height), chunk.to_vec());
            rasterband.write((0, 0), (width, height), &buffer)?;
            if no_data.is_some() {
                rasterband.set_no_data_value(no_data)?;
            }
        }
        Ok(())
    }
}

/// Bound GDAL's block cache, in megabytes
pub fn set_cache_size(megabytes: usize) -> SnowResult<()> {
    gdal::config::set_config_option("GDAL_CACHEMAX", &megabytes.to_string())?;
    log::debug!("GDAL cache limited to {} MB", megabytes);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn grid(rows: usize, cols: usize) -> RasterGrid {
        RasterGrid {
            geo_transform: GeoTransform::from_gdal([600000.0, 20.0, 0.0, 5000000.0, 0.0, -20.0]),
            projection: String::new(),
            rows,
            cols,
        }
    }

    #[test]
    fn test_write_then_read_band() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labels.tif");
        let labels = array![[0u8, 100, 205], [254, 0, 100]];
        RasterWriter::write(&path, &labels, &grid(2, 3), Some(254.0)).unwrap();

        let read = RasterReader::read_band::<u8, _>(&path, 1).unwrap();
        assert_eq!(read.data, labels);
        assert_eq!(read.no_data, Some(254.0));
        assert_eq!(read.geo_transform.pixel_width, 20.0);
        assert_eq!(RasterReader::read_grid(&path).unwrap().shape(), (2, 3));
        assert!(RasterReader::read_band::<u8, _>(&path, 2).is_err());
    }

    #[test]
    fn test_write_stack_bands() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.tif");
        let stack = Array3::from_shape_fn((3, 2, 2), |(k, i, j)| (k * 4 + i * 2 + j) as u8);
        RasterWriter::write_stack(&path, &stack, &grid(2, 2), None).unwrap();
        let band3 = RasterReader::read_band::<u8, _>(&path, 3).unwrap();
        assert_eq!(band3.data, array![[8u8, 9], [10, 11]]);
    }
}
