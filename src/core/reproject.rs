//! Resampling of geo-referenced rasters onto a reference grid by map coordinates
//!
//! Each target pixel centre is located in the source raster through the two
//! geo-transforms, after a coordinate transform when the projections differ.
//! A source that does not cover a single target pixel is a grid mismatch.

use crate::types::{GeoRaster, RasterGrid, SnowError, SnowResult};
use gdal::spatial_ref::{CoordTransform, SpatialRef};
use ndarray::Array2;

/// Resample `src` onto `target` with nearest neighbour, pixels falling outside
/// the source get `fill`.
pub fn reproject_nearest<T: Copy>(src: &GeoRaster<T>, target: &RasterGrid, fill: T) -> SnowResult<Array2<T>> {
    if src.grid() == *target {
        return Ok(src.data.clone());
    }
    let (src_rows, src_cols) = src.data.dim();
    log::info!(
        "Nearest resampling of {}x{} raster onto {}x{} grid",
        src_rows, src_cols, target.rows, target.cols
    );

    let mut out = Array2::from_elem(target.shape(), fill);
    let mut covered = 0usize;
    for_each_source_position(src, target, |row, col, r, c| {
        if r < 0.0 || c < 0.0 {
            return;
        }
        let (r, c) = (r.floor() as usize, c.floor() as usize);
        if r < src_rows && c < src_cols {
            out[[row, col]] = src.data[[r, c]];
            covered += 1;
        }
    })?;
    ensure_covered(covered, src, target)?;
    Ok(out)
}

/// Resample a continuous raster onto `target` with bilinear interpolation.
///
/// Output pixels outside the source, or whose interpolation touches a
/// `no_data` or non-finite source pixel, get `fill`.
pub fn reproject_bilinear(
    src: &GeoRaster<f32>,
    target: &RasterGrid,
    no_data: Option<f32>,
    fill: f32,
) -> SnowResult<Array2<f32>> {
    if src.grid() == *target {
        return Ok(src.data.clone());
    }
    let (src_rows, src_cols) = src.data.dim();
    log::info!(
        "Bilinear resampling of {}x{} raster onto {}x{} grid",
        src_rows, src_cols, target.rows, target.cols
    );

    let mut out = Array2::from_elem(target.shape(), fill);
    let mut covered = 0usize;
    for_each_source_position(src, target, |row, col, r, c| {
        if r < 0.0 || c < 0.0 || r >= src_rows as f64 || c >= src_cols as f64 {
            return;
        }
        covered += 1;
        // pixel centres sit at half-integer positions
        let y = (r - 0.5).clamp(0.0, (src_rows - 1) as f64);
        let x = (c - 0.5).clamp(0.0, (src_cols - 1) as f64);
        let y0 = y.floor() as usize;
        let x0 = x.floor() as usize;
        let y1 = (y0 + 1).min(src_rows - 1);
        let x1 = (x0 + 1).min(src_cols - 1);
        let dy = (y - y0 as f64) as f32;
        let dx = (x - x0 as f64) as f32;

        let corners = [
            (src.data[[y0, x0]], (1.0 - dx) * (1.0 - dy)),
            (src.data[[y0, x1]], dx * (1.0 - dy)),
            (src.data[[y1, x0]], (1.0 - dx) * dy),
            (src.data[[y1, x1]], dx * dy),
        ];
        let unusable = |v: f32| !v.is_finite() || no_data.map_or(false, |nd| v == nd);
        if corners.iter().any(|&(v, w)| w > 0.0 && unusable(v)) {
            return;
        }
        out[[row, col]] = corners.iter().filter(|&&(_, w)| w > 0.0).map(|&(v, w)| v * w).sum();
    })?;
    ensure_covered(covered, src, target)?;
    Ok(out)
}

/// Calls `visit(row, col, src_row, src_col)` with the fractional source
/// position of every target pixel centre, one target row at a time.
fn for_each_source_position<T, F>(src: &GeoRaster<T>, target: &RasterGrid, mut visit: F) -> SnowResult<()>
where
    F: FnMut(usize, usize, f64, f64),
{
    let transform = coordinate_transform(&target.projection, &src.projection)?;
    if transform.is_some() {
        log::info!("Source raster is in another projection, transforming pixel centres");
    }

    let mut xs = vec![0.0f64; target.cols];
    let mut ys = vec![0.0f64; target.cols];
    let mut zs = vec![0.0f64; target.cols];
    for row in 0..target.rows {
        for col in 0..target.cols {
            let (x, y) = target.geo_transform.pixel_center(row, col);
            xs[col] = x;
            ys[col] = y;
            zs[col] = 0.0;
        }
        if let Some(transform) = &transform {
            transform.transform_coords(&mut xs, &mut ys, &mut zs)?;
        }
        for col in 0..target.cols {
            if let Some((r, c)) = src.geo_transform.geo_to_pixel(xs[col], ys[col]) {
                visit(row, col, r, c);
            }
        }
    }
    Ok(())
}

fn ensure_covered<T>(covered: usize, src: &GeoRaster<T>, target: &RasterGrid) -> SnowResult<()> {
    if covered == 0 && target.rows * target.cols > 0 {
        let origin = src.geo_transform;
        return Err(SnowError::GridMismatch(format!(
            "Raster at ({}, {}) does not overlap the {}x{} grid at ({}, {})",
            origin.top_left_x,
            origin.top_left_y,
            target.rows,
            target.cols,
            target.geo_transform.top_left_x,
            target.geo_transform.top_left_y
        )));
    }
    if covered < target.rows * target.cols {
        log::warn!(
            "Raster covers {} of {} target pixels",
            covered,
            target.rows * target.cols
        );
    }
    Ok(())
}

fn coordinate_transform(from: &str, to: &str) -> SnowResult<Option<CoordTransform>> {
    if from.is_empty() || to.is_empty() || from == to {
        return Ok(None);
    }
    let from_srs = SpatialRef::from_wkt(from)?;
    let to_srs = SpatialRef::from_wkt(to)?;
    if from_srs == to_srs {
        return Ok(None);
    }
    Ok(Some(CoordTransform::new(&from_srs, &to_srs)?))
}
