//! Pixel and neighbourhood operations shared by the processing passes

use crate::types::{ensure_same_shape, BandImage, Mask, SnowResult};
use ndarray::{Array2, Zip};
use num_traits::Zero;

/// Bilinear resampling to a new grid size with pixel-centre alignment.
///
/// When `no_data` is given, any output pixel whose interpolation touches a
/// no-data input pixel is set to `no_data` instead of blending it.
pub fn resample_bilinear(
    src: &Array2<f32>,
    out_shape: (usize, usize),
    no_data: Option<f32>,
) -> BandImage {
    let (in_rows, in_cols) = src.dim();
    let (out_rows, out_cols) = out_shape;
    if (in_rows, in_cols) == out_shape {
        return src.clone();
    }
    log::debug!(
        "Bilinear resampling {}x{} -> {}x{}",
        in_rows, in_cols, out_rows, out_cols
    );

    let row_scale = in_rows as f64 / out_rows.max(1) as f64;
    let col_scale = in_cols as f64 / out_cols.max(1) as f64;
    let mut out = Array2::<f32>::zeros(out_shape);
    if in_rows == 0 || in_cols == 0 {
        return out;
    }

    Zip::indexed(&mut out).par_for_each(|(i, j), value| {
        let y = ((i as f64 + 0.5) * row_scale - 0.5).clamp(0.0, (in_rows - 1) as f64);
        let x = ((j as f64 + 0.5) * col_scale - 0.5).clamp(0.0, (in_cols - 1) as f64);
        let y0 = y.floor() as usize;
        let x0 = x.floor() as usize;
        let y1 = (y0 + 1).min(in_rows - 1);
        let x1 = (x0 + 1).min(in_cols - 1);
        let dy = (y - y0 as f64) as f32;
        let dx = (x - x0 as f64) as f32;

        let corners = [
            (src[[y0, x0]], (1.0 - dx) * (1.0 - dy)),
            (src[[y0, x1]], dx * (1.0 - dy)),
            (src[[y1, x0]], (1.0 - dx) * dy),
            (src[[y1, x1]], dx * dy),
        ];

        if let Some(nd) = no_data {
            if corners.iter().any(|&(v, w)| w > 0.0 && v == nd) {
                *value = nd;
                return;
            }
        }
        *value = corners.iter().map(|&(v, w)| v * w).sum();
    });

    out
}

/// Coarsen by block averaging then refine back with nearest neighbour.
///
/// Blocks are `factor` x `factor` input pixels; non-finite and no-data values
/// are left out of the average and an empty block yields NaN.
pub fn pyramid_resample(band: &BandImage, factor: usize, no_data: Option<f32>) -> BandImage {
    if factor <= 1 {
        return band.clone();
    }
    let (rows, cols) = band.dim();
    let coarse_rows = (rows + factor - 1) / factor;
    let coarse_cols = (cols + factor - 1) / factor;
    log::debug!(
        "Red band pyramid: {}x{} -> {}x{} (factor {})",
        rows, cols, coarse_rows, coarse_cols, factor
    );

    let coarse = Array2::from_shape_fn((coarse_rows, coarse_cols), |(ci, cj)| {
        let mut sum = 0.0f64;
        let mut count = 0usize;
        for i in ci * factor..((ci + 1) * factor).min(rows) {
            for j in cj * factor..((cj + 1) * factor).min(cols) {
                let v = band[[i, j]];
                if v.is_finite() && Some(v) != no_data {
                    sum += v as f64;
                    count += 1;
                }
            }
        }
        if count > 0 {
            (sum / count as f64) as f32
        } else {
            f32::NAN
        }
    });

    Array2::from_shape_fn((rows, cols), |(i, j)| coarse[[i / factor, j / factor]])
}

/// Pointwise OR of several binary layers
pub fn union(layers: &[&Mask]) -> SnowResult<Mask> {
    let first = match layers.first() {
        Some(first) => *first,
        None => return Ok(Mask::zeros((0, 0))),
    };
    let mut out = first.mapv(|v| u8::from(v != 0));
    for (k, layer) in layers.iter().enumerate().skip(1) {
        ensure_same_shape(&format!("layer {}", k), out.dim(), layer.dim())?;
        Zip::from(&mut out).and(*layer).par_for_each(|o, &v| {
            if v != 0 {
                *o = 1;
            }
        });
    }
    Ok(out)
}

/// Number of non-zero pixels
pub fn count_nonzero<T: Zero + PartialEq>(raster: &Array2<T>) -> usize {
    raster.iter().filter(|v| !v.is_zero()).count()
}

/// Percentage of pixels carrying `value`, ignoring pixels equal to `excluded`
pub fn percent_of(raster: &Array2<u8>, value: u8, excluded: Option<u8>) -> f64 {
    let mut total = 0usize;
    let mut matching = 0usize;
    for &v in raster.iter() {
        if Some(v) == excluded {
            continue;
        }
        total += 1;
        if v == value {
            matching += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        matching as f64 / total as f64 * 100.0
    }
}

/// Offsets of a disc-shaped structuring element (dx² + dy² <= r²)
pub fn disc_offsets(radius: usize) -> Vec<(isize, isize)> {
    let r = radius as isize;
    let mut offsets = Vec::new();
    for dy in -r..=r {
        for dx in -r..=r {
            if dx * dx + dy * dy <= r * r {
                offsets.push((dy, dx));
            }
        }
    }
    offsets
}

/// 4-connected components of the non-zero pixels, in raster scan order
pub fn connected_components(mask: &Mask) -> Vec<Vec<(usize, usize)>> {
    let (rows, cols) = mask.dim();
    let mut visited = Array2::<bool>::from_elem((rows, cols), false);
    let mut components = Vec::new();
    let mut stack = Vec::new();

    for i in 0..rows {
        for j in 0..cols {
            if mask[[i, j]] == 0 || visited[[i, j]] {
                continue;
            }
            let mut pixels = Vec::new();
            visited[[i, j]] = true;
            stack.push((i, j));
            while let Some((r, c)) = stack.pop() {
                pixels.push((r, c));
                let mut neighbours = [None; 4];
                if r > 0 {
                    neighbours[0] = Some((r - 1, c));
                }
                if r + 1 < rows {
                    neighbours[1] = Some((r + 1, c));
                }
                if c > 0 {
                    neighbours[2] = Some((r, c - 1));
                }
                if c + 1 < cols {
                    neighbours[3] = Some((r, c + 1));
                }
                for (nr, nc) in neighbours.into_iter().flatten() {
                    if mask[[nr, nc]] != 0 && !visited[[nr, nc]] {
                        visited[[nr, nc]] = true;
                        stack.push((nr, nc));
                    }
                }
            }
            components.push(pixels);
        }
    }

    components
}
