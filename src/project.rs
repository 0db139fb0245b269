//! Sky → image projections.
//!
//! Images are row-major, row 0 at the top. Galactic longitude increases to
//! the left in both projections, as on the sky seen from inside.

use std::f64::consts::{FRAC_PI_2, PI, SQRT_2};

use crate::map::SkyMap;
use crate::map::healpix::zphi2pix;

/// Default gnomonic raster size in pixels per side.
pub const DEFAULT_GNOMONIC_XSIZE: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Projection {
    /// Whole sky, `width × width/2`, centred on (0, 0).
    Mollweide { width: usize },
    /// Tangent-plane patch `size_deg` across, centred on `(lon, lat)` in
    /// degrees.
    Gnomonic {
        lon: f64,
        lat: f64,
        size_deg: f64,
        xsize: usize,
    },
}

/// A projected map: `NaN` where the sky is undefined, `inside == false`
/// where the cell is off the projected sphere.
#[derive(Debug, Clone)]
pub struct ProjectedImage {
    pub width: usize,
    pub height: usize,
    pub values: Vec<f64>,
    pub inside: Vec<bool>,
    pub projection: Projection,
}

impl ProjectedImage {
    pub fn get(&self, col: usize, row: usize) -> (f64, bool) {
        let i = row * self.width + col;
        (self.values[i], self.inside[i])
    }
}

/// Mollweide auxiliary angle: solve `2t + sin 2t = pi sin(lat)`.
fn mollweide_theta(lat: f64) -> f64 {
    if (FRAC_PI_2 - lat.abs()).abs() < 1e-12 {
        return lat.signum() * FRAC_PI_2;
    }
    let target = PI * lat.sin();
    let mut t = lat;
    for _ in 0..50 {
        let f = 2.0 * t + (2.0 * t).sin() - target;
        let df = 2.0 + 2.0 * (2.0 * t).cos();
        if df.abs() < 1e-15 {
            break;
        }
        let step = f / df;
        t -= step;
        if step.abs() < 1e-13 {
            break;
        }
    }
    t
}

fn wrap_lon(lon: f64) -> f64 {
    (lon + PI).rem_euclid(2.0 * PI) - PI
}

impl Projection {
    pub fn dimensions(&self) -> (usize, usize) {
        match *self {
            Projection::Mollweide { width } => (width, (width / 2).max(1)),
            Projection::Gnomonic { xsize, .. } => (xsize, xsize),
        }
    }

    /// Radians per pixel for gnomonic patches.
    fn gnomonic_resolution(size_deg: f64, xsize: usize) -> f64 {
        size_deg.to_radians() / xsize as f64
    }

    /// Sky position `(lon, lat)` in radians at image coordinates `(x, y)`
    /// (pixels, y down). `None` off the sphere.
    pub fn inverse(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let (w, h) = self.dimensions();
        match *self {
            Projection::Mollweide { .. } => {
                let mx = (x / w as f64) * 4.0 * SQRT_2 - 2.0 * SQRT_2;
                let my = SQRT_2 - (y / h as f64) * 2.0 * SQRT_2;
                if mx * mx / 8.0 + my * my / 2.0 > 1.0 {
                    return None;
                }
                let t = (my / SQRT_2).clamp(-1.0, 1.0).asin();
                let lat = ((2.0 * t + (2.0 * t).sin()) / PI).clamp(-1.0, 1.0).asin();
                let cos_t = t.cos();
                let lon = if cos_t < 1e-12 {
                    0.0
                } else {
                    -PI * mx / (2.0 * SQRT_2 * cos_t)
                };
                (lon.abs() <= PI + 1e-9).then_some((lon, lat))
            }
            Projection::Gnomonic {
                lon,
                lat,
                size_deg,
                xsize,
            } => {
                let res = Self::gnomonic_resolution(size_deg, xsize);
                let half = xsize as f64 / 2.0;
                // East is to the left.
                let px = -(x - half) * res;
                let py = (half - y) * res;
                let (lon0, lat0) = (lon.to_radians(), lat.to_radians());
                let rho = (px * px + py * py).sqrt();
                if rho < 1e-15 {
                    return Some((lon0, lat0));
                }
                let c = rho.atan();
                let (sin_c, cos_c) = c.sin_cos();
                let lat = (cos_c * lat0.sin() + py * sin_c * lat0.cos() / rho)
                    .clamp(-1.0, 1.0)
                    .asin();
                let lon = lon0
                    + (px * sin_c).atan2(rho * lat0.cos() * cos_c - py * lat0.sin() * sin_c);
                Some((wrap_lon(lon), lat))
            }
        }
    }

    /// Image coordinates of a sky position in degrees, or `None` when it is
    /// not visible in this projection. Points may fall outside the image.
    pub fn forward(&self, lon_deg: f64, lat_deg: f64) -> Option<(f64, f64)> {
        let (w, h) = self.dimensions();
        let lon = lon_deg.to_radians();
        let lat = lat_deg.to_radians();
        match *self {
            Projection::Mollweide { .. } => {
                let lon = if lon_deg.abs() == 180.0 {
                    lon
                } else {
                    wrap_lon(lon)
                };
                let t = mollweide_theta(lat);
                let mx = -2.0 * SQRT_2 / PI * lon * t.cos();
                let my = SQRT_2 * t.sin();
                Some((
                    (mx + 2.0 * SQRT_2) / (4.0 * SQRT_2) * w as f64,
                    (SQRT_2 - my) / (2.0 * SQRT_2) * h as f64,
                ))
            }
            Projection::Gnomonic {
                lon: lon0,
                lat: lat0,
                size_deg,
                xsize,
            } => {
                let (lon0, lat0) = (lon0.to_radians(), lat0.to_radians());
                let dlon = lon - lon0;
                let cos_c = lat0.sin() * lat.sin() + lat0.cos() * lat.cos() * dlon.cos();
                if cos_c <= 1e-6 {
                    return None;
                }
                let px = lat.cos() * dlon.sin() / cos_c;
                let py = (lat0.cos() * lat.sin() - lat0.sin() * lat.cos() * dlon.cos()) / cos_c;
                let res = Self::gnomonic_resolution(size_deg, xsize);
                let half = xsize as f64 / 2.0;
                Some((half - px / res, half - py / res))
            }
        }
    }

    /// Graticule spacing in degrees.
    pub fn graticule_step(&self) -> f64 {
        match *self {
            Projection::Mollweide { .. } => 30.0,
            Projection::Gnomonic { size_deg, .. } => nice_step(size_deg / 4.0),
        }
    }

    /// Graticule as polylines in image coordinates, split wherever a line
    /// leaves the visible sky or the image.
    pub fn graticule(&self) -> Vec<Vec<(f64, f64)>> {
        let step = self.graticule_step();
        let (w, h) = self.dimensions();
        let (lats, lons, sample) = match *self {
            Projection::Mollweide { .. } => (
                ticks_between(-90.0 + step, 90.0 - step, step),
                ticks_between(-180.0 + step, 180.0 - step, step),
                1.0,
            ),
            Projection::Gnomonic {
                lon, lat, size_deg, ..
            } => {
                let reach = size_deg;
                let lat_lo = (lat - reach).max(-90.0 + step);
                let lat_hi = (lat + reach).min(90.0 - step);
                let max_abs_lat = lat.abs() + reach;
                let lon_reach = if max_abs_lat >= 89.0 {
                    180.0
                } else {
                    (reach / max_abs_lat.to_radians().cos()).min(180.0)
                };
                (
                    ticks_between(lat_lo, lat_hi, step),
                    ticks_between(lon - lon_reach, lon + lon_reach, step),
                    size_deg / 200.0,
                )
            }
        };

        let (lon_lo, lon_hi) = match (lons.first(), lons.last()) {
            (Some(&a), Some(&b)) => (a - step, b + step),
            _ => (-180.0, 180.0),
        };
        let mut lines = Vec::new();
        for &lat in &lats {
            let n = ((lon_hi - lon_lo) / sample).ceil().max(1.0) as usize;
            let points = (0..=n).map(|i| (lon_lo + (lon_hi - lon_lo) * i as f64 / n as f64, lat));
            self.push_segments(points, (w, h), &mut lines);
        }
        for &lon in &lons {
            let n = (180.0 / sample).ceil() as usize;
            let points = (0..=n).map(|i| (lon, -90.0 + 180.0 * i as f64 / n as f64));
            self.push_segments(points, (w, h), &mut lines);
        }
        lines
    }

    fn push_segments(
        &self,
        points: impl Iterator<Item = (f64, f64)>,
        (w, h): (usize, usize),
        lines: &mut Vec<Vec<(f64, f64)>>,
    ) {
        let in_image = |p: &(f64, f64)| {
            p.0 >= -1.0 && p.0 <= w as f64 + 1.0 && p.1 >= -1.0 && p.1 <= h as f64 + 1.0
        };
        let mut current = Vec::new();
        for (lon, lat) in points {
            match self.forward(lon, lat).filter(in_image) {
                Some(p) => current.push(p),
                None => {
                    if current.len() > 1 {
                        lines.push(std::mem::take(&mut current));
                    }
                    current.clear();
                }
            }
        }
        if current.len() > 1 {
            lines.push(current);
        }
    }
}

/// Multiples of `step` within `[lo, hi]`.
fn ticks_between(lo: f64, hi: f64, step: f64) -> Vec<f64> {
    let first = (lo / step).ceil() as i64;
    let last = (hi / step).floor() as i64;
    (first..=last).map(|k| k as f64 * step).collect()
}

/// Round a spacing to 1, 2 or 5 times a power of ten.
fn nice_step(raw: f64) -> f64 {
    if raw.is_nan() || raw <= 0.0 {
        return 1.0;
    }
    let mag = 10f64.powf(raw.log10().floor());
    let frac = raw / mag;
    let nice = if frac < 1.5 {
        1.0
    } else if frac < 3.5 {
        2.0
    } else if frac < 7.5 {
        5.0
    } else {
        10.0
    };
    nice * mag
}

/// Nearest-pixel projection of `map`.
pub fn project(map: &SkyMap, projection: Projection) -> ProjectedImage {
    let (width, height) = projection.dimensions();
    let nside = map.nside();
    let data = map.data();
    let mut values = vec![f64::NAN; width * height];
    let mut inside = vec![false; width * height];

    for row in 0..height {
        for col in 0..width {
            let Some((lon, lat)) = projection.inverse(col as f64 + 0.5, row as f64 + 0.5) else {
                continue;
            };
            let i = row * width + col;
            inside[i] = true;
            values[i] = data[zphi2pix(nside, lat.sin(), lon)];
        }
    }

    ProjectedImage {
        width,
        height,
        values,
        inside,
        projection,
    }
}
