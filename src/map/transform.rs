use std::path::PathBuf;

use log::{debug, info};
use nalgebra::{Matrix4, Vector4};

use super::harmonic;
use super::healpix::{pix2vec, reorder_nest_to_ring, reorder_ring_to_nest};
use super::loader::load_map;
use super::model::{Mask, Nside, SignalSelector, SkyMap};
use crate::error::{Result, SkyplotError};

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Whether a monopole/dipole is removed, and over which part of the sky.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Removal {
    #[default]
    Off,
    /// Fit over every defined pixel.
    Full,
    /// Fit only over pixels unmasked by the mask file.
    Masked(PathBuf),
}

impl Removal {
    pub fn is_on(&self) -> bool {
        !matches!(self, Removal::Off)
    }
}

/// The optional transform steps, applied in a fixed order by
/// [`apply_transforms`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformOptions {
    pub scale: Option<f64>,
    /// Target resolution; must be a power of two.
    pub nside: Option<u32>,
    /// Gaussian beam FWHM in arcminutes. Zero is a no-op.
    pub fwhm_arcmin: Option<f64>,
    pub remove_monopole: Removal,
    pub remove_dipole: Removal,
    /// Pixels where this mask is below 0.5 end up undefined.
    pub mask: Option<PathBuf>,
    /// Band limit of the source when it came from harmonic coefficients.
    /// Caps the smoothing band limit.
    pub band_limit: Option<usize>,
}

/// Scale, regrade, smooth, remove monopole, remove dipole, mask.
pub fn apply_transforms(map: &SkyMap, opts: &TransformOptions) -> Result<SkyMap> {
    let mut out = match opts.scale {
        Some(k) if k != 1.0 => map.map_defined(|v| v * k),
        _ => map.clone(),
    };

    if let Some(n) = opts.nside {
        out = ud_grade(&out, Nside::power_of_two(n)?)?;
    }

    if let Some(fwhm) = opts.fwhm_arcmin.filter(|f| *f > 0.0) {
        let lmax = match opts.band_limit {
            Some(l) => l.min(out.nside().default_lmax()),
            None => out.nside().default_lmax(),
        };
        out = harmonic::smooth(&out, fwhm, Some(lmax));
    }

    if opts.remove_monopole.is_on() {
        let mask = removal_mask(&opts.remove_monopole)?;
        out = remove_monopole(&out, mask.as_ref())?;
    }
    if opts.remove_dipole.is_on() {
        let mask = removal_mask(&opts.remove_dipole)?;
        out = remove_dipole(&out, mask.as_ref())?;
    }

    if let Some(path) = &opts.mask {
        let mask = load_mask(path)?;
        out = apply_mask(&out, &mask)?;
    }
    Ok(out)
}

fn removal_mask(removal: &Removal) -> Result<Option<Mask>> {
    match removal {
        Removal::Masked(path) => load_mask(path).map(Some),
        _ => Ok(None),
    }
}

/// Masks are always field 0 of a pixel map, at their native resolution.
pub fn load_mask(path: &std::path::Path) -> Result<Mask> {
    Ok(load_map(path, &SignalSelector::field(0), None)?.map)
}

// ---------------------------------------------------------------------------
// Resolution change
// ---------------------------------------------------------------------------

/// Change resolution in the NESTED hierarchy. Degrading averages the
/// defined children; upgrading copies the parent into every child.
pub fn ud_grade(map: &SkyMap, target: Nside) -> Result<SkyMap> {
    let source = map.nside();
    if source == target {
        return Ok(map.clone());
    }
    if !target.is_power_of_two() {
        return Err(SkyplotError::Resolution(target.get()));
    }
    if !source.is_power_of_two() {
        return Err(SkyplotError::UnsupportedResolutionChange {
            from: source.get(),
            to: target.get(),
        });
    }

    let nested = reorder_ring_to_nest(source, map.data());
    let regraded = if target < source {
        let ratio = (source.get() / target.get()) as usize;
        nested
            .chunks(ratio * ratio)
            .map(|children| {
                let (sum, count) = children
                    .iter()
                    .filter(|v| !v.is_nan())
                    .fold((0.0, 0usize), |(s, c), &v| (s + v, c + 1));
                if count == 0 { f64::NAN } else { sum / count as f64 }
            })
            .collect::<Vec<_>>()
    } else {
        let ratio = (target.get() / source.get()) as usize;
        nested
            .iter()
            .flat_map(|&v| std::iter::repeat(v).take(ratio * ratio))
            .collect()
    };

    debug!("regraded nside {source} -> {target}");
    Ok(SkyMap::from_parts(
        target,
        reorder_nest_to_ring(target, &regraded),
    ))
}

/// Boolean view of a mask at the data resolution, thresholded at 0.5.
/// Undefined mask pixels count as masked.
pub fn mask_at(mask: &Mask, nside: Nside) -> Result<Vec<bool>> {
    let regraded = if mask.nside() == nside {
        mask.clone()
    } else if !mask.nside().is_power_of_two() {
        return Err(SkyplotError::UnsupportedResolutionChange {
            from: mask.nside().get(),
            to: nside.get(),
        });
    } else {
        ud_grade(mask, nside)?
    };
    Ok(regraded.data().iter().map(|&v| v >= 0.5).collect())
}

fn usable_pixels(map: &SkyMap, mask: Option<&Mask>) -> Result<Vec<usize>> {
    let keep = match mask {
        Some(m) => Some(mask_at(m, map.nside())?),
        None => None,
    };
    Ok(map
        .data()
        .iter()
        .enumerate()
        .filter(|&(i, v)| v.is_finite() && keep.as_ref().map_or(true, |k| k[i]))
        .map(|(i, _)| i)
        .collect())
}

// ---------------------------------------------------------------------------
// Monopole / dipole
// ---------------------------------------------------------------------------

/// Subtract the mean of the defined, unmasked pixels.
pub fn remove_monopole(map: &SkyMap, mask: Option<&Mask>) -> Result<SkyMap> {
    let pixels = usable_pixels(map, mask)?;
    if pixels.is_empty() {
        return Err(SkyplotError::DegenerateMask {
            needed: 1,
            available: 0,
        });
    }
    let data = map.data();
    let mono = pixels.iter().map(|&p| data[p]).sum::<f64>() / pixels.len() as f64;
    info!("removing monopole {mono:.6e} fitted over {} pixels", pixels.len());
    Ok(map.map_defined(|v| v - mono))
}

/// Least-squares fit of `c0 + d . n` over the defined, unmasked pixels.
/// Returns `(monopole, dipole vector)`.
pub fn fit_dipole(map: &SkyMap, mask: Option<&Mask>) -> Result<(f64, [f64; 3])> {
    let pixels = usable_pixels(map, mask)?;
    let degenerate = SkyplotError::DegenerateMask {
        needed: 4,
        available: pixels.len(),
    };
    if pixels.len() < 4 {
        return Err(degenerate);
    }

    let nside = map.nside();
    let data = map.data();
    let mut ata = Matrix4::<f64>::zeros();
    let mut aty = Vector4::<f64>::zeros();
    for &p in &pixels {
        let [x, y, z] = pix2vec(nside, p);
        let row = Vector4::new(1.0, x, y, z);
        ata += row * row.transpose();
        aty += row * data[p];
    }

    // Reject near-singular systems (e.g. every pixel on one ring).
    let lu = ata.lu();
    let scale = ata.amax();
    if scale == 0.0 || lu.u().diagonal().iter().any(|d| d.abs() < 1e-12 * scale) {
        return Err(degenerate);
    }
    let coeffs = lu.solve(&aty).ok_or(degenerate)?;
    debug!(
        "dipole fit over {} pixels: monopole {:.6e}, d = [{:.6e}, {:.6e}, {:.6e}]",
        pixels.len(),
        coeffs[0],
        coeffs[1],
        coeffs[2],
        coeffs[3]
    );
    Ok((coeffs[0], [coeffs[1], coeffs[2], coeffs[3]]))
}

/// Subtract the best-fit monopole and dipole from every defined pixel.
pub fn remove_dipole(map: &SkyMap, mask: Option<&Mask>) -> Result<SkyMap> {
    let (mono, d) = fit_dipole(map, mask)?;
    info!(
        "removing dipole |d| = {:.6e} (monopole {mono:.6e})",
        (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt()
    );
    let nside = map.nside();
    let data = map
        .data()
        .iter()
        .enumerate()
        .map(|(p, &v)| {
            if v.is_nan() {
                return v;
            }
            let [x, y, z] = pix2vec(nside, p);
            v - mono - d[0] * x - d[1] * y - d[2] * z
        })
        .collect();
    Ok(SkyMap::from_parts(nside, data))
}

// ---------------------------------------------------------------------------
// Masking and differences
// ---------------------------------------------------------------------------

/// Set pixels where the mask is below 0.5 to undefined.
pub fn apply_mask(map: &SkyMap, mask: &Mask) -> Result<SkyMap> {
    let keep = mask_at(mask, map.nside())?;
    let masked = keep.iter().filter(|k| !**k).count();
    debug!("masking {masked} of {} pixels", keep.len());
    let data = map
        .data()
        .iter()
        .zip(keep)
        .map(|(&v, k)| if k { v } else { f64::NAN })
        .collect();
    Ok(SkyMap::from_parts(map.nside(), data))
}

/// `a - b`, pixel by pixel. Undefined in either input is undefined in the
/// result.
pub fn difference(a: &SkyMap, b: &SkyMap) -> Result<SkyMap> {
    if a.nside() != b.nside() {
        return Err(SkyplotError::invalid(format!(
            "cannot difference maps at nside={} and nside={}",
            a.nside(),
            b.nside()
        )));
    }
    let data = a
        .data()
        .iter()
        .zip(b.data())
        .map(|(x, y)| x - y)
        .collect();
    Ok(SkyMap::from_parts(a.nside(), data))
}
