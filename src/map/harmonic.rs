//! Spherical-harmonic transforms on the HEALPix RING grid.
//!
//! Synthesis and analysis run ring by ring: an associated-Legendre sum along
//! each iso-latitude ring, followed by an FFT in longitude. Analysis uses the
//! plain pixel quadrature (weight `4π / npix`) refined by Jacobi iterations.

use std::f64::consts::PI;

use rustfft::FftPlanner;
use rustfft::num_complex::Complex64;

use super::healpix::{Ring, rings};
use super::model::{Nside, SkyMap};
use crate::error::{Result, SkyplotError};

// ---------------------------------------------------------------------------
// Alm – complex coefficients for m >= 0
// ---------------------------------------------------------------------------

/// Harmonic coefficients of a real field, stored for `m >= 0` in healpy order
/// (`m`-major, `idx = m (2 lmax + 1 - m) / 2 + l`).
#[derive(Debug, Clone, PartialEq)]
pub struct Alm {
    lmax: usize,
    mmax: usize,
    coeffs: Vec<Complex64>,
}

impl Alm {
    pub fn zeros(lmax: usize, mmax: usize) -> Self {
        let mmax = mmax.min(lmax);
        let n = (mmax + 1) * (2 * lmax + 2 - mmax) / 2;
        Alm {
            lmax,
            mmax,
            coeffs: vec![Complex64::new(0.0, 0.0); n],
        }
    }

    pub fn lmax(&self) -> usize {
        self.lmax
    }

    pub fn mmax(&self) -> usize {
        self.mmax
    }

    fn index(&self, l: usize, m: usize) -> usize {
        m * (2 * self.lmax + 1 - m) / 2 + l
    }

    pub fn get(&self, l: usize, m: usize) -> Complex64 {
        self.coeffs[self.index(l, m)]
    }

    pub fn set(&mut self, l: usize, m: usize, value: Complex64) {
        let i = self.index(l, m);
        self.coeffs[i] = value;
    }

    /// Coefficients `a_lm` for fixed `m`, `l = m..=lmax`.
    fn column(&self, m: usize) -> &[Complex64] {
        let start = self.index(m, m);
        &self.coeffs[start..start + self.lmax + 1 - m]
    }

    fn column_mut(&mut self, m: usize) -> &mut [Complex64] {
        let start = self.index(m, m);
        let len = self.lmax + 1 - m;
        &mut self.coeffs[start..start + len]
    }

    /// Build from real-basis coefficients: `(lmax + 1)^2` values, index
    /// `l^2 + l + m` for `m` in `-l..=l`; `a_lm = (r_lm - i r_l,-m) / sqrt 2`
    /// for `m > 0`.
    pub fn from_real(real: &[f64], lmax: Option<usize>) -> Result<Self> {
        let lmax = match lmax {
            Some(l) => l,
            None => {
                let root = (real.len() as f64).sqrt().round() as usize;
                if root == 0 || root * root != real.len() {
                    return Err(SkyplotError::invalid(format!(
                        "{} real coefficients is not (lmax+1)^2",
                        real.len()
                    )));
                }
                root - 1
            }
        };
        if real.len() < (lmax + 1) * (lmax + 1) {
            return Err(SkyplotError::invalid(format!(
                "lmax={lmax} needs {} real coefficients, found {}",
                (lmax + 1) * (lmax + 1),
                real.len()
            )));
        }

        let mut alm = Alm::zeros(lmax, lmax);
        let sqrt2 = std::f64::consts::SQRT_2;
        for l in 0..=lmax {
            let base = l * l + l;
            alm.set(l, 0, Complex64::new(real[base], 0.0));
            for m in 1..=l {
                let re = real[base + m];
                let im = -real[base - m];
                alm.set(l, m, Complex64::new(re, im) / sqrt2);
            }
        }
        Ok(alm)
    }

    /// Inverse of [`Alm::from_real`].
    pub fn to_real(&self) -> Vec<f64> {
        let sqrt2 = std::f64::consts::SQRT_2;
        let mut real = vec![0.0; (self.lmax + 1) * (self.lmax + 1)];
        for l in 0..=self.lmax {
            let base = l * l + l;
            real[base] = self.get(l, 0).re;
            for m in 1..=l.min(self.mmax) {
                let a = self.get(l, m);
                real[base + m] = sqrt2 * a.re;
                real[base - m] = -sqrt2 * a.im;
            }
        }
        real
    }

    /// Multiply every `a_lm` by `fl[l]`.
    pub fn almxfl(&self, fl: &[f64]) -> Alm {
        let mut out = self.clone();
        for m in 0..=self.mmax {
            for (offset, a) in out.column_mut(m).iter_mut().enumerate() {
                *a *= fl.get(m + offset).copied().unwrap_or(0.0);
            }
        }
        out
    }

    fn add_assign(&mut self, other: &Alm) {
        for (a, b) in self.coeffs.iter_mut().zip(other.coeffs.iter()) {
            *a += *b;
        }
    }
}

/// Gaussian beam window `b_l = exp(-l(l+1) sigma^2 / 2)`.
pub fn gaussian_beam(fwhm_arcmin: f64, lmax: usize) -> Vec<f64> {
    let fwhm = (fwhm_arcmin / 60.0).to_radians();
    let sigma = fwhm / (8.0 * 2f64.ln()).sqrt();
    (0..=lmax)
        .map(|l| {
            let l = l as f64;
            (-0.5 * l * (l + 1.0) * sigma * sigma).exp()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Normalised associated Legendre functions
// ---------------------------------------------------------------------------

/// `ln` of the normalisation of `lambda_mm`, for `m = 0..=mmax`.
fn log_mm_norms(mmax: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(mmax + 1);
    let mut acc = (1.0 / (4.0 * PI)).ln();
    out.push(0.5 * acc);
    for m in 1..=mmax {
        let k = m as f64;
        acc += ((2.0 * k - 1.0) / (2.0 * k)).ln();
        out.push(0.5 * (acc + (2.0 * k + 1.0).ln()));
    }
    out
}

/// Fill `out[l - m]` with `lambda_lm(theta)` for `l = m..=lmax`.
/// Returns false when every value underflows to zero.
fn legendre_column(ring: &Ring, m: usize, lmax: usize, log_norm: f64, out: &mut [f64]) -> bool {
    let log_mm = log_norm + m as f64 * ring.sin_theta.ln();
    if log_mm < -700.0 {
        return false;
    }
    let sign = if m % 2 == 1 { -1.0 } else { 1.0 };
    let x = ring.z;
    let mf = m as f64;

    out[0] = sign * log_mm.exp();
    if lmax > m {
        out[1] = x * (2.0 * mf + 3.0).sqrt() * out[0];
    }
    for l in m + 2..=lmax {
        let lf = l as f64;
        let a = ((4.0 * lf * lf - 1.0) / (lf * lf - mf * mf)).sqrt();
        let lm1 = lf - 1.0;
        let b = ((lm1 * lm1 - mf * mf) / (4.0 * lm1 * lm1 - 1.0)).sqrt();
        out[l - m] = a * (x * out[l - m - 1] - b * out[l - m - 2]);
    }
    true
}

// ---------------------------------------------------------------------------
// Transforms
// ---------------------------------------------------------------------------

/// Synthesize a RING map at `nside` from `alm`.
pub fn alm2map(alm: &Alm, nside: Nside) -> SkyMap {
    let lmax = alm.lmax();
    let mmax = alm.mmax();
    let norms = log_mm_norms(mmax);
    let mut planner = FftPlanner::<f64>::new();
    let mut data = vec![0.0; nside.npix()];
    let mut lambda = vec![0.0; lmax + 1];

    for ring in rings(nside) {
        let mut buf = vec![Complex64::new(0.0, 0.0); ring.nphi];
        for m in 0..=mmax {
            let column = &mut lambda[..lmax + 1 - m];
            if !legendre_column(&ring, m, lmax, norms[m], column) {
                continue;
            }
            let fm: Complex64 = alm
                .column(m)
                .iter()
                .zip(column.iter())
                .map(|(a, &lam)| *a * lam)
                .sum();
            let weight = if m == 0 { 1.0 } else { 2.0 };
            let phase = Complex64::from_polar(1.0, m as f64 * ring.phi0);
            buf[m % ring.nphi] += fm * phase * weight;
        }
        planner.plan_fft_inverse(ring.nphi).process(&mut buf);
        for (j, v) in buf.iter().enumerate() {
            data[ring.start + j] = v.re;
        }
    }

    SkyMap::from_parts(nside, data)
}

fn analysis_pass(data: &[f64], nside: Nside, lmax: usize, mmax: usize) -> Alm {
    let norms = log_mm_norms(mmax);
    let mut planner = FftPlanner::<f64>::new();
    let mut alm = Alm::zeros(lmax, mmax);
    let mut lambda = vec![0.0; lmax + 1];
    let weight = 4.0 * PI / nside.npix() as f64;

    for ring in rings(nside) {
        let mut buf: Vec<Complex64> = data[ring.start..ring.start + ring.nphi]
            .iter()
            .map(|&v| Complex64::new(if v.is_finite() { v } else { 0.0 }, 0.0))
            .collect();
        planner.plan_fft_forward(ring.nphi).process(&mut buf);

        for m in 0..=alm.mmax() {
            let column = &mut lambda[..lmax + 1 - m];
            if !legendre_column(&ring, m, lmax, norms[m], column) {
                continue;
            }
            let phase = Complex64::from_polar(1.0, -(m as f64) * ring.phi0);
            let gm = buf[m % ring.nphi] * phase * weight;
            for (a, &lam) in alm.column_mut(m).iter_mut().zip(column.iter()) {
                *a += gm * lam;
            }
        }
    }
    alm
}

/// Analyse a RING map into `a_lm` up to `lmax`, with `iterations` Jacobi
/// refinements. Non-finite samples count as zero.
pub fn map2alm(map: &SkyMap, lmax: usize, iterations: usize) -> Alm {
    let nside = map.nside();
    let mut alm = analysis_pass(map.data(), nside, lmax, lmax);
    for _ in 0..iterations {
        let model = alm2map(&alm, nside);
        let residual: Vec<f64> = map
            .data()
            .iter()
            .zip(model.data())
            .map(|(&v, &m)| if v.is_finite() { v - m } else { 0.0 })
            .collect();
        alm.add_assign(&analysis_pass(&residual, nside, lmax, lmax));
    }
    alm
}

/// Convolve a map with a symmetric Gaussian beam.
///
/// Undefined pixels are zero-filled for the transform and stay undefined in
/// the result. `lmax` defaults to `3 nside - 1` and is capped there.
pub fn smooth(map: &SkyMap, fwhm_arcmin: f64, lmax: Option<usize>) -> SkyMap {
    if fwhm_arcmin <= 0.0 {
        return map.clone();
    }
    let nside = map.nside();
    let lmax = lmax
        .unwrap_or(nside.default_lmax())
        .min(nside.default_lmax());
    log::debug!("smoothing nside={nside} map with fwhm={fwhm_arcmin}' up to lmax={lmax}");

    let alm = map2alm(map, lmax, 3).almxfl(&gaussian_beam(fwhm_arcmin, lmax));
    let smoothed = alm2map(&alm, nside);
    let data = map
        .data()
        .iter()
        .zip(smoothed.data())
        .map(|(&orig, &s)| if orig.is_nan() { f64::NAN } else { s })
        .collect();
    SkyMap::from_parts(nside, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::healpix::pix2vec;
    use approx::assert_relative_eq;

    #[test]
    fn real_coefficients_convert_both_ways() {
        let real: Vec<f64> = (0..16).map(|i| (i as f64 * 0.37).sin()).collect();
        let alm = Alm::from_real(&real, None).unwrap();
        assert_eq!(alm.lmax(), 3);
        let back = alm.to_real();
        for (a, b) in real.iter().zip(back.iter()) {
            assert_relative_eq!(a, b, epsilon = 1e-12);
        }
        assert!(Alm::from_real(&real[..15], None).is_err());
    }

    #[test]
    fn monopole_synthesis_is_constant() {
        let nside = Nside::new(4).unwrap();
        let mut alm = Alm::zeros(8, 8);
        alm.set(0, 0, Complex64::new(2.0 * (4.0 * PI).sqrt(), 0.0));
        let map = alm2map(&alm, nside);
        for &v in map.data() {
            assert_relative_eq!(v, 2.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn synthesis_of_z_dipole_follows_cos_theta() {
        let nside = Nside::new(4).unwrap();
        let mut alm = Alm::zeros(4, 4);
        // Y_10 = sqrt(3 / 4pi) cos(theta)
        alm.set(1, 0, Complex64::new((4.0 * PI / 3.0).sqrt(), 0.0));
        let map = alm2map(&alm, nside);
        for (p, &v) in map.data().iter().enumerate() {
            assert_relative_eq!(v, pix2vec(nside, p)[2], epsilon = 1e-10);
        }
    }

    #[test]
    fn analysis_recovers_band_limited_map() {
        let nside = Nside::new(8).unwrap();
        let mut alm = Alm::zeros(10, 10);
        alm.set(0, 0, Complex64::new(1.0, 0.0));
        alm.set(2, 1, Complex64::new(0.5, -0.25));
        alm.set(7, 3, Complex64::new(-0.3, 0.1));
        let map = alm2map(&alm, nside);
        let recovered = map2alm(&map, 10, 3);
        for (l, m) in [(0, 0), (2, 1), (7, 3), (5, 5)] {
            let (a, b) = (alm.get(l, m), recovered.get(l, m));
            assert!((a - b).norm() < 1e-4, "l={l} m={m}: {a} vs {b}");
        }
    }

    #[test]
    fn beam_is_one_at_monopole_and_decreasing() {
        let beam = gaussian_beam(60.0, 200);
        assert_eq!(beam[0], 1.0);
        assert!(beam.windows(2).all(|w| w[1] <= w[0]));
        assert!(beam[200] < beam[10]);
    }

    #[test]
    fn smoothing_keeps_constant_map_and_zero_fwhm_is_identity() {
        let nside = Nside::new(8).unwrap();
        let map = SkyMap::constant(nside, 3.0);
        let smoothed = smooth(&map, 120.0, None);
        for &v in smoothed.data() {
            assert_relative_eq!(v, 3.0, epsilon = 3e-3);
        }
        assert_eq!(smooth(&map, 0.0, None), map);
    }
}
