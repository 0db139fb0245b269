//! HEALPix pixelization geometry.
//!
//! Only what the renderer needs: ring layout, pixel ↔ direction in the RING
//! scheme (valid for any nside) and NESTED ↔ RING reordering (powers of two).

use std::f64::consts::{FRAC_PI_2, PI};

use super::model::Nside;

const TWO_PI: f64 = 2.0 * PI;

/// One iso-latitude ring of pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ring {
    /// cos(theta) of the ring centre.
    pub z: f64,
    /// sin(theta), computed without cancellation near the poles.
    pub sin_theta: f64,
    /// Longitude of the first pixel centre.
    pub phi0: f64,
    /// Number of pixels in the ring.
    pub nphi: usize,
    /// RING index of the first pixel.
    pub start: usize,
}

/// All `4 * nside - 1` rings from north to south.
pub fn rings(nside: Nside) -> Vec<Ring> {
    let n = nside.get() as usize;
    let npix = nside.npix();
    let ncap = 2 * n * (n - 1);
    let nf = n as f64;

    (1..4 * n)
        .map(|i| {
            let (z, nphi, start, phi0) = if i < n {
                let fi = i as f64;
                (1.0 - fi * fi / (3.0 * nf * nf), 4 * i, 2 * i * (i - 1), PI / (4.0 * fi))
            } else if i <= 3 * n {
                let fodd = if (i + n) % 2 == 1 { 1.0 } else { 0.5 };
                (
                    (2.0 * nf - i as f64) * 2.0 / (3.0 * nf),
                    4 * n,
                    ncap + (i - n) * 4 * n,
                    (1.0 - fodd) * FRAC_PI_2 / nf,
                )
            } else {
                let ii = 4 * n - i;
                let fi = ii as f64;
                (
                    -(1.0 - fi * fi / (3.0 * nf * nf)),
                    4 * ii,
                    npix - 2 * ii * (ii + 1),
                    PI / (4.0 * fi),
                )
            };
            Ring {
                z,
                sin_theta: ((1.0 - z) * (1.0 + z)).max(0.0).sqrt(),
                phi0,
                nphi,
                start,
            }
        })
        .collect()
}

fn isqrt(v: u64) -> u64 {
    let mut r = (v as f64).sqrt() as u64;
    while r * r > v {
        r -= 1;
    }
    while (r + 1) * (r + 1) <= v {
        r += 1;
    }
    r
}

/// Centre of a RING pixel as `(z, phi)`.
pub fn pix2zphi(nside: Nside, pix: usize) -> (f64, f64) {
    let n = nside.get() as u64;
    let nf = n as f64;
    let npix = nside.npix() as u64;
    let ncap = 2 * n * (n - 1);
    let pix = pix as u64;
    let fact2 = 4.0 / npix as f64;

    if pix < ncap {
        let iring = (1 + isqrt(1 + 2 * pix)) >> 1;
        let iphi = pix + 1 - 2 * iring * (iring - 1);
        let z = 1.0 - (iring * iring) as f64 * fact2;
        let phi = (iphi as f64 - 0.5) * FRAC_PI_2 / iring as f64;
        (z, phi)
    } else if pix < npix - ncap {
        let ip = pix - ncap;
        let tmp = ip / (4 * n);
        let iring = tmp + n;
        let iphi = ip - tmp * 4 * n + 1;
        let fodd = if (iring + n) & 1 == 1 { 1.0 } else { 0.5 };
        let z = (2.0 * nf - iring as f64) * 2.0 / (3.0 * nf);
        let phi = (iphi as f64 - fodd) * FRAC_PI_2 / nf;
        (z, phi)
    } else {
        let ip = npix - pix;
        let iring = (1 + isqrt(2 * ip - 1)) >> 1;
        let iphi = 4 * iring + 1 - (ip - 2 * iring * (iring - 1));
        let z = -1.0 + (iring * iring) as f64 * fact2;
        let phi = (iphi as f64 - 0.5) * FRAC_PI_2 / iring as f64;
        (z, phi)
    }
}

/// RING pixel containing the direction `(z, phi)`.
pub fn zphi2pix(nside: Nside, z: f64, phi: f64) -> usize {
    let n = nside.get() as i64;
    let nf = n as f64;
    let npix = nside.npix() as i64;
    let ncap = 2 * n * (n - 1);
    let nl4 = 4 * n;

    let za = z.abs();
    let tt = phi.rem_euclid(TWO_PI) / FRAC_PI_2;

    if za <= 2.0 / 3.0 {
        let temp1 = nf * (0.5 + tt);
        let temp2 = nf * z * 0.75;
        let jp = (temp1 - temp2).floor() as i64;
        let jm = (temp1 + temp2).floor() as i64;
        let ir = n + 1 + jp - jm;
        let kshift = 1 - (ir & 1);
        let t1 = jp + jm - n + kshift + 1 + 2 * nl4;
        let ip = (t1 >> 1).rem_euclid(nl4);
        (ncap + (ir - 1) * nl4 + ip) as usize
    } else {
        let tp = tt - tt.floor();
        let tmp = nf * (3.0 * (1.0 - za)).sqrt();
        let jp = (tp * tmp).floor() as i64;
        let jm = ((1.0 - tp) * tmp).floor() as i64;
        let ir = (jp + jm + 1).min(n);
        let ip = ((tt * ir as f64).floor() as i64).rem_euclid(4 * ir);
        if z > 0.0 {
            (2 * ir * (ir - 1) + ip) as usize
        } else {
            (npix - 2 * ir * (ir + 1) + ip) as usize
        }
    }
}

/// Colatitude/longitude (radians) of a RING pixel centre.
pub fn pix2ang(nside: Nside, pix: usize) -> (f64, f64) {
    let (z, phi) = pix2zphi(nside, pix);
    (z.clamp(-1.0, 1.0).acos(), phi)
}

/// RING pixel containing colatitude `theta` and longitude `phi` (radians).
pub fn ang2pix(nside: Nside, theta: f64, phi: f64) -> usize {
    zphi2pix(nside, theta.cos(), phi)
}

/// Unit vector of a RING pixel centre.
pub fn pix2vec(nside: Nside, pix: usize) -> [f64; 3] {
    let (z, phi) = pix2zphi(nside, pix);
    let s = ((1.0 - z) * (1.0 + z)).max(0.0).sqrt();
    [s * phi.cos(), s * phi.sin(), z]
}

/// RING pixel containing direction `v` (need not be normalised).
pub fn vec2pix(nside: Nside, v: [f64; 3]) -> usize {
    let norm = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
    let z = v[2] / norm;
    let phi = v[1].atan2(v[0]);
    zphi2pix(nside, z, phi)
}

/// RING pixel at galactic longitude/latitude in degrees.
pub fn lonlat2pix(nside: Nside, lon_deg: f64, lat_deg: f64) -> usize {
    zphi2pix(nside, lat_deg.to_radians().sin(), lon_deg.to_radians())
}

// ---------------------------------------------------------------------------
// NESTED <-> RING
// ---------------------------------------------------------------------------

const JRLL: [i64; 12] = [2, 2, 2, 2, 3, 3, 3, 3, 4, 4, 4, 4];
const JPLL: [i64; 12] = [1, 3, 5, 7, 0, 2, 4, 6, 1, 3, 5, 7];

fn compress_bits(mut v: u64) -> u64 {
    let mut out = 0;
    let mut bit = 0;
    while v != 0 {
        out |= (v & 1) << bit;
        v >>= 2;
        bit += 1;
    }
    out
}

/// RING index of a NESTED pixel. `nside` must be a power of two.
pub fn nest2ring(nside: Nside, pix: usize) -> usize {
    debug_assert!(nside.is_power_of_two());
    let n = nside.get() as i64;
    let npix = nside.npix() as i64;
    let ncap = 2 * n * (n - 1);
    let npface = (n * n) as u64;

    let face = (pix as u64 / npface) as usize;
    let ipf = pix as u64 % npface;
    let ix = compress_bits(ipf) as i64;
    let iy = compress_bits(ipf >> 1) as i64;

    let jr = JRLL[face] * n - ix - iy - 1;
    let (nr, n_before, kshift) = if jr < n {
        (jr, 2 * jr * (jr - 1), 0)
    } else if jr > 3 * n {
        let nr = 4 * n - jr;
        (nr, npix - 2 * (nr + 1) * nr, 0)
    } else {
        (n, ncap + (jr - n) * 4 * n, (jr - n) & 1)
    };

    let mut jp = (JPLL[face] * nr + ix - iy + 1 + kshift) / 2;
    if jp > 4 * n {
        jp -= 4 * n;
    }
    if jp < 1 {
        jp += 4 * n;
    }
    (n_before + jp - 1) as usize
}

/// Permutation table: `table[nest] = ring`.
pub fn nest_to_ring_table(nside: Nside) -> Vec<usize> {
    (0..nside.npix()).map(|p| nest2ring(nside, p)).collect()
}

/// Reorder NESTED samples into RING order.
pub fn reorder_nest_to_ring(nside: Nside, nested: &[f64]) -> Vec<f64> {
    let mut ring = vec![f64::NAN; nested.len()];
    for (nest, r) in nest_to_ring_table(nside).into_iter().enumerate() {
        ring[r] = nested[nest];
    }
    ring
}

/// Reorder RING samples into NESTED order.
pub fn reorder_ring_to_nest(nside: Nside, ring: &[f64]) -> Vec<f64> {
    nest_to_ring_table(nside)
        .into_iter()
        .map(|r| ring[r])
        .collect()
}
