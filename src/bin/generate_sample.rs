//! Writes a small synthetic sky to the current directory:
//!
//! * `sample_cmb_IQU.fits` – CMB-like I/Q/U with a dipole and a monopole
//! * `sample_mask.fits`    – galactic plane cut, |b| < 20° masked
//! * `sample_chain.parquet` – container with a_lm and pixel datasets

use std::path::Path;

use anyhow::Context;
use log::info;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use rustfft::num_complex::Complex64;

use skyplot::map::container::write_container;
use skyplot::map::harmonic::{Alm, alm2map};
use skyplot::map::healpix::pix2vec;
use skyplot::map::{Nside, SkyMap, write_fits_map};

const NSIDE: u32 = 64;
const LMAX: usize = 3 * NSIDE as usize - 1;
/// Bandpower `l(l+1)C_l / 2π` of the flat toy spectrum, μK².
const BANDPOWER: f64 = 1000.0;
const DIPOLE: [f64; 3] = [0.0, -2200.0, 2500.0];
const MONOPOLE: f64 = 40.0;

/// Gaussian a_lm with `C_l ∝ 1/(l(l+1))`, scaled by `amplitude`.
fn random_alm(rng: &mut StdRng, lmax: usize, amplitude: f64) -> anyhow::Result<Alm> {
    let unit = Normal::new(0.0, 1.0).context("unit normal")?;
    let mut alm = Alm::zeros(lmax, lmax);
    for l in 2..=lmax {
        let cl = 2.0 * std::f64::consts::PI * BANDPOWER / (l * (l + 1)) as f64;
        let sigma = amplitude * cl.sqrt();
        alm.set(l, 0, Complex64::new(sigma * unit.sample(rng), 0.0));
        for m in 1..=l {
            let s = sigma / std::f64::consts::SQRT_2;
            alm.set(
                l,
                m,
                Complex64::new(s * unit.sample(rng), s * unit.sample(rng)),
            );
        }
    }
    Ok(alm)
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let mut rng = StdRng::seed_from_u64(42);
    let nside = Nside::power_of_two(NSIDE)?;

    let alm_i = random_alm(&mut rng, LMAX, 1.0)?;
    let alm_q = random_alm(&mut rng, LMAX, 0.01)?;
    let alm_u = random_alm(&mut rng, LMAX, 0.01)?;

    let cmb_i = alm2map(&alm_i, nside);
    let with_dipole: Vec<f64> = cmb_i
        .data()
        .iter()
        .enumerate()
        .map(|(p, &t)| {
            let n = pix2vec(nside, p);
            t + MONOPOLE + DIPOLE[0] * n[0] + DIPOLE[1] * n[1] + DIPOLE[2] * n[2]
        })
        .collect();
    let map_i = SkyMap::new(nside, with_dipole)?;
    let map_q = alm2map(&alm_q, nside);
    let map_u = alm2map(&alm_u, nside);

    write_fits_map(
        Path::new("sample_cmb_IQU.fits"),
        &[("I_STOKES", &map_i), ("Q_STOKES", &map_q), ("U_STOKES", &map_u)],
        Some("uK_CMB"),
    )?;
    info!("wrote sample_cmb_IQU.fits (nside {NSIDE})");

    let mask: Vec<f64> = (0..nside.npix())
        .map(|p| if pix2vec(nside, p)[2].abs() < 20f64.to_radians().sin() { 0.0 } else { 1.0 })
        .collect();
    write_fits_map(
        Path::new("sample_mask.fits"),
        &[("MASK", &SkyMap::new(nside, mask)?)],
        None,
    )?;
    info!("wrote sample_mask.fits");

    // Synchrotron-like positive amplitude brightest in the plane.
    let noise = Normal::new(0.0, 2.0).context("noise normal")?;
    let synch_i: Vec<f64> = (0..nside.npix())
        .map(|p| {
            let z = pix2vec(nside, p)[2];
            (50.0 * (-z.abs() * 6.0).exp() + 5.0 + noise.sample(&mut rng)).max(0.1)
        })
        .collect();
    let synch_q: Vec<f64> = synch_i.iter().map(|v| 0.1 * v * noise.sample(&mut rng) / 2.0).collect();
    let synch_u: Vec<f64> = synch_i.iter().map(|v| 0.1 * v * noise.sample(&mut rng) / 2.0).collect();

    write_container(
        Path::new("sample_chain.parquet"),
        &[
            (
                "000010/cmb/amp_alm",
                vec![alm_i.to_real(), alm_q.to_real(), alm_u.to_real()],
            ),
            ("000010/cmb/amp_lmax", vec![vec![LMAX as f64]]),
            ("000010/synch/amp_map", vec![synch_i, synch_q, synch_u]),
        ],
    )?;
    info!("wrote sample_chain.parquet (lmax {LMAX})");

    println!("Wrote sample_cmb_IQU.fits, sample_mask.fits and sample_chain.parquet");
    Ok(())
}
