//! End-to-end renders through the public API.
//!
//! Titles are suppressed (explicit empty strings) so the scenarios do not
//! depend on system fonts.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use skyplot::config::{RenderSpec, Settings, merge_layers};
use skyplot::infer::infer;
use skyplot::map::container::write_container;
use skyplot::map::healpix::pix2vec;
use skyplot::map::{
    Nside, Removal, SignalSelector, SkyMap, TransformOptions, apply_transforms, load_map,
    write_fits_map,
};
use skyplot::pipeline::difference_source;
use skyplot::range::RangeMode;
use skyplot::render::Colormap;
use skyplot::{MapSource, RenderRequest, SkyplotError, View, render};

fn untitled() -> Settings {
    Settings {
        title: Some(String::new()),
        left_title: Some(String::new()),
        size: Some("x".into()),
        ..Default::default()
    }
}

fn memory_request(name: &str, map: SkyMap, out_dir: &Path) -> RenderRequest {
    let mut request = RenderRequest::new(
        MapSource::Memory {
            name: name.into(),
            map,
        },
        SignalSelector::field(0),
    );
    request.settings = untitled();
    request.out_dir = out_dir.to_path_buf();
    request
}

fn write_mask(dir: &Path, nside: Nside, value: f64) -> PathBuf {
    let path = dir.join(format!("mask_{value}.fits"));
    let mask = SkyMap::constant(nside, value);
    write_fits_map(&path, &[("MASK", &mask)], None).unwrap();
    path
}

fn distinct_colors(path: &Path) -> HashSet<[u8; 3]> {
    let img = image::open(path).unwrap().to_rgb8();
    img.pixels().map(|p| p.0).collect()
}

#[test]
fn constant_map_renders_one_colour() {
    let dir = tempfile::tempdir().unwrap();
    let nside = Nside::new(8).unwrap();
    let mut request = memory_request("flat", SkyMap::constant(nside, 5.0), dir.path());
    request.auto = false;
    request.settings.mode = Some(RangeMode::MinMax);
    request.transforms.mask = Some(write_mask(dir.path(), nside, 1.0));

    let files = render(&request).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(
        files[0].file_name().unwrap().to_str().unwrap(),
        "flat_I_masked_c-planck_w7.png"
    );

    let planck_mid = Colormap::by_name("planck", false).unwrap().color(0.5);
    let colors = distinct_colors(&files[0]);
    let expected: HashSet<[u8; 3]> = [[255, 255, 255], [planck_mid.0, planck_mid.1, planck_mid.2]]
        .into_iter()
        .collect();
    assert_eq!(colors, expected);
}

#[test]
fn fully_masked_map_has_no_data_pixels() {
    let dir = tempfile::tempdir().unwrap();
    let nside = Nside::new(4).unwrap();
    let mut rng = StdRng::seed_from_u64(3);
    let data = (0..nside.npix()).map(|_| rng.random_range(-1.0..1.0)).collect();
    let mut request = memory_request("noise", SkyMap::new(nside, data).unwrap(), dir.path());
    request.auto = false;
    request.transforms.mask = Some(write_mask(dir.path(), nside, 0.0));

    let files = render(&request).unwrap();
    let colors = distinct_colors(&files[0]);
    assert_eq!(colors, [[255, 255, 255]].into_iter().collect());

    request.settings.mask_fill = Some("#808080".into());
    let files = render(&request).unwrap();
    let colors = distinct_colors(&files[0]);
    assert_eq!(colors, [[255, 255, 255], [128, 128, 128]].into_iter().collect());
}

#[test]
fn all_ones_mask_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let nside = Nside::new(8).unwrap();
    let data: Vec<f64> = (0..nside.npix()).map(|p| (p as f64).sin()).collect();
    let map = SkyMap::new(nside, data).unwrap();
    let opts = TransformOptions {
        mask: Some(write_mask(dir.path(), Nside::new(2).unwrap(), 1.0)),
        ..Default::default()
    };
    assert_eq!(apply_transforms(&map, &opts).unwrap(), map);
}

#[test]
fn injected_dipole_is_removed() {
    let nside = Nside::new(16).unwrap();
    let data = (0..nside.npix())
        .map(|p| {
            let n = pix2vec(nside, p);
            12.0 + 3.0 * n[0] - 2.0 * n[1] + 0.5 * n[2]
        })
        .collect();
    let map = SkyMap::new(nside, data).unwrap();
    let opts = TransformOptions {
        remove_dipole: Removal::Full,
        ..Default::default()
    };
    let cleaned = apply_transforms(&map, &opts).unwrap();
    let worst = cleaned.data().iter().fold(0.0f64, |m, v| m.max(v.abs()));
    assert!(worst < 1e-6, "residual {worst}");
}

#[test]
fn non_power_of_two_resolution_cannot_change() {
    let dir = tempfile::tempdir().unwrap();
    let map = SkyMap::constant(Nside::new(3).unwrap(), 1.0);
    let mut request = memory_request("odd", map, dir.path());
    request.transforms.nside = Some(8);
    let failure = render(&request).unwrap_err();
    assert!(matches!(
        failure.source,
        SkyplotError::UnsupportedResolutionChange { from: 3, to: 8 }
    ));
    assert_eq!(failure.input, "odd");
    assert!(failure.to_string().contains("UnsupportedResolutionChange"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn non_power_of_two_map_still_renders() {
    let dir = tempfile::tempdir().unwrap();
    let map = SkyMap::constant(Nside::new(3).unwrap(), 1.0);
    let request = memory_request("odd", map, dir.path());
    assert_eq!(render(&request).unwrap().len(), 1);
}

#[test]
fn explicit_settings_override_inferred() {
    let nside = Nside::new(4).unwrap();
    let map = SkyMap::constant(nside, 20.0);
    let selector = SignalSelector::field(0);
    let inferred = infer(Path::new("BP_cmb_IQU.fits"), &selector, &map, None);
    assert_eq!(inferred.symmetric, Some(300.0));

    let explicit = Settings {
        min: Some(-50.0),
        max: Some(50.0),
        cmap: Some("bone".into()),
        ..Default::default()
    };
    let merged = merge_layers(&explicit, Some(&inferred), &Settings::base());
    let spec = RenderSpec::resolve(&merged, map.data()).unwrap();
    assert_eq!((spec.range.min, spec.range.max), (-50.0, 50.0));
    assert_eq!(spec.cmap, "bone");
    assert_eq!(spec.unit.as_deref(), Some("μK_CMB"));
}

#[test]
fn fits_round_trip_at_several_resolutions() {
    let dir = tempfile::tempdir().unwrap();
    let mut rng = StdRng::seed_from_u64(11);
    for n in [1u32, 2, 8, 32] {
        let nside = Nside::power_of_two(n).unwrap();
        let mut data: Vec<f64> = (0..nside.npix()).map(|_| rng.random_range(-1e3..1e3)).collect();
        data[0] = f64::NAN;
        let map = SkyMap::new(nside, data).unwrap();
        let path = dir.path().join(format!("rt_{n}.fits"));
        write_fits_map(&path, &[("T", &map), ("Q", &map)], None).unwrap();

        let loaded = load_map(&path, &SignalSelector::field(1), None).unwrap();
        assert_eq!(loaded.map.nside(), nside);
        assert!(loaded.map.data()[0].is_nan());
        assert_eq!(&loaded.map.data()[1..], &map.data()[1..]);
    }
}

#[test]
fn output_names_are_deterministic_and_overwritten() {
    let dir = tempfile::tempdir().unwrap();
    let nside = Nside::new(4).unwrap();
    let map = SkyMap::new(nside, (0..nside.npix()).map(|p| p as f64).collect()).unwrap();
    let mut request = memory_request("ramp", map, dir.path());
    request.settings.size = Some("xs".into());

    let first = render(&request).unwrap();
    let second = render(&request).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 2);
    assert!(first[0].ends_with("ramp_I_c-planck_w7.png"));
    assert!(first[1].ends_with("ramp_I_c-planck_w8.8.png"));
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 2);
}

#[test]
fn harmonic_container_renders_with_band_limit_smoothing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chain_c0001.parquet");
    let lmax = 8usize;
    let mut real = vec![0.0; (lmax + 1) * (lmax + 1)];
    real[0] = 10.0;
    real[2] = 3.0;
    write_container(
        &path,
        &[
            ("000001/cmb/amp_alm", vec![real]),
            ("000001/cmb/amp_lmax", vec![vec![lmax as f64]]),
        ],
    )
    .unwrap();

    let mut request = RenderRequest::new(
        MapSource::File(path),
        SignalSelector::dataset("000001/cmb/amp_alm", 0),
    );
    request.settings = untitled();
    request.out_dir = dir.path().join("figs");
    let files = render(&request).unwrap();
    assert_eq!(files.len(), 1);
    assert_eq!(
        files[0].file_name().unwrap().to_str().unwrap(),
        "chain_c0001_000001-cmb-amp_alm_I_1350arcmin_c-planck_w7.png"
    );
}

#[test]
fn svg_output_is_written() {
    let dir = tempfile::tempdir().unwrap();
    let map = SkyMap::constant(Nside::new(2).unwrap(), 1.0);
    let mut request = memory_request("flat", map, dir.path());
    request.settings.format = Some(skyplot::config::OutputFormat::Svg);
    request.outname = Some("figure".into());
    let files = render(&request).unwrap();
    assert_eq!(files, vec![dir.path().join("figure.svg")]);
    let text = std::fs::read_to_string(&files[0]).unwrap();
    assert!(text.contains("<svg"));
}

#[test]
fn missing_file_reports_input() {
    let dir = tempfile::tempdir().unwrap();
    let mut request = RenderRequest::new(
        MapSource::File(dir.path().join("absent.fits")),
        SignalSelector::field(0),
    );
    request.out_dir = dir.path().to_path_buf();
    let failure = render(&request).unwrap_err();
    assert!(failure.input.ends_with("absent.fits"));
}

#[test]
fn undefined_pixels_are_transparent_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let nside = Nside::new(8).unwrap();
    let data = (0..nside.npix())
        .map(|p| if pix2vec(nside, p)[2] > 0.5 { f64::NAN } else { p as f64 })
        .collect();
    let request = memory_request("holes", SkyMap::new(nside, data).unwrap(), dir.path());

    let files = render(&request).unwrap();
    let decoded = image::open(&files[0]).unwrap();
    assert_eq!(decoded.color(), image::ColorType::Rgba8);
    let rgba = decoded.to_rgba8();
    let (w, h) = rgba.dimensions();
    // Off-sky corner, a northern cap pixel and the map centre.
    assert_eq!(rgba.get_pixel(0, 0).0[3], 0);
    assert_eq!(rgba.get_pixel(w / 2, h / 20).0[3], 0);
    assert_eq!(rgba.get_pixel(w / 2, h / 2).0[3], 255);

    let mut opaque = request.clone();
    opaque.settings.background = Some("white".into());
    let files = render(&opaque).unwrap();
    assert_eq!(image::open(&files[0]).unwrap().color(), image::ColorType::Rgb8);
}

#[test]
fn gnomonic_view_renders_with_deterministic_name() {
    let dir = tempfile::tempdir().unwrap();
    let nside = Nside::new(8).unwrap();
    let map = SkyMap::new(nside, (0..nside.npix()).map(|p| p as f64).collect()).unwrap();
    let mut request = memory_request("ramp", map, dir.path());
    request.view = View::Gnomonic {
        lon: -30.0,
        lat: 70.5,
        size_deg: 10.0,
        xsize: 64,
    };

    let first = render(&request).unwrap();
    let second = render(&request).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), 1);
    assert_eq!(
        first[0].file_name().unwrap().to_str().unwrap(),
        "ramp_I_gnomonic_-30lon70.5lat_10x10deg.png"
    );
    let decoded = image::open(&first[0]).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (64, 64));
}

#[test]
fn dipole_fit_restricted_to_mask_file() {
    let dir = tempfile::tempdir().unwrap();
    let nside = Nside::new(8).unwrap();
    // Pure monopole + dipole in the north, contaminated in the south.
    let data = (0..nside.npix())
        .map(|p| {
            let n = pix2vec(nside, p);
            let clean = 4.0 + 2.0 * n[0] - 1.0 * n[1] + 3.0 * n[2];
            if n[2] < 0.0 { clean + 500.0 } else { clean }
        })
        .collect();
    let map = SkyMap::new(nside, data).unwrap();
    let north: Vec<f64> = (0..nside.npix())
        .map(|p| if pix2vec(nside, p)[2] < 0.0 { 0.0 } else { 1.0 })
        .collect();
    let mask_path = dir.path().join("north.fits");
    write_fits_map(&mask_path, &[("MASK", &SkyMap::new(nside, north).unwrap())], None).unwrap();

    let opts = TransformOptions {
        remove_dipole: Removal::Masked(mask_path),
        ..Default::default()
    };
    let cleaned = apply_transforms(&map, &opts).unwrap();
    for (p, &v) in cleaned.data().iter().enumerate() {
        if pix2vec(nside, p)[2] >= 0.0 {
            assert!(v.abs() < 1e-6, "pixel {p}: residual {v}");
        } else {
            assert!((v - 500.0).abs() < 1e-6, "pixel {p}: residual {v}");
        }
    }

    let full = apply_transforms(
        &map,
        &TransformOptions {
            remove_dipole: Removal::Full,
            ..Default::default()
        },
    )
    .unwrap();
    let worst_north = (0..nside.npix())
        .filter(|&p| pix2vec(nside, p)[2] >= 0.0)
        .fold(0.0f64, |m, p| m.max(full.data()[p].abs()));
    assert!(worst_north > 1.0);
}

#[test]
fn smoothing_keeps_undefined_pixels_undefined() {
    let nside = Nside::new(8).unwrap();
    let mut rng = StdRng::seed_from_u64(5);
    let mut data: Vec<f64> = (0..nside.npix()).map(|_| rng.random_range(-1.0..1.0)).collect();
    let holes = [0usize, 17, 300, 767];
    for &p in &holes {
        data[p] = f64::NAN;
    }
    let map = SkyMap::new(nside, data).unwrap();
    let opts = TransformOptions {
        fwhm_arcmin: Some(120.0),
        ..Default::default()
    };
    let smoothed = apply_transforms(&map, &opts).unwrap();
    for (p, &v) in smoothed.data().iter().enumerate() {
        if holes.contains(&p) {
            assert!(v.is_nan(), "pixel {p} should stay undefined");
        } else {
            assert!(v.is_finite(), "pixel {p} = {v}");
        }
    }
    assert_eq!(smoothed.stats().count, nside.npix() - holes.len());
}

#[test]
fn difference_maps_get_difference_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let nside = Nside::new(4).unwrap();
    let a_path = dir.path().join("runA.fits");
    let b_path = dir.path().join("runB.fits");
    let ramp = SkyMap::new(nside, (0..nside.npix()).map(|p| p as f64).collect()).unwrap();
    write_fits_map(&a_path, &[("I", &ramp)], None).unwrap();
    write_fits_map(&b_path, &[("I", &SkyMap::constant(nside, 100.0))], None).unwrap();

    let selector = SignalSelector::field(0);
    let source = difference_source(&a_path, &b_path, &selector, None).unwrap();
    let MapSource::Memory { name, map } = &source else {
        panic!("difference is an in-memory source");
    };
    assert_eq!(name, "runA_diff_runB");
    assert_eq!(map.data()[0], -100.0);
    assert_eq!(map.data()[nside.npix() - 1], (nside.npix() - 1) as f64 - 100.0);

    let inferred = infer(Path::new(name), &selector, map, None);
    assert_eq!(inferred.title.as_deref(), Some("difference"));
    assert_eq!(inferred.unit.as_deref(), Some("μK"));
    let r = inferred.symmetric.unwrap();
    assert!(r > 50.0 && r <= 100.0, "symmetric range {r}");

    let mut request = RenderRequest::new(source, selector);
    request.settings = untitled();
    request.out_dir = dir.path().join("figs");
    let files = render(&request).unwrap();
    assert_eq!(
        files[0].file_name().unwrap().to_str().unwrap(),
        "runA_diff_runB_I_c-planck_w7.png"
    );
}

#[test]
fn failure_reports_files_already_written() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("single.fits");
    write_fits_map(&path, &[("I", &SkyMap::constant(Nside::new(2).unwrap(), 1.0))], None).unwrap();

    let mut request = RenderRequest::new(MapSource::File(path), SignalSelector::field(0));
    request.signals.push(SignalSelector::field(1));
    request.settings = untitled();
    request.out_dir = dir.path().join("figs");

    let failure = render(&request).unwrap_err();
    assert!(matches!(failure.source, SkyplotError::FileFormat { .. }));
    assert_eq!(failure.selector, "field 1");
    assert_eq!(failure.written.len(), 1);
    assert!(failure.written[0].exists());
}
