//! The render operation: load → transform → infer → resolve → project → draw.
//!
//! Every call builds its own [`RenderSpec`]; nothing carries over between
//! calls except the font cache warmed by [`init_rendering`].

use std::path::{Path, PathBuf};

use log::debug;

use crate::config::{RenderSpec, Settings, merge_layers};
use crate::error::{RenderFailure, Result, SkyplotError};
use crate::infer::{infer, infer_smoothing};
use crate::map::{
    LoadedMap, Removal, SignalSelector, SkyMap, TransformOptions, apply_transforms, difference,
    load_map,
};
use crate::project::{DEFAULT_GNOMONIC_XSIZE, Projection, project};
use crate::render::{Colormap, SizeClass, init_rendering, render_to_file};

/// Where the map comes from.
#[derive(Debug, Clone)]
pub enum MapSource {
    File(PathBuf),
    /// A map already in memory; `name` stands in for the file name in
    /// inference and output naming.
    Memory { name: String, map: SkyMap },
}

impl MapSource {
    fn display_name(&self) -> String {
        match self {
            MapSource::File(p) => p.display().to_string(),
            MapSource::Memory { name, .. } => name.clone(),
        }
    }
}

/// Full sky or a gnomonic patch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum View {
    FullSky,
    Gnomonic {
        lon: f64,
        lat: f64,
        size_deg: f64,
        xsize: usize,
    },
}

impl View {
    pub fn gnomonic(lon: f64, lat: f64, size_deg: f64) -> View {
        View::Gnomonic {
            lon,
            lat,
            size_deg,
            xsize: DEFAULT_GNOMONIC_XSIZE,
        }
    }
}

/// One render call.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub source: MapSource,
    /// One figure set per selector.
    pub signals: Vec<SignalSelector>,
    pub transforms: TransformOptions,
    /// Consult the inference rules for defaults.
    pub auto: bool,
    /// Explicit settings layer.
    pub settings: Settings,
    pub view: View,
    pub out_dir: PathBuf,
    /// Replaces the generated file name; only valid when a single file
    /// results.
    pub outname: Option<String>,
}

impl RenderRequest {
    pub fn new(source: MapSource, signal: SignalSelector) -> Self {
        RenderRequest {
            source,
            signals: vec![signal],
            transforms: TransformOptions::default(),
            auto: true,
            settings: Settings::default(),
            view: View::FullSky,
            out_dir: PathBuf::from("."),
            outname: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Render every requested signal. Stops at the first failure; files already
/// written for earlier signals stay on disk and are listed in
/// [`RenderFailure::written`].
pub fn render(request: &RenderRequest) -> std::result::Result<Vec<PathBuf>, RenderFailure> {
    init_rendering();
    let mut written = Vec::new();
    for selector in &request.signals {
        let files = check_outname(request).and_then(|()| match &request.source {
            // The loader regrades, or synthesizes harmonic data, at the
            // target resolution; the transform stage then finds it in place.
            MapSource::File(path) => load_map(path, selector, request.transforms.nside)
                .and_then(|loaded| render_loaded(loaded, &request.transforms, request)),
            MapSource::Memory { name, map } => render_map(map, name, selector, request),
        });
        match files {
            Ok(files) => written.extend(files),
            Err(source) => {
                return Err(RenderFailure {
                    input: request.source.display_name(),
                    selector: selector.to_string(),
                    source,
                    written,
                });
            }
        }
    }
    Ok(written)
}

/// Render a map already in memory under `name`.
pub fn render_map(
    map: &SkyMap,
    name: &str,
    selector: &SignalSelector,
    request: &RenderRequest,
) -> Result<Vec<PathBuf>> {
    init_rendering();
    let loaded = LoadedMap {
        map: map.clone(),
        lmax: None,
        unit: None,
        path: PathBuf::from(name),
        selector: selector.clone(),
    };
    render_loaded(loaded, &request.transforms, request)
}

/// `a − b` for the same signal of two files, as an in-memory source named
/// `<a>_diff_<b>`.
pub fn difference_source(
    a: &Path,
    b: &Path,
    selector: &SignalSelector,
    nside: Option<u32>,
) -> Result<MapSource> {
    let first = load_map(a, selector, nside)?;
    let second = load_map(b, selector, nside)?;
    let map = difference(&first.map, &second.map)?;
    Ok(MapSource::Memory {
        name: format!("{}_diff_{}", file_stem(a), file_stem(b)),
        map,
    })
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

fn render_loaded(
    loaded: LoadedMap,
    transforms: &TransformOptions,
    request: &RenderRequest,
) -> Result<Vec<PathBuf>> {
    let selector = &loaded.selector;
    let mut transforms = transforms.clone();
    if transforms.band_limit.is_none() {
        transforms.band_limit = loaded.lmax;
    }
    if request.auto && transforms.fwhm_arcmin.is_none() {
        transforms.fwhm_arcmin = infer_smoothing(&loaded.path, selector, loaded.lmax);
    }

    let map = apply_transforms(&loaded.map, &transforms)?;

    let inferred = request
        .auto
        .then(|| infer(&loaded.path, selector, &map, loaded.lmax));
    let base = Settings {
        unit: loaded.unit.clone(),
        ..Settings::base()
    };
    let merged = merge_layers(
        &request.settings,
        inferred.as_ref(),
        &base,
    );
    let spec = RenderSpec::resolve(&merged, map.data())?;
    let cmap = Colormap::by_name(&spec.cmap, spec.range.log)?;

    std::fs::create_dir_all(&request.out_dir)?;
    let naming = NameParts {
        stem: file_stem(&loaded.path),
        selector,
        transforms: &transforms,
        spec: &spec,
    };

    let mut written = Vec::new();
    match request.view {
        View::FullSky => {
            for &class in &spec.sizes {
                let image = project(
                    &map,
                    Projection::Mollweide {
                        width: class.width_px() as usize,
                    },
                );
                let name = match &request.outname {
                    Some(n) => with_extension(n, &spec),
                    None => naming.full_sky(class),
                };
                written.push(render_to_file(
                    &image,
                    &spec,
                    &cmap,
                    &request.out_dir.join(name),
                )?);
            }
        }
        View::Gnomonic {
            lon,
            lat,
            size_deg,
            xsize,
        } => {
            if !(size_deg > 0.0 && size_deg < 180.0) || xsize == 0 {
                return Err(SkyplotError::invalid(format!(
                    "gnomonic patch must be 0 < size < 180 degrees and at least one pixel, got {size_deg} deg, {xsize} px"
                )));
            }
            let image = project(
                &map,
                Projection::Gnomonic {
                    lon,
                    lat,
                    size_deg,
                    xsize,
                },
            );
            let name = match &request.outname {
                Some(n) => with_extension(n, &spec),
                None => naming.gnomonic(lon, lat, size_deg),
            };
            written.push(render_to_file(
                &image,
                &spec,
                &cmap,
                &request.out_dir.join(name),
            )?);
        }
    }
    debug!("{} [{}]: {} file(s)", loaded.path.display(), selector, written.len());
    Ok(written)
}

fn check_outname(request: &RenderRequest) -> Result<()> {
    if request.outname.is_none() {
        return Ok(());
    }
    let sizes = match request.view {
        View::Gnomonic { .. } => 1,
        View::FullSky => match &request.settings.size {
            Some(s) => SizeClass::parse_combination(s)?.len(),
            None => 1,
        },
    };
    if request.signals.len() > 1 || sizes > 1 {
        return Err(SkyplotError::invalid(
            "an explicit output name needs a single signal and a single size class",
        ));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Output naming
// ---------------------------------------------------------------------------

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "map".to_string())
}

fn with_extension(name: &str, spec: &RenderSpec) -> String {
    let ext = spec.format.extension();
    if Path::new(name)
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
    {
        name.to_string()
    } else {
        format!("{name}.{ext}")
    }
}

/// `12.0` → `12`, `8.8` → `8.8`, `-30.5` → `-30.5`.
fn fmt_num(x: f64) -> String {
    if x.fract() == 0.0 && x.abs() < 1e15 {
        format!("{}", x as i64)
    } else {
        let s = format!("{x:.3}");
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

/// Colormap identity usable in a file name: file-based maps contribute
/// their stem.
fn cmap_slug(cmap: &str) -> String {
    let (base, rev) = match cmap.strip_suffix("_r") {
        Some(b) => (b, "_r"),
        None => (cmap, ""),
    };
    let lower = base.to_ascii_lowercase();
    if [".dat", ".txt", ".csv"].iter().any(|e| lower.ends_with(e)) {
        format!("{}{rev}", file_stem(Path::new(base)))
    } else {
        cmap.to_string()
    }
}

struct NameParts<'a> {
    stem: String,
    selector: &'a SignalSelector,
    transforms: &'a TransformOptions,
    spec: &'a RenderSpec,
}

impl NameParts<'_> {
    fn full_sky(&self, class: SizeClass) -> String {
        let t = self.transforms;
        let spec = self.spec;
        let mut name = self.stem.clone();
        if let Some(ds) = &self.selector.dataset {
            name.push('_');
            name.push_str(&ds.replace('/', "-"));
        }
        name.push('_');
        name.push_str(&self.selector.label());
        if let Some(n) = t.nside {
            name.push_str(&format!("_n{n}"));
        }
        if let Some(fwhm) = t.fwhm_arcmin.filter(|f| *f > 0.0) {
            name.push_str(&format!("_{}arcmin", fmt_num(fwhm)));
        }
        if t.remove_dipole != Removal::Off {
            name.push_str("_md");
        }
        if t.remove_monopole != Removal::Off {
            name.push_str("_mm");
        }
        if t.mask.is_some() {
            name.push_str("_masked");
        }
        name.push_str(&format!("_c-{}", cmap_slug(&spec.cmap)));
        if spec.colorbar {
            name.push_str("_cb");
        }
        if spec.range.log {
            name.push_str("_log");
        }
        if spec.style.dark {
            name.push_str("_dark");
        }
        name.push_str(&format!(
            "_w{}.{}",
            fmt_num(class.width_cm()),
            spec.format.extension()
        ));
        name
    }

    fn gnomonic(&self, lon: f64, lat: f64, size: f64) -> String {
        let size = fmt_num(size);
        format!(
            "{}_{}_gnomonic_{}lon{}lat_{size}x{size}deg{}.{}",
            self.stem,
            self.selector.label(),
            fmt_num(lon),
            fmt_num(lat),
            if self.spec.colorbar { "_cb" } else { "" },
            self.spec.format.extension()
        )
    }
}
