// skyplot: render HEALPix maps to publication figures.
//
// Subcommands:
//   plot: full-sky Mollweide figures, one per size class
//   gnom: gnomonic patch around a sky position
//   diff: difference of the same signal in two files

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use log::{error, info};

use skyplot::config::{OutputFormat, Settings};
use skyplot::map::{Removal, SignalSelector, TransformOptions};
use skyplot::pipeline::{MapSource, RenderRequest, View, difference_source, render};
use skyplot::project::DEFAULT_GNOMONIC_XSIZE;
use skyplot::range::RangeMode;

#[derive(Parser)]
#[command(name = "skyplot", version, about = "Render HEALPix sky maps")]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Full-sky Mollweide figures
    Plot {
        /// Map files (.fits or .parquet)
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Gnomonic view of a patch
    Gnom {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
        /// Galactic longitude of the centre, degrees
        #[arg(long, allow_hyphen_values = true)]
        lon: f64,
        /// Galactic latitude of the centre, degrees
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        /// Patch size, degrees
        #[arg(long, default_value_t = 10.0)]
        size: f64,
        /// Pixels per side
        #[arg(long, default_value_t = DEFAULT_GNOMONIC_XSIZE)]
        xsize: usize,
        #[command(flatten)]
        common: CommonArgs,
    },
    /// Difference map a − b
    Diff {
        a: PathBuf,
        b: PathBuf,
        #[command(flatten)]
        common: CommonArgs,
    },
}

#[derive(Args, Debug)]
struct CommonArgs {
    /// JSON settings file; flags override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Field indices (0=I, 1=Q, 2=U)
    #[arg(short = 's', long = "sig", default_values_t = [0usize])]
    signals: Vec<usize>,
    /// Dataset path inside a .parquet container
    #[arg(long)]
    dataset: Option<String>,

    #[arg(short = 'o', long, default_value = ".")]
    out_dir: PathBuf,
    /// Output file name (single signal and size only)
    #[arg(long)]
    outname: Option<String>,
    /// Disable inferred defaults
    #[arg(long)]
    no_auto: bool,

    // -- transforms --
    #[arg(long)]
    scale: Option<f64>,
    #[arg(long)]
    nside: Option<u32>,
    /// Smoothing FWHM in arcmin
    #[arg(long)]
    fwhm: Option<f64>,
    #[arg(long)]
    remove_monopole: bool,
    #[arg(long)]
    remove_dipole: bool,
    /// Restrict monopole/dipole fits to this mask
    #[arg(long)]
    fit_mask: Option<PathBuf>,
    /// Mask applied after all other transforms
    #[arg(long)]
    mask: Option<PathBuf>,

    // -- range --
    #[arg(long, allow_hyphen_values = true)]
    min: Option<f64>,
    #[arg(long, allow_hyphen_values = true)]
    max: Option<f64>,
    /// auto | minmax
    #[arg(long, value_parser = parse_mode)]
    mode: Option<RangeMode>,
    /// Symmetric range ±R
    #[arg(long = "range")]
    symmetric: Option<f64>,
    /// Extra colorbar ticks
    #[arg(long, allow_hyphen_values = true, num_args = 1..)]
    mid: Vec<f64>,
    #[arg(long)]
    percentile: Option<f64>,
    #[arg(long)]
    log: bool,

    // -- style --
    #[arg(long)]
    cmap: Option<String>,
    #[arg(long)]
    title: Option<String>,
    #[arg(long)]
    ltitle: Option<String>,
    #[arg(long)]
    unit: Option<String>,
    /// Size classes: any of x, s, m, l, f
    #[arg(long)]
    size: Option<String>,
    /// png | svg
    #[arg(long, value_parser = parse_format)]
    format: Option<OutputFormat>,
    #[arg(long)]
    colorbar: bool,
    #[arg(long)]
    graticule: bool,
    #[arg(long)]
    mask_fill: Option<String>,
    #[arg(long)]
    dark: bool,
    #[arg(long)]
    background: Option<String>,
    #[arg(long)]
    fontsize: Option<f64>,
    #[arg(long)]
    labelsize: Option<f64>,
}

fn parse_mode(s: &str) -> Result<RangeMode, String> {
    match s.to_ascii_lowercase().as_str() {
        "auto" => Ok(RangeMode::Auto),
        "minmax" => Ok(RangeMode::MinMax),
        other => Err(format!("unknown range mode '{other}' (auto, minmax)")),
    }
}

fn parse_format(s: &str) -> Result<OutputFormat, String> {
    match s.to_ascii_lowercase().as_str() {
        "png" => Ok(OutputFormat::Png),
        "svg" => Ok(OutputFormat::Svg),
        other => Err(format!("unknown output format '{other}' (png, svg)")),
    }
}

impl CommonArgs {
    /// Flags layered over the optional settings file.
    fn settings(&self) -> anyhow::Result<Settings> {
        let file = match &self.config {
            Some(path) => Settings::from_json_file(path)?,
            None => Settings::default(),
        };
        let flags = Settings {
            min: self.min,
            max: self.max,
            mode: self.mode,
            symmetric: self.symmetric,
            mid: (!self.mid.is_empty()).then(|| self.mid.clone()),
            percentile: self.percentile,
            log: self.log.then_some(true),
            cmap: self.cmap.clone(),
            title: self.title.clone(),
            left_title: self.ltitle.clone(),
            unit: self.unit.clone(),
            size: self.size.clone(),
            format: self.format,
            colorbar: self.colorbar.then_some(true),
            graticule: self.graticule.then_some(true),
            mask_fill: self.mask_fill.clone(),
            dark: self.dark.then_some(true),
            background: self.background.clone(),
            fontsize: self.fontsize,
            labelsize: self.labelsize,
        };
        Ok(flags.or(file))
    }

    fn transforms(&self) -> TransformOptions {
        let removal = |on: bool| match (on, &self.fit_mask) {
            (false, _) => Removal::Off,
            (true, Some(mask)) => Removal::Masked(mask.clone()),
            (true, None) => Removal::Full,
        };
        TransformOptions {
            scale: self.scale,
            nside: self.nside,
            fwhm_arcmin: self.fwhm,
            remove_monopole: removal(self.remove_monopole),
            remove_dipole: removal(self.remove_dipole),
            mask: self.mask.clone(),
            band_limit: None,
        }
    }

    fn selectors(&self) -> Vec<SignalSelector> {
        self.signals
            .iter()
            .map(|&field| SignalSelector {
                field,
                dataset: self.dataset.clone(),
            })
            .collect()
    }

    fn request(&self, source: MapSource, view: View) -> anyhow::Result<RenderRequest> {
        Ok(RenderRequest {
            source,
            signals: self.selectors(),
            transforms: self.transforms(),
            auto: !self.no_auto,
            settings: self.settings()?,
            view,
            out_dir: self.out_dir.clone(),
            outname: self.outname.clone(),
        })
    }
}

/// Render each request in turn, logging failures and carrying on. A request
/// that could not even be built counts as a failed input.
fn run_all(requests: Vec<anyhow::Result<RenderRequest>>) -> anyhow::Result<()> {
    let total = requests.len();
    let mut failed = 0;
    for request in requests {
        let outcome = request.and_then(|r| render(&r).map_err(|e| {
            for f in &e.written {
                println!("{}", f.display());
            }
            anyhow::Error::new(e)
        }));
        match outcome {
            Ok(files) => {
                for f in files {
                    info!("{}", f.display());
                    println!("{}", f.display());
                }
            }
            Err(e) => {
                error!("{e:#}");
                failed += 1;
            }
        }
    }
    if failed > 0 {
        bail!("{failed} of {total} inputs failed");
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Cmd::Plot { inputs, common } => {
            let requests = inputs
                .into_iter()
                .map(|p| common.request(MapSource::File(p), View::FullSky))
                .collect();
            run_all(requests)
        }
        Cmd::Gnom {
            inputs,
            lon,
            lat,
            size,
            xsize,
            common,
        } => {
            let view = View::Gnomonic {
                lon,
                lat,
                size_deg: size,
                xsize,
            };
            let requests = inputs
                .into_iter()
                .map(|p| common.request(MapSource::File(p), view))
                .collect();
            run_all(requests)
        }
        Cmd::Diff { a, b, common } => {
            let requests = common
                .selectors()
                .into_iter()
                .map(|selector| {
                    let source = difference_source(&a, &b, &selector, common.nside)
                        .with_context(|| {
                            format!("differencing {} and {} [{selector}]", a.display(), b.display())
                        })?;
                    let mut request = common.request(source, View::FullSky)?;
                    request.signals = vec![selector];
                    Ok(request)
                })
                .collect();
            run_all(requests)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skyplot::map::{Nside, SkyMap};

    #[test]
    fn failed_inputs_do_not_stop_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let mut good = RenderRequest::new(
            MapSource::Memory {
                name: "flat".into(),
                map: SkyMap::constant(Nside::new(2).unwrap(), 1.0),
            },
            SignalSelector::field(0),
        );
        good.settings = Settings {
            title: Some(String::new()),
            left_title: Some(String::new()),
            size: Some("x".into()),
            ..Default::default()
        };
        good.out_dir = dir.path().to_path_buf();

        let missing = difference_source(
            &dir.path().join("a.fits"),
            &dir.path().join("b.fits"),
            &SignalSelector::field(0),
            None,
        )
        .map(|source| RenderRequest::new(source, SignalSelector::field(0)))
        .map_err(anyhow::Error::new);

        let err = run_all(vec![missing, Ok(good)]).unwrap_err();
        assert_eq!(err.to_string(), "1 of 2 inputs failed");
        assert!(dir.path().join("flat_I_c-planck_w7.png").exists());
    }
}
