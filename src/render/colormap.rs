use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, bail};
use palette::{FromColor, Hsl, IntoColor, Lab, Mix, Srgb};
use plotters::style::colors::colormaps::{
    BlackWhite, Bone, Copper, MandelbrotHSL, ViridisRGB, VulcanoHSL,
};
use plotters::style::{Color, RGBColor};

use crate::error::{Result, SkyplotError};

const PLANCK_TABLE: &str = include_str!("../../assets/planck_cmap.dat");
const PLANCK_LOG_TABLE: &str = include_str!("../../assets/planck_cmap_logscale.dat");

// ---------------------------------------------------------------------------
// Color palette generator
// ---------------------------------------------------------------------------

/// Generates `n` visually distinct colours using evenly spaced hues.
pub fn generate_palette(n: usize) -> Vec<RGBColor> {
    if n == 0 {
        return Vec::new();
    }
    (0..n)
        .map(|i| {
            let hue = (i as f32 / n as f32) * 360.0;
            let hsl = Hsl::new(hue, 0.75, 0.55);
            let rgb: Srgb = hsl.into_color();
            RGBColor(
                (rgb.red * 255.0) as u8,
                (rgb.green * 255.0) as u8,
                (rgb.blue * 255.0) as u8,
            )
        })
        .collect()
}

const PLOTLY: [&str; 10] = [
    "#636EFA", "#EF553B", "#00CC96", "#AB63FA", "#FFA15A", "#19D3F3", "#FF6692", "#B6E880",
    "#FF97FF", "#FECB52",
];
const D3: [&str; 10] = [
    "#1F77B4", "#FF7F0E", "#2CA02C", "#D62728", "#9467BD", "#8C564B", "#E377C2", "#7F7F7F",
    "#BCBD22", "#17BECF",
];
const T10: [&str; 10] = [
    "#4C78A8", "#F58518", "#E45756", "#72B7B2", "#54A24B", "#EECA3B", "#B279A2", "#FF9DA6",
    "#9D755D", "#BAB0AC",
];

/// Parse `#rrggbb` or a CSS colour name.
pub fn parse_color(s: &str) -> Result<RGBColor> {
    let s = s.trim();
    let rgb = if s.starts_with('#') {
        Srgb::<u8>::from_str(s).ok()
    } else {
        palette::named::from_str(&s.to_ascii_lowercase())
    };
    rgb.map(|c| RGBColor(c.red, c.green, c.blue))
        .ok_or_else(|| SkyplotError::invalid(format!("unrecognised colour '{s}'")))
}

// ---------------------------------------------------------------------------
// Colormaps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builtin {
    Viridis,
    Bone,
    Copper,
    Gray,
    Mandelbrot,
    Vulcano,
}

#[derive(Debug, Clone, PartialEq)]
enum Kind {
    Builtin(Builtin),
    /// Linearly interpolated table.
    Table(Vec<RGBColor>),
    /// Discrete colours, one band each.
    Listed(Vec<RGBColor>),
}

/// A colour scale over `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Colormap {
    name: String,
    kind: Kind,
    reversed: bool,
}

impl Colormap {
    /// Resolve a colormap name.
    ///
    /// * `planck` – bundled table, the log-scale variant when `log` is set
    /// * `viridis`, `bone`, `copper`, `gray`, `mandelbrot`, `vulcano`
    /// * `coolwarm`, `neutral`
    /// * `q-<Plotly|D3|T10|Hue>[-n]` – listed qualitative colours
    /// * a path ending in `.dat`, `.txt` or `.csv` – RGB rows, 0–255 or 0–1
    ///
    /// A trailing `_r` reverses any of them.
    pub fn by_name(name: &str, log: bool) -> Result<Colormap> {
        let (base, reversed) = match name.strip_suffix("_r") {
            Some(b) => (b, true),
            None => (name, false),
        };
        let unknown = || SkyplotError::UnknownColormap(name.to_string());

        let lower = base.to_ascii_lowercase();
        let kind = if lower.ends_with(".dat") || lower.ends_with(".txt") || lower.ends_with(".csv")
        {
            let colors = load_table_file(Path::new(base)).map_err(|e| {
                SkyplotError::FileFormat {
                    path: base.into(),
                    reason: format!("{e:#}"),
                }
            })?;
            Kind::Table(colors)
        } else if let Some(spec) = base.strip_prefix("q-") {
            Kind::Listed(qualitative(spec).ok_or_else(unknown)?)
        } else {
            match lower.as_str() {
                "planck" => {
                    let table = if log { PLANCK_LOG_TABLE } else { PLANCK_TABLE };
                    Kind::Table(parse_table(table).map_err(|e| {
                        SkyplotError::Render(format!("bundled planck table: {e:#}"))
                    })?)
                }
                "viridis" => Kind::Builtin(Builtin::Viridis),
                "bone" => Kind::Builtin(Builtin::Bone),
                "copper" => Kind::Builtin(Builtin::Copper),
                "gray" | "grey" => Kind::Builtin(Builtin::Gray),
                "mandelbrot" => Kind::Builtin(Builtin::Mandelbrot),
                "vulcano" => Kind::Builtin(Builtin::Vulcano),
                "coolwarm" => Kind::Table(lab_ramp(&[
                    RGBColor(59, 76, 192),
                    RGBColor(221, 221, 221),
                    RGBColor(180, 4, 38),
                ])),
                "neutral" => Kind::Table(lab_ramp(&[
                    RGBColor(0, 0, 0),
                    RGBColor(120, 120, 120),
                    RGBColor(255, 255, 255),
                ])),
                _ => return Err(unknown()),
            }
        };

        Ok(Colormap {
            name: name.to_string(),
            kind,
            reversed,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Colour at `t`, clamped to `[0, 1]`.
    pub fn color(&self, t: f64) -> RGBColor {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let t = if self.reversed { 1.0 - t } else { t };
        match &self.kind {
            Kind::Builtin(b) => builtin_color(*b, t),
            Kind::Table(colors) => interpolate(colors, t),
            Kind::Listed(colors) => {
                let i = ((t * colors.len() as f64) as usize).min(colors.len() - 1);
                colors[i]
            }
        }
    }
}

fn builtin_color(b: Builtin, t: f64) -> RGBColor {
    match b {
        Builtin::Viridis => ViridisRGB::get_color(t),
        Builtin::Bone => Bone::get_color(t),
        Builtin::Copper => Copper::get_color(t),
        Builtin::Gray => BlackWhite::get_color(t),
        Builtin::Mandelbrot => {
            let (r, g, b) = MandelbrotHSL::get_color(t).rgb();
            RGBColor(r, g, b)
        }
        Builtin::Vulcano => {
            let (r, g, b) = VulcanoHSL::get_color(t).rgb();
            RGBColor(r, g, b)
        }
    }
}

fn interpolate(colors: &[RGBColor], t: f64) -> RGBColor {
    if colors.len() == 1 {
        return colors[0];
    }
    let pos = t * (colors.len() - 1) as f64;
    let i = (pos.floor() as usize).min(colors.len() - 2);
    let f = pos - i as f64;
    let (a, b) = (colors[i], colors[i + 1]);
    let lerp = |x: u8, y: u8| (x as f64 + (y as f64 - x as f64) * f).round() as u8;
    RGBColor(lerp(a.0, b.0), lerp(a.1, b.1), lerp(a.2, b.2))
}

/// 256-entry table through `anchors`, interpolated in CIE Lab.
fn lab_ramp(anchors: &[RGBColor]) -> Vec<RGBColor> {
    let labs: Vec<Lab> = anchors
        .iter()
        .map(|c| Srgb::new(c.0, c.1, c.2).into_format::<f32>().into_color())
        .collect();
    (0..256)
        .map(|i| {
            let pos = i as f32 / 255.0 * (labs.len() - 1) as f32;
            let k = (pos.floor() as usize).min(labs.len() - 2);
            let lab = labs[k].mix(labs[k + 1], pos - k as f32);
            let rgb: Srgb<u8> = Srgb::from_color(lab).into_format();
            RGBColor(rgb.red, rgb.green, rgb.blue)
        })
        .collect()
}

/// `Plotly`, `D3`, `T10` or `Hue`, optionally `-n` to keep the first `n`.
fn qualitative(spec: &str) -> Option<Vec<RGBColor>> {
    let (name, count) = match spec.rsplit_once('-') {
        Some((name, n)) => (name, Some(n.parse::<usize>().ok()?)),
        None => (spec, None),
    };
    if count == Some(0) {
        return None;
    }
    let hex: &[&str] = match name.to_ascii_lowercase().as_str() {
        "plotly" => &PLOTLY,
        "d3" => &D3,
        "t10" => &T10,
        "hue" => return Some(generate_palette(count.unwrap_or(8))),
        _ => return None,
    };
    let colors: Vec<RGBColor> = hex.iter().filter_map(|h| parse_color(h).ok()).collect();
    let n = count.unwrap_or(colors.len()).min(colors.len());
    Some(colors[..n].to_vec())
}

// -- table files --

/// Whitespace- or comma-separated RGB rows. Values are 0–255, or 0–1 when
/// no value exceeds 1.
pub fn parse_table(text: &str) -> anyhow::Result<Vec<RGBColor>> {
    let rows: Vec<[f64; 3]> = text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .enumerate()
        .map(|(i, line)| {
            let vals: Vec<f64> = line
                .split(|c: char| c.is_whitespace() || c == ',')
                .filter(|t| !t.is_empty())
                .map(|t| t.parse::<f64>())
                .collect::<std::result::Result<_, _>>()
                .with_context(|| format!("row {i}: '{line}'"))?;
            match vals[..] {
                [r, g, b, ..] => Ok([r, g, b]),
                _ => bail!("row {i}: expected three channels, got {}", vals.len()),
            }
        })
        .collect::<anyhow::Result<_>>()?;
    rows_to_colors(rows)
}

fn rows_to_colors(rows: Vec<[f64; 3]>) -> anyhow::Result<Vec<RGBColor>> {
    if rows.is_empty() {
        bail!("colour table is empty");
    }
    let unit = rows.iter().flatten().all(|&v| v <= 1.0);
    let scale = if unit { 255.0 } else { 1.0 };
    let channel = |v: f64| (v * scale).round().clamp(0.0, 255.0) as u8;
    Ok(rows
        .into_iter()
        .map(|[r, g, b]| RGBColor(channel(r), channel(g), channel(b)))
        .collect())
}

fn load_table_file(path: &Path) -> anyhow::Result<Vec<RGBColor>> {
    let is_csv = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
    if !is_csv {
        let text = std::fs::read_to_string(path).context("reading colormap file")?;
        return parse_table(&text);
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_path(path)
        .context("opening colormap CSV")?;
    let mut rows = Vec::new();
    for (row_no, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("CSV row {row_no}"))?;
        let parsed: std::result::Result<Vec<f64>, _> =
            record.iter().take(3).map(|t| t.parse::<f64>()).collect();
        match parsed {
            Ok(vals) if vals.len() == 3 => rows.push([vals[0], vals[1], vals[2]]),
            Ok(_) => bail!("CSV row {row_no}: expected three channels"),
            // Header row.
            Err(_) if row_no == 0 => continue,
            Err(e) => return Err(e).with_context(|| format!("CSV row {row_no}: not a number")),
        }
    }
    rows_to_colors(rows)
}
