//! Layered render settings.
//!
//! Three layers of [`Settings`] feed every render: built-in base defaults,
//! defaults inferred from the input (auto mode only) and explicit user
//! settings. Each field resolves to the first layer that sets it, explicit
//! first. The result is the immutable [`RenderSpec`].

use std::path::Path;

use anyhow::Context;
use log::debug;
use plotters::style::RGBColor;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SkyplotError};
use crate::range::{DEFAULT_PERCENTILE, RangeMode, RangeOptions, ResolvedRange, resolve_range};
use crate::render::colormap::parse_color;
use crate::render::layout::SizeClass;

/// Output file type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Svg,
}

impl OutputFormat {
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Png => "png",
            OutputFormat::Svg => "svg",
        }
    }
}

// ---------------------------------------------------------------------------
// Settings layer
// ---------------------------------------------------------------------------

/// One layer of render settings. `None` means "not set in this layer".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mode: Option<RangeMode>,
    pub symmetric: Option<f64>,
    pub mid: Option<Vec<f64>>,
    pub percentile: Option<f64>,
    pub log: Option<bool>,

    pub cmap: Option<String>,
    pub title: Option<String>,
    pub left_title: Option<String>,
    pub unit: Option<String>,

    /// Size classes, e.g. `"m"` or `"mls"`.
    pub size: Option<String>,
    pub format: Option<OutputFormat>,
    pub colorbar: Option<bool>,
    pub graticule: Option<bool>,
    /// Colour painted over masked pixels.
    pub mask_fill: Option<String>,
    pub dark: Option<bool>,
    pub background: Option<String>,
    /// Title font size in points.
    pub fontsize: Option<f64>,
    /// Tick and unit label size in points.
    pub labelsize: Option<f64>,
}

impl Settings {
    /// The bottom layer: every field a render needs.
    pub fn base() -> Self {
        Settings {
            percentile: Some(DEFAULT_PERCENTILE),
            log: Some(false),
            cmap: Some("planck".to_string()),
            size: Some("m".to_string()),
            format: Some(OutputFormat::Png),
            colorbar: Some(false),
            graticule: Some(false),
            dark: Some(false),
            fontsize: Some(11.0),
            labelsize: Some(10.0),
            ..Default::default()
        }
    }

    /// Load an explicit layer from a JSON file.
    pub fn from_json_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading settings file {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("parsing settings file {}", path.display()))
    }

    /// Field-wise: keep `self` where set, fall back to `lower`.
    pub fn or(self, lower: Settings) -> Settings {
        Settings {
            min: self.min.or(lower.min),
            max: self.max.or(lower.max),
            mode: self.mode.or(lower.mode),
            symmetric: self.symmetric.or(lower.symmetric),
            mid: self.mid.or(lower.mid),
            percentile: self.percentile.or(lower.percentile),
            log: self.log.or(lower.log),
            cmap: self.cmap.or(lower.cmap),
            title: self.title.or(lower.title),
            left_title: self.left_title.or(lower.left_title),
            unit: self.unit.or(lower.unit),
            size: self.size.or(lower.size),
            format: self.format.or(lower.format),
            colorbar: self.colorbar.or(lower.colorbar),
            graticule: self.graticule.or(lower.graticule),
            mask_fill: self.mask_fill.or(lower.mask_fill),
            dark: self.dark.or(lower.dark),
            background: self.background.or(lower.background),
            fontsize: self.fontsize.or(lower.fontsize),
            labelsize: self.labelsize.or(lower.labelsize),
        }
    }

    /// Whether this layer picks how the range is derived.
    fn sets_range_rule(&self) -> bool {
        self.mode.is_some() || self.symmetric.is_some()
    }

    pub fn range_options(&self) -> RangeOptions {
        RangeOptions {
            min: self.min,
            max: self.max,
            mode: self.mode,
            symmetric: self.symmetric,
            mid: self.mid.clone().unwrap_or_default(),
            percentile: self.percentile,
        }
    }
}

/// Resolve `explicit > inferred > base` per field.
///
/// An explicit range rule (`mode` or `symmetric`) replaces the inferred
/// range as a whole, so an inferred bound never mixes with an explicitly
/// chosen rule.
pub fn merge_layers(explicit: &Settings, inferred: Option<&Settings>, base: &Settings) -> Settings {
    let mut inferred = inferred.cloned().unwrap_or_default();
    if explicit.sets_range_rule() {
        inferred.min = None;
        inferred.max = None;
        inferred.mode = None;
        inferred.symmetric = None;
    }
    explicit.clone().or(inferred).or(base.clone())
}

// ---------------------------------------------------------------------------
// Resolved render parameters
// ---------------------------------------------------------------------------

/// Per-call drawing style.
#[derive(Debug, Clone, PartialEq)]
pub struct StyleConfig {
    pub dark: bool,
    pub background: RGBColor,
    /// No explicit background and no dark mode: figure background, off-sky
    /// and undefined cells are written fully transparent.
    pub transparent: bool,
    pub foreground: RGBColor,
    pub mask_fill: Option<RGBColor>,
    pub fontsize: f64,
    pub labelsize: f64,
}

impl Default for StyleConfig {
    fn default() -> Self {
        StyleConfig {
            dark: false,
            background: RGBColor(255, 255, 255),
            transparent: true,
            foreground: RGBColor(0, 0, 0),
            mask_fill: None,
            fontsize: 11.0,
            labelsize: 10.0,
        }
    }
}

/// Everything the projector and renderer need, fully resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSpec {
    pub range: ResolvedRange,
    pub cmap: String,
    pub title: Option<String>,
    pub left_title: Option<String>,
    pub unit: Option<String>,
    pub sizes: Vec<SizeClass>,
    pub format: OutputFormat,
    pub colorbar: bool,
    pub graticule: bool,
    pub style: StyleConfig,
}

impl RenderSpec {
    /// Resolve merged settings against the map samples.
    pub fn resolve(settings: &Settings, samples: &[f64]) -> Result<RenderSpec> {
        let log = settings.log.unwrap_or(false);
        let range = resolve_range(samples, &settings.range_options(), log)?;

        let sizes = SizeClass::parse_combination(settings.size.as_deref().unwrap_or("m"))?;
        let dark = settings.dark.unwrap_or(false);
        let background = match settings.background.as_deref() {
            Some(c) => parse_color(c)?,
            None if dark => RGBColor(0, 0, 0),
            None => RGBColor(255, 255, 255),
        };
        let transparent = settings.background.is_none() && !dark;
        let foreground = if dark {
            RGBColor(255, 255, 255)
        } else {
            RGBColor(0, 0, 0)
        };
        let mask_fill = settings.mask_fill.as_deref().map(parse_color).transpose()?;

        let fontsize = settings.fontsize.unwrap_or(11.0);
        let labelsize = settings.labelsize.unwrap_or(10.0);
        if !(fontsize > 0.0 && labelsize > 0.0) {
            return Err(SkyplotError::invalid(format!(
                "font sizes must be positive (fontsize={fontsize}, labelsize={labelsize})"
            )));
        }

        let spec = RenderSpec {
            range,
            cmap: settings.cmap.clone().unwrap_or_else(|| "planck".to_string()),
            title: settings.title.clone().filter(|t| !t.is_empty()),
            left_title: settings.left_title.clone().filter(|t| !t.is_empty()),
            unit: settings.unit.clone().filter(|u| !u.is_empty()),
            sizes,
            format: settings.format.unwrap_or_default(),
            colorbar: settings.colorbar.unwrap_or(false),
            graticule: settings.graticule.unwrap_or(false),
            style: StyleConfig {
                dark,
                background,
                transparent,
                foreground,
                mask_fill,
                fontsize,
                labelsize,
            },
        };
        debug!(
            "render spec: range [{}, {}], log={}, cmap={}, sizes={:?}",
            spec.range.min, spec.range.max, spec.range.log, spec.cmap, spec.sizes
        );
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_beats_inferred_beats_base() {
        let base = Settings::base();
        let inferred = Settings {
            cmap: Some("viridis".into()),
            title: Some("CMB".into()),
            log: Some(true),
            ..Default::default()
        };
        let explicit = Settings {
            title: Some("my map".into()),
            ..Default::default()
        };
        let merged = merge_layers(&explicit, Some(&inferred), &base);
        assert_eq!(merged.title.as_deref(), Some("my map"));
        assert_eq!(merged.cmap.as_deref(), Some("viridis"));
        assert_eq!(merged.log, Some(true));
        assert_eq!(merged.size.as_deref(), Some("m"));

        let merged = merge_layers(&explicit, None, &base);
        assert_eq!(merged.cmap.as_deref(), Some("planck"));
        assert_eq!(merged.log, Some(false));
    }

    #[test]
    fn explicit_range_rule_replaces_inferred_range() {
        let inferred = Settings {
            symmetric: Some(300.0),
            min: Some(0.0),
            ..Default::default()
        };
        let explicit = Settings {
            mode: Some(RangeMode::MinMax),
            ..Default::default()
        };
        let merged = merge_layers(&explicit, Some(&inferred), &Settings::base());
        assert_eq!(merged.symmetric, None);
        assert_eq!(merged.min, None);
        assert_eq!(merged.mode, Some(RangeMode::MinMax));

        let spec = RenderSpec::resolve(&merged, &[1.0, 4.0, 9.0]).unwrap();
        assert_eq!((spec.range.min, spec.range.max), (1.0, 9.0));
    }

    #[test]
    fn explicit_mode_with_symmetric_is_rejected() {
        let explicit = Settings {
            mode: Some(RangeMode::Auto),
            symmetric: Some(2.0),
            ..Default::default()
        };
        let merged = merge_layers(&explicit, None, &Settings::base());
        assert!(matches!(
            RenderSpec::resolve(&merged, &[0.0]),
            Err(SkyplotError::InvalidParameterCombination(_))
        ));
    }

    #[test]
    fn settings_parse_from_json() {
        let json = r#"{ "min": -5, "mode": "minmax", "cmap": "bone_r", "format": "svg", "size": "sl" }"#;
        let s: Settings = serde_json::from_str(json).unwrap();
        assert_eq!(s.min, Some(-5.0));
        assert_eq!(s.mode, Some(RangeMode::MinMax));
        assert_eq!(s.format, Some(OutputFormat::Svg));
        assert!(serde_json::from_str::<Settings>(r#"{ "colour": "red" }"#).is_err());
    }

    #[test]
    fn dark_mode_style() {
        let settings = Settings {
            dark: Some(true),
            mask_fill: Some("gray".into()),
            ..Settings::base()
        };
        let spec = RenderSpec::resolve(&settings, &[0.0, 1.0]).unwrap();
        assert_eq!(spec.style.background, RGBColor(0, 0, 0));
        assert!(!spec.style.transparent);
        assert_eq!(spec.style.foreground, RGBColor(255, 255, 255));
        assert!(spec.style.mask_fill.is_some());
    }
}
