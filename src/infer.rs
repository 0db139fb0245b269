//! Default parameters inferred from the input name and content.
//!
//! An ordered table of [`Rule`]s keyed on lowercase name substrings. The
//! first rule whose pattern occurs in the name supplies the defaults; no
//! match falls back to a generic percentile range titled after the file.

use std::path::Path;

use log::{debug, warn};

use crate::config::Settings;
use crate::map::{SignalSelector, SkyMap};
use crate::range::{DEFAULT_PERCENTILE, RangeMode, percentile_pair};

/// How a rule sets up the colour range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RangeRule {
    /// Percentile pair.
    Percentile,
    /// Zero up to the upper percentile.
    FromZero,
    /// `±intensity` for I, `±polarization` for Q/U.
    Symmetric { intensity: f64, polarization: f64 },
    /// `±max(|p_lo|, |p_hi|)`.
    SymmetricPercentile,
}

/// Which fields a log scale or smoothing default applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fields {
    None,
    All,
    Intensity,
    Polarization,
}

impl Fields {
    fn covers(self, selector: &SignalSelector) -> bool {
        match self {
            Fields::None => false,
            Fields::All => true,
            Fields::Intensity => !selector.is_polarization(),
            Fields::Polarization => selector.is_polarization(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rule {
    pub patterns: &'static [&'static str],
    pub title: &'static str,
    pub unit: Option<&'static str>,
    pub log: Fields,
    pub range: RangeRule,
    pub cmap: Option<&'static str>,
    /// Default smoothing FWHM in arcmin, and the fields it applies to.
    pub fwhm: Option<(f64, Fields)>,
}

/// Evaluated top to bottom; first match wins.
pub const RULES: &[Rule] = &[
    Rule {
        patterns: &["chisq"],
        title: "χ²",
        unit: None,
        log: Fields::None,
        range: RangeRule::FromZero,
        cmap: Some("viridis"),
        fwhm: None,
    },
    Rule {
        patterns: &["res_", "residual"],
        title: "residual",
        unit: Some("μK"),
        log: Fields::None,
        range: RangeRule::Symmetric {
            intensity: 10.0,
            polarization: 3.0,
        },
        cmap: Some("planck"),
        fwhm: None,
    },
    Rule {
        patterns: &["diff"],
        title: "difference",
        unit: Some("μK"),
        log: Fields::None,
        range: RangeRule::SymmetricPercentile,
        cmap: Some("planck"),
        fwhm: None,
    },
    Rule {
        patterns: &["rms", "stddev"],
        title: "RMS",
        unit: Some("μK"),
        log: Fields::None,
        range: RangeRule::FromZero,
        cmap: Some("neutral"),
        fwhm: None,
    },
    Rule {
        patterns: &["cmb"],
        title: "CMB",
        unit: Some("μK_CMB"),
        log: Fields::None,
        range: RangeRule::Symmetric {
            intensity: 300.0,
            polarization: 2.0,
        },
        cmap: Some("planck"),
        fwhm: None,
    },
    Rule {
        patterns: &["synch"],
        title: "A_s",
        unit: Some("μK_RJ"),
        log: Fields::Intensity,
        range: RangeRule::Percentile,
        cmap: None,
        fwhm: Some((60.0, Fields::Polarization)),
    },
    Rule {
        patterns: &["dust"],
        title: "A_d",
        unit: Some("μK_RJ"),
        log: Fields::Intensity,
        range: RangeRule::Percentile,
        cmap: None,
        fwhm: Some((60.0, Fields::Polarization)),
    },
    Rule {
        patterns: &["freefree", "ff_", "ff/"],
        title: "A_ff",
        unit: Some("μK_RJ"),
        log: Fields::All,
        range: RangeRule::Percentile,
        cmap: None,
        fwhm: Some((30.0, Fields::All)),
    },
    Rule {
        patterns: &["ame"],
        title: "A_ame",
        unit: Some("μK_RJ"),
        log: Fields::All,
        range: RangeRule::Percentile,
        cmap: None,
        fwhm: Some((30.0, Fields::All)),
    },
];

/// Name the rules are matched against: the dataset path when there is
/// one, else the file name.
fn match_text(source: &Path, selector: &SignalSelector) -> String {
    match &selector.dataset {
        Some(ds) => ds.to_lowercase(),
        None => source
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default(),
    }
}

pub fn match_rule(text: &str) -> Option<&'static Rule> {
    let text = text.to_lowercase();
    RULES
        .iter()
        .find(|rule| rule.patterns.iter().any(|p| text.contains(p)))
}

/// Default smoothing, decided from the name and band limit only, so it can
/// be applied before the transform stage.
pub fn infer_smoothing(source: &Path, selector: &SignalSelector, lmax: Option<usize>) -> Option<f64> {
    let rule = match_rule(&match_text(source, selector));
    let from_rule = rule
        .and_then(|r| r.fwhm)
        .filter(|(_, fields)| fields.covers(selector))
        .map(|(fwhm, _)| fwhm);
    from_rule.or_else(|| lmax.filter(|&l| l > 0).map(|l| 10800.0 / l as f64))
}

/// Infer every default for `map`. Never fails; an unknown name only
/// yields weaker defaults.
pub fn infer(
    source: &Path,
    selector: &SignalSelector,
    map: &SkyMap,
    lmax: Option<usize>,
) -> Settings {
    let text = match_text(source, selector);
    let rule = match_rule(&text);
    let stats = map.stats();

    let mut settings = Settings {
        left_title: Some(selector.label()),
        ..Default::default()
    };

    let title = match rule {
        Some(r) => r.title.to_string(),
        None => source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };
    settings.title = Some(match lmax {
        Some(l) => format!("{title}, lmax={l}"),
        None => title,
    });

    let range_rule = rule.map_or(RangeRule::Percentile, |r| r.range);
    match range_rule {
        RangeRule::Percentile => {
            settings.mode = Some(RangeMode::Auto);
            settings.percentile = Some(DEFAULT_PERCENTILE);
        }
        RangeRule::FromZero => {
            settings.min = Some(0.0);
            settings.mode = Some(RangeMode::Auto);
        }
        RangeRule::Symmetric {
            intensity,
            polarization,
        } => {
            settings.symmetric = Some(if selector.is_polarization() {
                polarization
            } else {
                intensity
            });
        }
        RangeRule::SymmetricPercentile => {
            if let Some((lo, hi)) = percentile_pair(map.data(), DEFAULT_PERCENTILE) {
                settings.symmetric = Some(lo.abs().max(hi.abs()));
            }
        }
    }

    if let Some(r) = rule {
        settings.unit = r.unit.map(str::to_string);
        settings.cmap = r.cmap.map(str::to_string);
        let log = r.log.covers(selector);
        if log && stats.positive == 0 {
            warn!("{text}: no positive samples, log scale default disabled");
            settings.log = Some(false);
        } else {
            settings.log = Some(log);
        }
    } else {
        settings.log = Some(false);
    }

    debug!(
        "inferred for '{text}' ({}): rule {:?}",
        selector,
        rule.map(|r| r.patterns)
    );
    settings
}
