//! Colorbar range resolution and the signed-log colour scale.

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SkyplotError};

/// How the bounds not given explicitly are derived from the data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeMode {
    /// Lower/upper percentile pair (2.5 / 97.5 by default).
    #[default]
    Auto,
    /// Data extrema.
    MinMax,
}

/// Range inputs after layering. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeOptions {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub mode: Option<RangeMode>,
    /// Shorthand for `min = -R, max = R`.
    pub symmetric: Option<f64>,
    /// Extra tick values between min and max.
    pub mid: Vec<f64>,
    /// Upper percentile for [`RangeMode::Auto`]; the lower one mirrors it.
    pub percentile: Option<f64>,
}

pub const DEFAULT_PERCENTILE: f64 = 97.5;

/// Resolved colour scale.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRange {
    pub min: f64,
    pub max: f64,
    /// Tick values in data units, sorted, including min and max.
    pub ticks: Vec<f64>,
    pub log: bool,
}

impl ResolvedRange {
    /// Map a data value into the space the colormap is laid out in.
    pub fn to_display(&self, v: f64) -> f64 {
        if self.log { signed_log(v) } else { v }
    }

    pub fn display_bounds(&self) -> (f64, f64) {
        (self.to_display(self.min), self.to_display(self.max))
    }

    /// Position of `v` in `[0, 1]` along the colour scale, clamped.
    /// A degenerate range maps everything to 0.5.
    pub fn normalize(&self, v: f64) -> f64 {
        let (lo, hi) = self.display_bounds();
        if hi <= lo {
            return 0.5;
        }
        ((self.to_display(v) - lo) / (hi - lo)).clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// Signed log
// ---------------------------------------------------------------------------

/// Identity on `[-1, 1]`, `sign(x) (1 + log10 |x|)` outside.
pub fn signed_log(x: f64) -> f64 {
    if x.abs() <= 1.0 {
        x
    } else {
        x.signum() * (1.0 + x.abs().log10())
    }
}

pub fn inverse_signed_log(y: f64) -> f64 {
    if y.abs() <= 1.0 {
        y
    } else {
        y.signum() * 10f64.powf(y.abs() - 1.0)
    }
}

// ---------------------------------------------------------------------------
// Percentiles
// ---------------------------------------------------------------------------

/// Percentile `q` (0..=100) of sorted samples, interpolating linearly
/// between order statistics.
pub fn percentile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let pos = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Finite samples, sorted ascending.
pub fn sorted_finite(samples: &[f64]) -> Vec<f64> {
    let mut v: Vec<f64> = samples.iter().copied().filter(|v| v.is_finite()).collect();
    v.sort_by(f64::total_cmp);
    v
}

/// The `(100 - p, p)` percentile pair over finite samples.
pub fn percentile_pair(samples: &[f64], p: f64) -> Option<(f64, f64)> {
    let sorted = sorted_finite(samples);
    let hi = p.max(100.0 - p);
    Some((
        percentile_sorted(&sorted, 100.0 - hi)?,
        percentile_sorted(&sorted, hi)?,
    ))
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Resolve `(min, max)` and the tick set.
///
/// Explicit bounds win per bound; the other bound comes from `symmetric`,
/// then from `mode`.
pub fn resolve_range(samples: &[f64], opts: &RangeOptions, log: bool) -> Result<ResolvedRange> {
    if opts.mode.is_some() && opts.symmetric.is_some() {
        return Err(SkyplotError::invalid(
            "a range mode and a symmetric range cannot both be given",
        ));
    }
    if let Some(r) = opts.symmetric {
        if !r.is_finite() || r < 0.0 {
            return Err(SkyplotError::invalid(format!(
                "symmetric range must be finite and non-negative, got {r}"
            )));
        }
    }
    let p = opts.percentile.unwrap_or(DEFAULT_PERCENTILE);
    if !(0.0..=100.0).contains(&p) {
        return Err(SkyplotError::invalid(format!("percentile {p} outside 0..=100")));
    }

    let (min, max) = match (opts.min, opts.max) {
        (Some(lo), Some(hi)) => (lo, hi),
        (lo, hi) => {
            let (auto_lo, auto_hi) = match opts.symmetric {
                Some(r) => (-r, r),
                None => data_bounds(samples, opts.mode.unwrap_or_default(), p),
            };
            (lo.unwrap_or(auto_lo), hi.unwrap_or(auto_hi))
        }
    };

    if min.is_nan() || max.is_nan() || min > max {
        return Err(SkyplotError::invalid(format!(
            "resolved range min={min} exceeds max={max}"
        )));
    }

    Ok(ResolvedRange {
        min,
        max,
        ticks: tick_set(min, max, &opts.mid),
        log,
    })
}

fn data_bounds(samples: &[f64], mode: RangeMode, p: f64) -> (f64, f64) {
    let sorted = sorted_finite(samples);
    let (Some(&first), Some(&last)) = (sorted.first(), sorted.last()) else {
        warn!("no finite samples; colour range defaults to (0, 0)");
        return (0.0, 0.0);
    };
    match mode {
        RangeMode::MinMax => (first, last),
        RangeMode::Auto => {
            let hi = p.max(100.0 - p);
            (
                percentile_sorted(&sorted, 100.0 - hi).unwrap_or(first),
                percentile_sorted(&sorted, hi).unwrap_or(last),
            )
        }
    }
}

/// `[min, mid.., max]`, sorted and de-duplicated. Mid values outside the
/// range are dropped.
pub fn tick_set(min: f64, max: f64, mid: &[f64]) -> Vec<f64> {
    let mut ticks = vec![min];
    for &m in mid {
        if m.is_finite() && (min..=max).contains(&m) {
            ticks.push(m);
        } else {
            warn!("tick {m} lies outside the colour range [{min}, {max}], dropped");
        }
    }
    ticks.push(max);
    ticks.sort_by(f64::total_cmp);
    ticks.dedup();
    ticks
}
