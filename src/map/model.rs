use std::fmt;
use std::path::PathBuf;

use crate::error::{Result, SkyplotError};

// ---------------------------------------------------------------------------
// Nside – HEALPix resolution parameter
// ---------------------------------------------------------------------------

/// HEALPix resolution parameter.
///
/// RING geometry is defined for every positive nside, so any value is
/// accepted here; operations that need the NESTED hierarchy (regrading,
/// NESTED input) check [`Nside::is_power_of_two`] themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Nside(u32);

impl Nside {
    /// Any positive nside (declared resolution of a RING map).
    pub fn new(nside: u32) -> Result<Self> {
        if nside == 0 || nside > 1 << 29 {
            return Err(SkyplotError::Resolution(nside));
        }
        Ok(Nside(nside))
    }

    /// A power-of-two nside, required wherever the resolution is changed.
    pub fn power_of_two(nside: u32) -> Result<Self> {
        let n = Self::new(nside)?;
        if !n.is_power_of_two() {
            return Err(SkyplotError::Resolution(nside));
        }
        Ok(n)
    }

    /// Recover nside from a pixel count, `npix = 12 * nside^2`.
    pub fn from_npix(npix: usize) -> Option<Self> {
        if npix == 0 || npix % 12 != 0 {
            return None;
        }
        let n2 = npix / 12;
        let n = (n2 as f64).sqrt().round() as usize;
        if n * n != n2 {
            return None;
        }
        Self::new(n as u32).ok()
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn is_power_of_two(self) -> bool {
        self.0.is_power_of_two()
    }

    pub fn npix(self) -> usize {
        12 * (self.0 as usize) * (self.0 as usize)
    }

    /// Default band limit used for harmonic operations at this resolution.
    pub fn default_lmax(self) -> usize {
        3 * self.0 as usize - 1
    }

    /// Smallest power-of-two nside able to carry harmonics up to `lmax`.
    pub fn for_lmax(lmax: usize) -> Self {
        let mut n = 1u32;
        while 3 * (n as usize) - 1 < lmax {
            n *= 2;
        }
        Nside(n)
    }
}

impl fmt::Display for Nside {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// SkyMap – RING-ordered pixel samples
// ---------------------------------------------------------------------------

/// A full-sky map in RING ordering. Undefined pixels are `NaN`.
///
/// Maps are values: transforms never mutate their input and always hand back
/// a fresh `SkyMap`.
#[derive(Debug, Clone, PartialEq)]
pub struct SkyMap {
    nside: Nside,
    data: Vec<f64>,
}

impl SkyMap {
    pub fn new(nside: Nside, data: Vec<f64>) -> Result<Self> {
        if data.len() != nside.npix() {
            return Err(SkyplotError::invalid(format!(
                "map has {} samples but nside={} needs {}",
                data.len(),
                nside,
                nside.npix()
            )));
        }
        Ok(SkyMap { nside, data })
    }

    /// Build a map whose pixel count determines its resolution.
    pub fn from_samples(data: Vec<f64>) -> Result<Self> {
        let nside = Nside::from_npix(data.len()).ok_or_else(|| {
            SkyplotError::invalid(format!("{} samples is not a valid HEALPix map size", data.len()))
        })?;
        Ok(SkyMap { nside, data })
    }

    /// Construct from samples already known to hold `nside.npix()` values.
    pub(crate) fn from_parts(nside: Nside, data: Vec<f64>) -> Self {
        debug_assert_eq!(data.len(), nside.npix());
        SkyMap { nside, data }
    }

    pub fn constant(nside: Nside, value: f64) -> Self {
        SkyMap {
            nside,
            data: vec![value; nside.npix()],
        }
    }

    pub fn nside(&self) -> Nside {
        self.nside
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Apply `f` to every defined sample, keeping undefined pixels undefined.
    pub fn map_defined(&self, f: impl Fn(f64) -> f64) -> SkyMap {
        SkyMap {
            nside: self.nside,
            data: self
                .data
                .iter()
                .map(|&v| if v.is_nan() { v } else { f(v) })
                .collect(),
        }
    }

    /// Iterator over the finite samples.
    pub fn finite(&self) -> impl Iterator<Item = f64> + '_ {
        self.data.iter().copied().filter(|v| v.is_finite())
    }

    /// Summary statistics over finite samples.
    pub fn stats(&self) -> MapStats {
        let mut stats = MapStats {
            count: 0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            mean: 0.0,
            positive: 0,
        };
        let mut sum = 0.0;
        for v in self.finite() {
            stats.count += 1;
            stats.min = stats.min.min(v);
            stats.max = stats.max.max(v);
            if v > 0.0 {
                stats.positive += 1;
            }
            sum += v;
        }
        if stats.count > 0 {
            stats.mean = sum / stats.count as f64;
        }
        stats
    }
}

/// Cheap content statistics, consumed by parameter inference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub positive: usize,
}

/// A 0/1 map; pixels below 0.5 are masked once regraded to the data
/// resolution.
pub type Mask = SkyMap;

// ---------------------------------------------------------------------------
// SignalSelector – which field(s) of a file to load
// ---------------------------------------------------------------------------

/// Identifies a field of a multi-field map file, and for containers the
/// dataset path it lives under.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SignalSelector {
    pub field: usize,
    pub dataset: Option<String>,
}

impl SignalSelector {
    pub fn field(field: usize) -> Self {
        SignalSelector {
            field,
            dataset: None,
        }
    }

    pub fn dataset(path: impl Into<String>, field: usize) -> Self {
        SignalSelector {
            field,
            dataset: Some(path.into()),
        }
    }

    /// Stokes-style label: I, Q, U for the first three fields.
    pub fn label(&self) -> String {
        match self.field {
            0 => "I".to_string(),
            1 => "Q".to_string(),
            2 => "U".to_string(),
            n => format!("sig{n}"),
        }
    }

    /// Whether this field is a polarization component.
    pub fn is_polarization(&self) -> bool {
        matches!(self.field, 1 | 2)
    }
}

impl fmt::Display for SignalSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.dataset {
            Some(ds) => write!(f, "{ds}:{}", self.field),
            None => write!(f, "field {}", self.field),
        }
    }
}

// ---------------------------------------------------------------------------
// LoadedMap – loader output
// ---------------------------------------------------------------------------

/// A map fresh off disk together with where it came from.
#[derive(Debug, Clone)]
pub struct LoadedMap {
    pub map: SkyMap,
    /// Band limit of the source when it was stored as harmonic coefficients.
    pub lmax: Option<usize>,
    /// Unit string recorded in the file, if any.
    pub unit: Option<String>,
    pub path: PathBuf,
    pub selector: SignalSelector,
}
