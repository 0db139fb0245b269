//! Figure geometry by size class.

use std::fmt;

use crate::error::{Result, SkyplotError};

pub const DPI: f64 = 300.0;
const CM_PER_INCH: f64 = 2.54;

/// Figure width class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeClass {
    /// 7 cm
    Extra,
    /// 8.8 cm, a single journal column
    Small,
    /// 12 cm
    Medium,
    /// 18 cm, two columns
    Large,
    /// 25 cm, full page
    Full,
}

impl SizeClass {
    pub fn from_letter(c: char) -> Option<SizeClass> {
        match c.to_ascii_lowercase() {
            'x' => Some(SizeClass::Extra),
            's' => Some(SizeClass::Small),
            'm' => Some(SizeClass::Medium),
            'l' => Some(SizeClass::Large),
            'f' => Some(SizeClass::Full),
            _ => None,
        }
    }

    pub fn letter(self) -> char {
        match self {
            SizeClass::Extra => 'x',
            SizeClass::Small => 's',
            SizeClass::Medium => 'm',
            SizeClass::Large => 'l',
            SizeClass::Full => 'f',
        }
    }

    pub fn width_cm(self) -> f64 {
        match self {
            SizeClass::Extra => 7.0,
            SizeClass::Small => 8.8,
            SizeClass::Medium => 12.0,
            SizeClass::Large => 18.0,
            SizeClass::Full => 25.0,
        }
    }

    pub fn width_px(self) -> u32 {
        (self.width_cm() / CM_PER_INCH * DPI).round() as u32
    }

    /// `"mls"` → `[Medium, Large, Small]`, duplicates dropped, order kept.
    pub fn parse_combination(s: &str) -> Result<Vec<SizeClass>> {
        let mut out = Vec::new();
        for c in s.chars() {
            let class = SizeClass::from_letter(c).ok_or_else(|| {
                SkyplotError::invalid(format!("unknown size class '{c}' in \"{s}\""))
            })?;
            if !out.contains(&class) {
                out.push(class);
            }
        }
        if out.is_empty() {
            return Err(SkyplotError::invalid("empty size class list"));
        }
        Ok(out)
    }
}

impl fmt::Display for SizeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Points to pixels at [`DPI`].
pub fn pt_to_px(pt: f64) -> f64 {
    pt * DPI / 72.0
}

/// Pixel rectangle, origin top left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub w: u32,
    pub h: u32,
}

/// Where everything goes on the canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct Layout {
    pub width: u32,
    pub height: u32,
    /// Title band above the map; zero height when there are no titles.
    pub title_band: u32,
    pub map: Rect,
    pub colorbar: Option<Rect>,
    pub title_px: u32,
    pub label_px: u32,
}

impl Layout {
    /// `map_w × map_h` map area under an optional title band, above an
    /// optional colorbar band.
    pub fn new(
        map_w: u32,
        map_h: u32,
        titles: bool,
        colorbar: bool,
        fontsize_pt: f64,
        labelsize_pt: f64,
    ) -> Layout {
        let title_px = pt_to_px(fontsize_pt).round().max(1.0) as u32;
        let label_px = pt_to_px(labelsize_pt).round().max(1.0) as u32;
        let title_band = if titles { title_px * 3 / 2 } else { 0 };

        let colorbar_rect = colorbar.then(|| {
            let w = (map_w / 2).max(1);
            let h = (label_px * 2 / 3).max(4);
            Rect {
                x: ((map_w - w) / 2) as i32,
                y: (title_band + map_h + label_px / 2) as i32,
                w,
                h,
            }
        });
        // Bar, tick labels beneath it, unit label beneath those.
        let colorbar_band = if colorbar {
            label_px / 2 + (label_px * 2 / 3).max(4) + label_px * 3
        } else {
            0
        };

        Layout {
            width: map_w,
            height: title_band + map_h + colorbar_band,
            title_band,
            map: Rect {
                x: 0,
                y: title_band as i32,
                w: map_w,
                h: map_h,
            },
            colorbar: colorbar_rect,
            title_px,
            label_px,
        }
    }
}
