//! Figure drawing and file output.
//!
//! A figure is the projected map raster with optional titles, graticule and
//! a horizontal colorbar, drawn with plotters onto an in-memory bitmap (PNG)
//! or SVG document and then moved into place atomically.

pub mod colormap;
pub mod layout;
pub mod ticks;

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Once;

use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};
use log::{info, warn};
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};

use crate::config::{OutputFormat, RenderSpec};
use crate::error::{Result, SkyplotError};
use crate::project::ProjectedImage;

pub use colormap::Colormap;
pub use layout::{Layout, SizeClass};

const FONT_FAMILY: &str = "sans-serif";

static FONT_WARMUP: Once = Once::new();

/// One-time process setup: loads the system font used for labels so the
/// first figure does not pay for font discovery. Safe to call repeatedly.
pub fn init_rendering() {
    FONT_WARMUP.call_once(|| {
        let mut buf = vec![0u8; 64 * 32 * 3];
        let root = BitMapBackend::with_buffer(&mut buf, (64, 32)).into_drawing_area();
        let style = (FONT_FAMILY, 12.0).into_font().color(&BLACK);
        if let Err(e) = root.draw(&Text::new("0", (2, 2), style)) {
            warn!("font warm-up failed, text labels may not render: {e}");
        }
    });
}

fn drawing_err(e: impl std::fmt::Display) -> SkyplotError {
    SkyplotError::Render(e.to_string())
}

// ---------------------------------------------------------------------------
// Rasters
// ---------------------------------------------------------------------------

/// RGB bytes for the projected map. Off-sky cells take the background,
/// undefined cells the mask fill (or the background when there is none).
pub fn map_raster(image: &ProjectedImage, spec: &RenderSpec, cmap: &Colormap) -> Vec<u8> {
    let bg = spec.style.background;
    let undefined = spec.style.mask_fill.unwrap_or(bg);
    let mut buf = Vec::with_capacity(image.values.len() * 3);
    for (&v, &inside) in image.values.iter().zip(&image.inside) {
        let c = if !inside {
            bg
        } else if v.is_nan() {
            undefined
        } else {
            cmap.color(spec.range.normalize(v))
        };
        buf.extend_from_slice(&[c.0, c.1, c.2]);
    }
    buf
}

/// Cells left unpainted by the data: off-sky, or undefined with no fill.
fn clear_cells(image: &ProjectedImage, spec: &RenderSpec) -> Vec<bool> {
    let fill = spec.style.mask_fill.is_some();
    image
        .values
        .iter()
        .zip(&image.inside)
        .map(|(&v, &inside)| !inside || (v.is_nan() && !fill))
        .collect()
}

/// Attach alpha to a drawn RGB figure: pixels still showing the background,
/// outside the map or over a clear cell, become fully transparent.
fn with_alpha(
    rgb: &[u8],
    layout: &Layout,
    clear: &[bool],
    background: RGBColor,
) -> Option<RgbaImage> {
    let (w, h) = (layout.width, layout.height);
    let map = layout.map;
    let bg = [background.0, background.1, background.2];
    let mut rgba = Vec::with_capacity(w as usize * h as usize * 4);
    for (i, px) in rgb.chunks_exact(3).enumerate() {
        let (x, y) = ((i as u32 % w) as i32, (i as u32 / w) as i32);
        let (mx, my) = (x - map.x, y - map.y);
        let in_map = mx >= 0 && my >= 0 && (mx as u32) < map.w && (my as u32) < map.h;
        let over_clear = !in_map || clear[my as usize * map.w as usize + mx as usize];
        let alpha = if *px == bg && over_clear { 0 } else { 255 };
        rgba.extend_from_slice(&[px[0], px[1], px[2], alpha]);
    }
    RgbaImage::from_raw(w, h, rgba)
}

/// Colour strip sampled evenly in display space.
fn colorbar_strip(cmap: &Colormap, w: u32, h: u32) -> Vec<u8> {
    let row: Vec<u8> = (0..w)
        .flat_map(|i| {
            let c = cmap.color((i as f64 + 0.5) / w as f64);
            [c.0, c.1, c.2]
        })
        .collect();
    row.repeat(h as usize)
}

// ---------------------------------------------------------------------------
// Drawing
// ---------------------------------------------------------------------------

fn draw_figure<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    image: &ProjectedImage,
    spec: &RenderSpec,
    cmap: &Colormap,
    layout: &Layout,
    fill_background: bool,
) -> Result<()> {
    let style = &spec.style;
    let fg = style.foreground;
    if fill_background {
        root.fill(&style.background).map_err(drawing_err)?;
    }

    let map = layout.map;
    let raster: BitMapElement<_> = BitMapElement::with_owned_buffer(
        (map.x, map.y),
        (map.w, map.h),
        map_raster(image, spec, cmap),
    )
    .ok_or_else(|| SkyplotError::Render("map raster size mismatch".into()))?;
    root.draw(&raster).map_err(drawing_err)?;

    if spec.graticule {
        let line_style = fg.mix(0.5).stroke_width(1);
        for line in image.projection.graticule() {
            let points: Vec<(i32, i32)> = line
                .iter()
                .map(|&(x, y)| (map.x + x.round() as i32, map.y + y.round() as i32))
                .collect();
            root.draw(&PathElement::new(points, line_style))
                .map_err(drawing_err)?;
        }
    }

    let pad = (layout.title_px / 2) as i32;
    let band_mid = (layout.title_band / 2) as i32;
    if let Some(title) = &spec.title {
        let text_style = (FONT_FAMILY, layout.title_px as f64)
            .into_font()
            .color(&fg)
            .pos(Pos::new(HPos::Right, VPos::Center));
        root.draw(&Text::new(
            title.as_str(),
            (layout.width as i32 - pad, band_mid),
            text_style,
        ))
        .map_err(drawing_err)?;
    }
    if let Some(left) = &spec.left_title {
        let text_style = (FONT_FAMILY, layout.title_px as f64)
            .into_font()
            .color(&fg)
            .pos(Pos::new(HPos::Left, VPos::Center));
        root.draw(&Text::new(left.as_str(), (pad, band_mid), text_style))
            .map_err(drawing_err)?;
    }

    if let Some(cb) = layout.colorbar {
        draw_colorbar(root, spec, cmap, layout, cb)?;
    }
    Ok(())
}

fn draw_colorbar<DB: DrawingBackend>(
    root: &DrawingArea<DB, Shift>,
    spec: &RenderSpec,
    cmap: &Colormap,
    layout: &Layout,
    cb: layout::Rect,
) -> Result<()> {
    let fg = spec.style.foreground;
    let strip: BitMapElement<_> = BitMapElement::with_owned_buffer(
        (cb.x, cb.y),
        (cb.w, cb.h),
        colorbar_strip(cmap, cb.w, cb.h),
    )
    .ok_or_else(|| SkyplotError::Render("colorbar size mismatch".into()))?;
    root.draw(&strip).map_err(drawing_err)?;

    let (x0, y0) = (cb.x, cb.y);
    let (x1, y1) = (cb.x + cb.w as i32, cb.y + cb.h as i32);
    root.draw(&Rectangle::new([(x0, y0), (x1, y1)], fg.stroke_width(2)))
        .map_err(drawing_err)?;

    let label_px = layout.label_px as f64;
    let tick_len = (layout.label_px / 4).max(2) as i32;
    let label_style = (FONT_FAMILY, label_px)
        .into_font()
        .color(&fg)
        .pos(Pos::new(HPos::Center, VPos::Top));
    for &v in &spec.range.ticks {
        let x = x0 + (spec.range.normalize(v) * cb.w as f64).round() as i32;
        root.draw(&PathElement::new(
            vec![(x, y1), (x, y1 + tick_len)],
            fg.stroke_width(2),
        ))
        .map_err(drawing_err)?;
        root.draw(&Text::new(
            ticks::format_tick(v),
            (x, y1 + tick_len + 2),
            label_style.clone(),
        ))
        .map_err(drawing_err)?;
    }

    if let Some(unit) = &spec.unit {
        let y = y1 + tick_len + 2 + (label_px * 1.4) as i32;
        root.draw(&Text::new(
            unit.as_str(),
            ((x0 + x1) / 2, y),
            label_style.clone(),
        ))
        .map_err(drawing_err)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Encoding and output
// ---------------------------------------------------------------------------

fn figure_layout(image: &ProjectedImage, spec: &RenderSpec) -> Layout {
    Layout::new(
        image.width as u32,
        image.height as u32,
        spec.title.is_some() || spec.left_title.is_some(),
        spec.colorbar,
        spec.style.fontsize,
        spec.style.labelsize,
    )
}

/// Encode the figure in `spec.format`. A transparent style yields an RGBA
/// PNG, or an SVG without a page background.
pub fn encode(image: &ProjectedImage, spec: &RenderSpec, cmap: &Colormap) -> Result<Vec<u8>> {
    let layout = figure_layout(image, spec);
    let (w, h) = (layout.width, layout.height);
    match spec.format {
        OutputFormat::Png => {
            let mut buf = vec![0u8; w as usize * h as usize * 3];
            {
                let root = BitMapBackend::with_buffer(&mut buf, (w, h)).into_drawing_area();
                draw_figure(&root, image, spec, cmap, &layout, true)?;
                root.present().map_err(drawing_err)?;
            }
            let size_mismatch = || SkyplotError::Render("bitmap size mismatch".into());
            let figure = if spec.style.transparent {
                let clear = clear_cells(image, spec);
                DynamicImage::ImageRgba8(
                    with_alpha(&buf, &layout, &clear, spec.style.background)
                        .ok_or_else(size_mismatch)?,
                )
            } else {
                DynamicImage::ImageRgb8(RgbImage::from_raw(w, h, buf).ok_or_else(size_mismatch)?)
            };
            let mut out = std::io::Cursor::new(Vec::new());
            figure
                .write_to(&mut out, ImageFormat::Png)
                .map_err(drawing_err)?;
            Ok(out.into_inner())
        }
        OutputFormat::Svg => {
            let mut svg = String::new();
            {
                let root = SVGBackend::with_string(&mut svg, (w, h)).into_drawing_area();
                draw_figure(&root, image, spec, cmap, &layout, !spec.style.transparent)?;
                root.present().map_err(drawing_err)?;
            }
            Ok(svg.into_bytes())
        }
    }
}

/// Write `bytes` to `path` through a temporary file in the same directory,
/// so `path` either keeps its old content or gets the complete new one.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(d) if !d.as_os_str().is_empty() => d,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::Builder::new()
        .prefix(".skyplot-")
        .tempfile_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| SkyplotError::Io(e.error))?;
    Ok(())
}

/// Draw and write one figure.
pub fn render_to_file(
    image: &ProjectedImage,
    spec: &RenderSpec,
    cmap: &Colormap,
    path: &Path,
) -> Result<PathBuf> {
    let bytes = encode(image, spec, cmap)?;
    write_atomic(path, &bytes)?;
    info!(
        "wrote {} ({}x{}, {} bytes)",
        path.display(),
        image.width,
        image.height,
        bytes.len()
    );
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RenderSpec, Settings};
    use crate::map::{Nside, SkyMap};
    use crate::project::{Projection, project};

    fn bare_spec(samples: &[f64]) -> RenderSpec {
        let settings = Settings {
            mode: Some(crate::range::RangeMode::MinMax),
            ..Settings::base()
        };
        RenderSpec::resolve(&settings, samples).unwrap()
    }

    #[test]
    fn raster_uses_background_mask_fill_and_colormap() {
        let nside = Nside::new(4).unwrap();
        let mut data = vec![1.0; nside.npix()];
        // First ring, around the north pole.
        data[..4].fill(f64::NAN);
        let map = SkyMap::new(nside, data).unwrap();
        let image = project(&map, Projection::Mollweide { width: 64 });
        let mut spec = bare_spec(map.data());
        spec.style.mask_fill = Some(RGBColor(1, 2, 3));
        let cmap = Colormap::by_name("gray", false).unwrap();

        let raster = map_raster(&image, &spec, &cmap);
        assert_eq!(raster.len(), 64 * 32 * 3);
        // Corner is off the ellipse.
        assert_eq!(&raster[0..3], &[255, 255, 255]);
        let centre = (16 * 64 + 32) * 3;
        assert_eq!(&raster[centre..centre + 3], &[128, 128, 128]);
        let filled = raster.chunks(3).filter(|c| *c == [1, 2, 3]).count();
        assert!(filled > 0);
    }

    #[test]
    fn png_has_figure_dimensions() {
        let map = SkyMap::constant(Nside::new(2).unwrap(), 3.0);
        let image = project(&map, Projection::Mollweide { width: 40 });
        let spec = bare_spec(map.data());
        let cmap = Colormap::by_name("viridis", false).unwrap();
        let bytes = encode(&image, &spec, &cmap).unwrap();
        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (40, 20));
    }

    #[test]
    fn transparent_png_clears_undefined_and_off_sky() {
        let nside = Nside::new(4).unwrap();
        let mut data = vec![1.0; nside.npix()];
        data[..4].fill(f64::NAN);
        let map = SkyMap::new(nside, data).unwrap();
        let image = project(&map, Projection::Mollweide { width: 64 });
        let spec = bare_spec(map.data());
        assert!(spec.style.transparent);
        let cmap = Colormap::by_name("gray", false).unwrap();

        let decoded = image::load_from_memory(&encode(&image, &spec, &cmap).unwrap()).unwrap();
        assert_eq!(decoded.color(), image::ColorType::Rgba8);
        let rgba = decoded.to_rgba8();
        assert_eq!(rgba.get_pixel(0, 0).0[3], 0);
        assert_eq!(rgba.get_pixel(32, 16).0[3], 255);
        let undefined = image
            .values
            .iter()
            .zip(&image.inside)
            .filter(|(v, inside)| **inside && v.is_nan())
            .count();
        assert!(undefined > 0);
        let clear_inside = (0..64u32 * 32)
            .filter(|&i| {
                let idx = i as usize;
                image.inside[idx] && image.values[idx].is_nan()
            })
            .all(|i| rgba.get_pixel(i % 64, i / 64).0[3] == 0);
        assert!(clear_inside);
    }

    #[test]
    fn explicit_background_is_opaque() {
        let map = SkyMap::constant(Nside::new(2).unwrap(), 3.0);
        let image = project(&map, Projection::Mollweide { width: 40 });
        let settings = Settings {
            mode: Some(crate::range::RangeMode::MinMax),
            background: Some("white".into()),
            ..Settings::base()
        };
        let spec = RenderSpec::resolve(&settings, map.data()).unwrap();
        let cmap = Colormap::by_name("viridis", false).unwrap();
        let decoded = image::load_from_memory(&encode(&image, &spec, &cmap).unwrap()).unwrap();
        assert_eq!(decoded.color(), image::ColorType::Rgb8);
    }

    #[test]
    fn svg_embeds_raster() {
        let map = SkyMap::constant(Nside::new(2).unwrap(), 3.0);
        let image = project(&map, Projection::Mollweide { width: 40 });
        let mut spec = bare_spec(map.data());
        spec.format = OutputFormat::Svg;
        let cmap = Colormap::by_name("viridis", false).unwrap();
        let svg = String::from_utf8(encode(&image, &spec, &cmap).unwrap()).unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains("<image"));
    }

    #[test]
    fn atomic_write_replaces_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }
}
