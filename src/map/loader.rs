use std::path::Path;

use log::{debug, info};

use super::container;
use super::fits::{self, Ordering};
use super::harmonic::{Alm, alm2map};
use super::healpix::reorder_nest_to_ring;
use super::model::{LoadedMap, Nside, SignalSelector, SkyMap};
use super::transform::ud_grade;
use crate::error::{Result, SkyplotError};

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// Load one field of a sky map file as a RING-ordered pixel map.  Dispatch
/// by extension.
///
/// Supported formats:
/// * `.fits` / `.fit` / `.fts` – HEALPix binary table, one column per field
/// * `.parquet` / `.pq`        – container of named datasets; the selector
///   must name the dataset. Datasets ending in `alm` hold real harmonic
///   coefficients and are synthesized to pixels.
///
/// A `target_nside` regrades pixel data, or sets the synthesis resolution
/// for harmonic data.
pub fn load_map(
    path: &Path,
    selector: &SignalSelector,
    target_nside: Option<u32>,
) -> Result<LoadedMap> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let loaded = match ext.as_str() {
        "fits" | "fit" | "fts" => load_fits(path, selector, target_nside)?,
        "parquet" | "pq" => load_container(path, selector, target_nside)?,
        other => {
            return Err(format_error(path, format!("unsupported file extension: .{other}")));
        }
    };

    info!(
        "loaded {} [{}]: nside={}, {} defined pixels{}",
        path.display(),
        selector,
        loaded.map.nside(),
        loaded.map.stats().count,
        loaded.lmax.map(|l| format!(", lmax={l}")).unwrap_or_default()
    );
    Ok(loaded)
}

/// Write RING pixel maps to a FITS binary table, one column per field.
pub fn write_fits_map(path: &Path, fields: &[(&str, &SkyMap)], unit: Option<&str>) -> Result<()> {
    let Some((_, first)) = fields.first() else {
        return Err(SkyplotError::invalid("no fields to write"));
    };
    let nside = first.nside();
    if fields.iter().any(|(_, m)| m.nside() != nside) {
        return Err(SkyplotError::invalid("all fields of a FITS map must share nside"));
    }
    let columns: Vec<(&str, &[f64])> = fields.iter().map(|(n, m)| (*n, m.data())).collect();
    fits::write_healpix(path, nside.get(), &columns, unit)
        .map_err(|e| std::io::Error::other(format!("{}: {e:#}", path.display())))?;
    info!("wrote {}", path.display());
    Ok(())
}

fn format_error(path: &Path, reason: impl Into<String>) -> SkyplotError {
    SkyplotError::FileFormat {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Regrade pixel data to the requested resolution, if any.
fn regrade(map: SkyMap, target_nside: Option<u32>) -> Result<SkyMap> {
    match target_nside {
        None => Ok(map),
        Some(n) => {
            let target = Nside::power_of_two(n)?;
            if target == map.nside() {
                Ok(map)
            } else {
                ud_grade(&map, target)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FITS
// ---------------------------------------------------------------------------

fn load_fits(path: &Path, selector: &SignalSelector, target_nside: Option<u32>) -> Result<LoadedMap> {
    let raw = fits::read_healpix(path, selector.field)
        .map_err(|e| format_error(path, format!("{e:#}")))?;

    let nside = match raw.nside {
        Some(n) => Nside::new(n).map_err(|_| format_error(path, format!("NSIDE = {n}")))?,
        None => Nside::from_npix(raw.data.len()).ok_or_else(|| {
            format_error(path, format!("{} pixels is not 12*nside^2", raw.data.len()))
        })?,
    };
    if raw.data.len() != nside.npix() {
        return Err(format_error(
            path,
            format!(
                "column {} has {} pixels but NSIDE={} needs {}",
                raw.column,
                raw.data.len(),
                nside,
                nside.npix()
            ),
        ));
    }

    let data = match raw.ordering {
        Ordering::Ring => raw.data,
        Ordering::Nested => {
            if !nside.is_power_of_two() {
                return Err(SkyplotError::Resolution(nside.get()));
            }
            debug!("reordering NESTED input to RING");
            reorder_nest_to_ring(nside, &raw.data)
        }
    };

    let map = regrade(SkyMap::from_parts(nside, data), target_nside)?;
    Ok(LoadedMap {
        map,
        lmax: None,
        unit: raw.unit,
        path: path.to_path_buf(),
        selector: selector.clone(),
    })
}

// ---------------------------------------------------------------------------
// Containers
// ---------------------------------------------------------------------------

fn load_container(
    path: &Path,
    selector: &SignalSelector,
    target_nside: Option<u32>,
) -> Result<LoadedMap> {
    let dataset = selector.dataset.as_deref().ok_or_else(|| {
        SkyplotError::invalid(format!(
            "{} is a container; a dataset path must be selected",
            path.display()
        ))
    })?;

    let fields = container::read_dataset(path, dataset)
        .map_err(|e| format_error(path, format!("{e:#}")))?
        .ok_or_else(|| SkyplotError::DatasetNotFound {
            path: path.to_path_buf(),
            dataset: dataset.to_string(),
        })?;
    let n_fields = fields.len();
    let values = fields
        .into_iter()
        .nth(selector.field)
        .flatten()
        .ok_or_else(|| {
            format_error(
                path,
                format!("dataset '{dataset}' has no field {} ({n_fields} rows)", selector.field),
            )
        })?;

    let (map, lmax) = match dataset.strip_suffix("alm") {
        Some(prefix) => {
            let lmax_name = format!("{prefix}lmax");
            let lmax = container::read_scalar(path, &lmax_name)
                .map_err(|e| format_error(path, format!("{e:#}")))?
                .map(|l| l as usize);
            let alm = Alm::from_real(&values, lmax)
                .map_err(|e| format_error(path, format!("dataset '{dataset}': {e}")))?;
            let nside = match target_nside {
                Some(n) => Nside::power_of_two(n)?,
                None => Nside::for_lmax(alm.lmax()),
            };
            debug!("synthesizing lmax={} at nside={nside}", alm.lmax());
            (alm2map(&alm, nside), Some(alm.lmax()))
        }
        None => {
            let map = SkyMap::from_samples(values)
                .map_err(|e| format_error(path, format!("dataset '{dataset}': {e}")))?;
            (regrade(map, target_nside)?, None)
        }
    };

    Ok(LoadedMap {
        map,
        lmax,
        unit: None,
        path: path.to_path_buf(),
        selector: selector.clone(),
    })
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;
    use crate::map::healpix::reorder_ring_to_nest;

    #[test]
    fn unknown_extension_is_a_format_error() {
        let err = load_map(Path::new("sky.txt"), &SignalSelector::field(0), None).unwrap_err();
        assert!(matches!(err, SkyplotError::FileFormat { .. }));
    }

    #[test]
    fn fits_round_trip_and_regrade() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ramp.fits");
        let nside = Nside::new(4).unwrap();
        let map = SkyMap::new(nside, (0..nside.npix()).map(|p| p as f64).collect()).unwrap();
        write_fits_map(&path, &[("I_STOKES", &map)], Some("uK")).unwrap();

        let loaded = load_map(&path, &SignalSelector::field(0), None).unwrap();
        assert_eq!(loaded.map, map);
        assert_eq!(loaded.unit.as_deref(), Some("uK"));

        let low = load_map(&path, &SignalSelector::field(0), Some(2)).unwrap();
        assert_eq!(low.map.nside().get(), 2);
        assert!(matches!(
            load_map(&path, &SignalSelector::field(0), Some(5)),
            Err(SkyplotError::Resolution(5))
        ));
        assert!(matches!(
            load_map(&path, &SignalSelector::field(3), None),
            Err(SkyplotError::FileFormat { .. })
        ));
    }

    #[test]
    fn container_selection_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.parquet");
        container::write_container(&path, &[("000001/cmb/amp_map", vec![vec![1.0; 48]])])
            .unwrap();

        assert!(matches!(
            load_map(&path, &SignalSelector::field(0), None),
            Err(SkyplotError::InvalidParameterCombination(_))
        ));
        assert!(matches!(
            load_map(&path, &SignalSelector::dataset("000002/cmb/amp_map", 0), None),
            Err(SkyplotError::DatasetNotFound { .. })
        ));
        let loaded =
            load_map(&path, &SignalSelector::dataset("000001/cmb/amp_map", 0), None).unwrap();
        assert_eq!(loaded.map.nside().get(), 2);
        assert_eq!(loaded.lmax, None);
    }

    #[test]
    fn container_alm_uses_sibling_lmax() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("chain.parquet");
        // Monopole only, lmax = 4: map value is a00 / sqrt(4 pi).
        let mut real = vec![0.0; 25];
        real[0] = (4.0 * std::f64::consts::PI).sqrt() * 2.0;
        container::write_container(
            &path,
            &[
                ("000003/dust/amp_alm", vec![real]),
                ("000003/dust/amp_lmax", vec![vec![4.0]]),
            ],
        )
        .unwrap();

        let loaded =
            load_map(&path, &SignalSelector::dataset("000003/dust/amp_alm", 0), None).unwrap();
        assert_eq!(loaded.lmax, Some(4));
        assert_eq!(loaded.map.nside().get(), 2);
        for &v in loaded.map.data() {
            assert_relative_eq!(v, 2.0, epsilon = 1e-12);
        }
    }

    /// Overwrite the quoted value of a header card in place.
    fn patch_card(path: &Path, key: &[u8], value: &[u8; 8]) {
        let mut bytes = std::fs::read(path).unwrap();
        let pos = bytes
            .windows(key.len())
            .position(|w| w == key)
            .unwrap();
        let start = bytes[pos..].iter().position(|&b| b == b'\'').unwrap() + pos + 1;
        bytes[start..start + 8].copy_from_slice(value);
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn oversized_column_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.fits");
        write_fits_map(&path, &[("T", &SkyMap::constant(Nside::new(1).unwrap(), 1.0))], None)
            .unwrap();
        patch_card(&path, b"TFORM1  =", b"400D    ");

        let err = load_map(&path, &SignalSelector::field(0), None).unwrap_err();
        assert!(matches!(err, SkyplotError::FileFormat { .. }), "{err}");
    }

    #[test]
    fn truncated_table_is_a_format_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.fits");
        write_fits_map(&path, &[("T", &SkyMap::constant(Nside::new(8).unwrap(), 1.0))], None)
            .unwrap();
        let len = std::fs::metadata(&path).unwrap().len();
        let file = std::fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 2880).unwrap();

        let err = load_map(&path, &SignalSelector::field(0), None).unwrap_err();
        assert!(matches!(err, SkyplotError::FileFormat { .. }), "{err}");
    }

    #[test]
    fn nested_input_is_reordered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nest.fits");
        let nside = Nside::new(2).unwrap();
        let ring: Vec<f64> = (0..48).map(|p| p as f64 * 0.5).collect();
        let nested = reorder_ring_to_nest(nside, &ring);
        fits::write_healpix(&path, 2, &[("T", &nested)], None).unwrap();
        // Flip the ORDERING keyword in place.
        let mut bytes = std::fs::read(&path).unwrap();
        let pos = bytes
            .windows(10)
            .position(|w| w == b"'RING    '")
            .unwrap();
        bytes[pos..pos + 10].copy_from_slice(b"'NESTED  '");
        std::fs::write(&path, bytes).unwrap();

        let loaded = load_map(&path, &SignalSelector::field(0), None).unwrap();
        assert_eq!(loaded.map.data(), &ring[..]);
    }
}
