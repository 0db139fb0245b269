//! HEALPix maps stored as FITS binary tables.
//!
//! Layout (the convention shared by healpy, Commander and the Planck Legacy
//! Archive):
//! - an empty primary HDU,
//! - a `BINTABLE` extension whose columns are map fields (I, Q, U, ...),
//!   each row carrying `repeat` consecutive pixels,
//! - `NSIDE` / `ORDERING` keywords in the extension header.

use std::path::Path;

use anyhow::{Context, Result, bail};
use fitsio::FitsFile;
use fitsio::hdu::{FitsHdu, HduInfo};
use fitsio::tables::{ColumnDataType, ColumnDescription, ConcreteColumnDescription};

/// Sentinel healpy writes for undefined pixels.
pub const UNSEEN: f64 = -1.6375e30;

fn is_unseen(v: f64) -> bool {
    (v - UNSEEN).abs() <= 1e-5 * UNSEEN.abs()
}

/// Pixel ordering declared by the `ORDERING` keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ordering {
    Ring,
    Nested,
}

/// One field of a FITS HEALPix map, exactly as stored.
#[derive(Debug, Clone)]
pub struct FitsMap {
    pub data: Vec<f64>,
    pub nside: Option<u32>,
    pub ordering: Ordering,
    pub column: String,
    pub unit: Option<String>,
    pub n_fields: usize,
}

fn read_key_optional<T: fitsio::headers::ReadsKey>(
    hdu: &FitsHdu,
    fptr: &mut FitsFile,
    key: &str,
) -> Option<T> {
    hdu.read_key(fptr, key).ok()
}

/// First binary table extension, with its columns and row count.
fn find_table(fptr: &mut FitsFile) -> Result<(FitsHdu, Vec<ConcreteColumnDescription>, usize)> {
    let mut index = 1usize;
    loop {
        let Ok(hdu) = fptr.hdu(index) else {
            bail!("no BINTABLE extension found");
        };
        if let HduInfo::TableInfo {
            column_descriptions,
            num_rows,
        } = &hdu.info
        {
            let (cols, rows) = (column_descriptions.clone(), *num_rows);
            return Ok((hdu, cols, rows));
        }
        index += 1;
    }
}

/// Read field `field` of the first binary table in a FITS file.
pub fn read_healpix(path: &Path, field: usize) -> Result<FitsMap> {
    let mut fptr = FitsFile::open(path)
        .with_context(|| format!("failed to open FITS file: {}", path.display()))?;
    let (hdu, cols, num_rows) = find_table(&mut fptr)?;

    let col = cols.get(field).with_context(|| {
        format!("field {field} requested but the table has {} columns", cols.len())
    })?;
    let expected = num_rows
        .checked_mul(col.data_type.repeat)
        .with_context(|| format!("column {} size overflows", col.name))?;

    let raw: Vec<f64> = hdu
        .read_col(&mut fptr, &col.name)
        .with_context(|| format!("reading column {}", col.name))?;
    if raw.len() != expected {
        bail!(
            "column {} holds {} samples, table declares {num_rows} rows of {}",
            col.name,
            raw.len(),
            col.data_type.repeat
        );
    }
    let data = raw
        .into_iter()
        .map(|v| if is_unseen(v) { f64::NAN } else { v })
        .collect();

    let ordering = match read_key_optional::<String>(&hdu, &mut fptr, "ORDERING")
        .map(|o| o.trim().to_ascii_uppercase())
    {
        Some(o) if o.starts_with("NEST") => Ordering::Nested,
        _ => Ordering::Ring,
    };
    let nside = match read_key_optional::<i64>(&hdu, &mut fptr, "NSIDE") {
        None => None,
        Some(n) => Some(u32::try_from(n).with_context(|| format!("NSIDE = {n} out of range"))?),
    };
    let unit = read_key_optional::<String>(&hdu, &mut fptr, &format!("TUNIT{}", field + 1))
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty());

    Ok(FitsMap {
        data,
        nside,
        ordering,
        column: col.name.clone(),
        unit,
        n_fields: cols.len(),
    })
}

/// Write RING-ordered fields as `D` columns, one pixel per row; `NaN`
/// becomes [`UNSEEN`].
pub fn write_healpix(
    path: &Path,
    nside: u32,
    fields: &[(&str, &[f64])],
    unit: Option<&str>,
) -> Result<()> {
    let npix = 12 * nside as usize * nside as usize;
    for (name, data) in fields {
        if data.len() != npix {
            bail!("field {name} has {} samples, nside={nside} needs {npix}", data.len());
        }
    }

    let descriptions = fields
        .iter()
        .map(|(name, _)| {
            ColumnDescription::new(*name)
                .with_type(ColumnDataType::Double)
                .create()
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("describing table columns")?;

    let mut fptr = FitsFile::create(path)
        .overwrite()
        .open()
        .with_context(|| format!("failed to create FITS file: {}", path.display()))?;
    let hdu = fptr
        .create_table("xtension", &descriptions)
        .context("creating binary table")?;

    for (i, (name, data)) in fields.iter().enumerate() {
        let stored: Vec<f64> = data
            .iter()
            .map(|&v| if v.is_nan() { UNSEEN } else { v })
            .collect();
        hdu.write_col(&mut fptr, *name, &stored)
            .with_context(|| format!("writing column {name}"))?;
        if let Some(unit) = unit {
            hdu.write_key(&mut fptr, &format!("TUNIT{}", i + 1), unit)?;
        }
    }

    hdu.write_key(&mut fptr, "PIXTYPE", "HEALPIX")?;
    hdu.write_key(&mut fptr, "ORDERING", "RING")?;
    hdu.write_key(&mut fptr, "NSIDE", nside as i64)?;
    hdu.write_key(&mut fptr, "INDXSCHM", "IMPLICIT")?;
    hdu.write_key(&mut fptr, "FIRSTPIX", 0i64)?;
    hdu.write_key(&mut fptr, "LASTPIX", npix as i64 - 1)?;
    hdu.write_key(&mut fptr, "COORDSYS", "G")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_all_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("iqu.fits");
        let nside = 2;
        let i: Vec<f64> = (0..48).map(|p| p as f64 * 0.5).collect();
        let mut q: Vec<f64> = (0..48).map(|p| -(p as f64)).collect();
        q[7] = f64::NAN;
        write_healpix(&path, nside, &[("I_STOKES", &i), ("Q_STOKES", &q)], Some("uK_CMB")).unwrap();

        let read_i = read_healpix(&path, 0).unwrap();
        assert_eq!(read_i.data, i);
        assert_eq!(read_i.nside, Some(2));
        assert_eq!(read_i.ordering, Ordering::Ring);
        assert_eq!(read_i.unit.as_deref(), Some("uK_CMB"));
        assert_eq!(read_i.column, "I_STOKES");
        assert_eq!(read_i.n_fields, 2);

        let read_q = read_healpix(&path, 1).unwrap();
        assert!(read_q.data[7].is_nan());
        assert_eq!(read_q.data[8], -8.0);

        assert!(read_healpix(&path, 2).is_err());
    }

    #[test]
    fn rejects_non_fits_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.fits");
        std::fs::write(&path, vec![b'x'; 2880]).unwrap();
        assert!(read_healpix(&path, 0).is_err());
    }

    #[test]
    fn rejects_wrong_sample_count() {
        let dir = tempfile::tempdir().unwrap();
        assert!(write_healpix(&dir.path().join("short.fits"), 1, &[("T", &[0.0; 5])], None).is_err());
    }
}
