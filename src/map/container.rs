use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use arrow::array::{
    Array, ArrayRef, Float32Array, Float64Array, Float64Builder, Int32Array, Int64Array,
    LargeListArray, ListArray, ListBuilder,
};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::ProjectionMask;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

// ---------------------------------------------------------------------------
// Structured containers
// ---------------------------------------------------------------------------
//
// A container is a Parquet file whose columns are datasets named by a
// hierarchical path (`000007/cmb/amp_alm`). Every column is a
// `List<Float64>` (or `List<Float32>`); row `k` holds field `k`. Datasets
// with fewer fields than the file has rows are null-padded.

/// One dataset read out of a container: one entry per field, `None` where
/// the row is null.
pub type Dataset = Vec<Option<Vec<f64>>>;

/// Names of all datasets in a container.
pub fn list_datasets(path: &Path) -> Result<Vec<String>> {
    let file = std::fs::File::open(path).context("opening parquet container")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;
    Ok(builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect())
}

/// Read a single dataset. `Ok(None)` when the container has no such column.
pub fn read_dataset(path: &Path, name: &str) -> Result<Option<Dataset>> {
    let file = std::fs::File::open(path).context("opening parquet container")?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;

    let Ok(idx) = builder.schema().index_of(name) else {
        return Ok(None);
    };
    let mask = ProjectionMask::roots(builder.parquet_schema(), [idx]);
    let reader = builder
        .with_projection(mask)
        .build()
        .context("building parquet reader")?;

    let mut fields = Vec::new();
    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let col = batch.column(0);
        for row in 0..batch.num_rows() {
            if col.is_null(row) {
                fields.push(None);
            } else {
                let values = extract_f64_list(col, row)
                    .with_context(|| format!("dataset '{name}', row {row}"))?;
                fields.push(Some(values));
            }
        }
    }
    Ok(Some(fields))
}

/// Read a scalar dataset such as `<prefix>lmax`: the first value of the
/// first row.
pub fn read_scalar(path: &Path, name: &str) -> Result<Option<f64>> {
    let Some(fields) = read_dataset(path, name)? else {
        return Ok(None);
    };
    let value = fields
        .first()
        .and_then(|f| f.as_ref())
        .and_then(|f| f.first())
        .copied()
        .with_context(|| format!("dataset '{name}' is empty"))?;
    Ok(Some(value))
}

/// Write datasets as `List<Float64>` columns. Shorter datasets are
/// null-padded to the longest field count.
pub fn write_container(path: &Path, datasets: &[(&str, Vec<Vec<f64>>)]) -> Result<()> {
    if datasets.is_empty() {
        bail!("a container needs at least one dataset");
    }
    let n_rows = datasets.iter().map(|(_, f)| f.len()).max().unwrap_or(0);

    let mut fields = Vec::with_capacity(datasets.len());
    let mut columns: Vec<ArrayRef> = Vec::with_capacity(datasets.len());
    for (name, rows) in datasets {
        let mut builder = ListBuilder::new(Float64Builder::new());
        for row in 0..n_rows {
            match rows.get(row) {
                Some(values) => {
                    builder.values().append_slice(values);
                    builder.append(true);
                }
                None => builder.append(false),
            }
        }
        columns.push(Arc::new(builder.finish()));
        fields.push(Field::new(
            *name,
            DataType::List(Arc::new(Field::new("item", DataType::Float64, true))),
            true,
        ));
    }

    let schema = Arc::new(Schema::new(fields));
    let batch =
        RecordBatch::try_new(schema.clone(), columns).context("assembling record batch")?;

    let file = std::fs::File::create(path).context("creating parquet container")?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing record batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

// -- Arrow helpers --

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
/// Scalar numeric columns yield a one-element vector.
fn extract_f64_list(col: &ArrayRef, row: usize) -> Result<Vec<f64>> {
    let values_array = match col.data_type() {
        DataType::List(_) => col
            .as_any()
            .downcast_ref::<ListArray>()
            .context("expected ListArray")?
            .value(row),
        DataType::LargeList(_) => col
            .as_any()
            .downcast_ref::<LargeListArray>()
            .context("expected LargeListArray")?
            .value(row),
        _ => return scalar_value(col, row).map(|v| vec![v]),
    };

    if let Some(f64_arr) = values_array.as_any().downcast_ref::<Float64Array>() {
        Ok(f64_arr.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
    } else if let Some(f32_arr) = values_array.as_any().downcast_ref::<Float32Array>() {
        Ok(f32_arr.iter().map(|v| v.map_or(f64::NAN, f64::from)).collect())
    } else {
        bail!(
            "list inner type is {:?}, expected Float64 or Float32",
            values_array.data_type()
        )
    }
}

fn scalar_value(col: &ArrayRef, row: usize) -> Result<f64> {
    let any = col.as_any();
    if let Some(a) = any.downcast_ref::<Float64Array>() {
        Ok(a.value(row))
    } else if let Some(a) = any.downcast_ref::<Float32Array>() {
        Ok(a.value(row) as f64)
    } else if let Some(a) = any.downcast_ref::<Int64Array>() {
        Ok(a.value(row) as f64)
    } else if let Some(a) = any.downcast_ref::<Int32Array>() {
        Ok(a.value(row) as f64)
    } else {
        bail!("column type {:?} cannot hold map data", col.data_type())
    }
}
