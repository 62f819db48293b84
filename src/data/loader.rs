use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{Array, Float64Array, Float64Builder, Int64Array, LargeListArray, ListArray, ListBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use log::debug;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use serde::{Deserialize, Serialize};

use super::model::{Decomposition, FittedComponent, PixelLocation, PixelSpectrum, SpectralBase, SpectrumSet};

const META_SPW_ID: &str = "spw_id";
const META_BASE: &str = "base";

/// Default name of the persisted spectrum set for a spectral window.
pub fn spectra_file_name(spw_id: &str) -> PathBuf {
    PathBuf::from(format!("cube_{spw_id}.parquet"))
}

/// Default name of the decomposer's result file for a spectral window.
pub fn decomposition_file_name(spw_id: &str) -> PathBuf {
    PathBuf::from(format!("cube_decomposed_{spw_id}.json"))
}

// ---------------------------------------------------------------------------
// Public entry-points for spectrum sets
// ---------------------------------------------------------------------------

/// Load a spectrum set.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – list columns `data_list`, `x_values`, `errors`; integer
///   columns `location_x`, `location_y`; `spw_id` and `base` in the schema
///   metadata
/// * `.json`    – `{ "spw_id": .., "base": .., "data_list": [[..]], .., "location": [[x, y]] }`
pub fn load_spectrum_set(path: &Path) -> Result<SpectrumSet> {
    match extension(path).as_str() {
        "parquet" | "pq" => load_parquet(path),
        "json" => load_json(path),
        other => bail!("Unsupported spectrum set extension: .{other}"),
    }
}

/// Write a spectrum set in the format implied by the file extension.
pub fn save_spectrum_set(set: &SpectrumSet, path: &Path) -> Result<()> {
    match extension(path).as_str() {
        "parquet" | "pq" => save_parquet(set, path),
        "json" => save_json(set, path),
        other => bail!("Unsupported spectrum set extension: .{other}"),
    }?;
    debug!("Wrote {} spectra to {}", set.len(), path.display());
    Ok(())
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

// ---------------------------------------------------------------------------
// JSON
// ---------------------------------------------------------------------------

fn load_json(path: &Path) -> Result<SpectrumSet> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing spectrum set {}", path.display()))
}

fn save_json(set: &SpectrumSet, path: &Path) -> Result<()> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer(BufWriter::new(file), set).context("writing spectrum set JSON")
}

// ---------------------------------------------------------------------------
// Parquet
// ---------------------------------------------------------------------------

fn list_field(name: &str) -> Field {
    Field::new(
        name,
        DataType::List(Arc::new(Field::new("item", DataType::Float64, true))),
        false,
    )
}

fn build_list(rows: &[Vec<f64>]) -> ListArray {
    let mut builder = ListBuilder::new(Float64Builder::new());
    for row in rows {
        builder.values().append_slice(row);
        builder.append(true);
    }
    builder.finish()
}

fn save_parquet(set: &SpectrumSet, path: &Path) -> Result<()> {
    let metadata = HashMap::from([
        (META_SPW_ID.to_string(), set.spw_id().to_string()),
        (META_BASE.to_string(), set.base().to_string()),
    ]);
    let schema = Arc::new(Schema::new_with_metadata(
        vec![
            list_field("data_list"),
            list_field("x_values"),
            list_field("errors"),
            Field::new("location_x", DataType::Int64, false),
            Field::new("location_y", DataType::Int64, false),
        ],
        metadata,
    ));

    let xs = set
        .location()
        .iter()
        .map(|l| i64::try_from(l.x))
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("pixel x does not fit in Int64")?;
    let ys = set
        .location()
        .iter()
        .map(|l| i64::try_from(l.y))
        .collect::<std::result::Result<Vec<_>, _>>()
        .context("pixel y does not fit in Int64")?;

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(build_list(set.data_list())),
            Arc::new(build_list(set.x_values())),
            Arc::new(build_list(set.errors())),
            Arc::new(Int64Array::from(xs)),
            Arc::new(Int64Array::from(ys)),
        ],
    )
    .context("assembling record batch")?;

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing parquet batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

fn load_parquet(path: &Path) -> Result<SpectrumSet> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(file).context("reading parquet metadata")?;

    let metadata = builder.schema().metadata().clone();
    let spw_id = metadata
        .get(META_SPW_ID)
        .context("parquet file has no 'spw_id' metadata")?;
    let base: SpectralBase = metadata
        .get(META_BASE)
        .context("parquet file has no 'base' metadata")?
        .parse()
        .map_err(anyhow::Error::msg)?;

    let reader = builder.build().context("building parquet reader")?;
    let mut set = SpectrumSet::new(spw_id.clone(), base);

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;

        let data_col = column(&batch, "data_list")?;
        let x_col = column(&batch, "x_values")?;
        let err_col = column(&batch, "errors")?;
        let loc_x = int_column(column(&batch, "location_x")?, "location_x")?;
        let loc_y = int_column(column(&batch, "location_y")?, "location_y")?;

        for row in 0..batch.num_rows() {
            let intensity = extract_f64_list(data_col, row)
                .with_context(|| format!("Row {row}: failed to read 'data_list'"))?;
            let x_values = extract_f64_list(x_col, row)
                .with_context(|| format!("Row {row}: failed to read 'x_values'"))?;
            let errors = extract_f64_list(err_col, row)
                .with_context(|| format!("Row {row}: failed to read 'errors'"))?;
            let location = PixelLocation {
                x: usize::try_from(loc_x.value(row))
                    .with_context(|| format!("Row {row}: negative location_x"))?,
                y: usize::try_from(loc_y.value(row))
                    .with_context(|| format!("Row {row}: negative location_y"))?,
            };

            set.push(
                PixelSpectrum {
                    location,
                    intensity,
                    errors,
                },
                x_values,
            )
            .with_context(|| format!("Row {row}"))?;
        }
    }

    Ok(set)
}

// -- Parquet / Arrow helpers --

fn column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Arc<dyn Array>> {
    let idx = batch
        .schema()
        .index_of(name)
        .map_err(|_| anyhow::anyhow!("Parquet file missing '{name}' column"))?;
    Ok(batch.column(idx))
}

fn int_column<'a>(col: &'a Arc<dyn Array>, name: &str) -> Result<&'a Int64Array> {
    col.as_any()
        .downcast_ref::<Int64Array>()
        .with_context(|| format!("'{name}' is {:?}, expected Int64", col.data_type()))
}

/// Extract a `Vec<f64>` from a List or LargeList column at the given row.
fn extract_f64_list(col: &Arc<dyn Array>, row: usize) -> Result<Vec<f64>> {
    if col.is_null(row) {
        bail!("null value in list column");
    }

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
        other => bail!("Expected List or LargeList column, got {other:?}"),
    };

    let values = values_array
        .as_any()
        .downcast_ref::<Float64Array>()
        .with_context(|| {
            format!(
                "List inner type is {:?}, expected Float64",
                values_array.data_type()
            )
        })?;
    Ok(values.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
}

// ---------------------------------------------------------------------------
// Decomposition results
// ---------------------------------------------------------------------------

/// GaussPy's batch-decomposition output; extra keys are ignored.
#[derive(Debug, Default, Serialize, Deserialize)]
struct DecompositionFile {
    amplitudes_fit: Vec<Vec<f64>>,
    fwhms_fit: Vec<Vec<f64>>,
    means_fit: Vec<Vec<f64>>,
}

/// Read a decomposer result file (`amplitudes_fit`, `fwhms_fit`, `means_fit`).
pub fn load_decomposition(path: &Path) -> Result<Decomposition> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let raw: DecompositionFile = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing decomposition {}", path.display()))?;
    let decomposition = Decomposition::from_parallel(raw.amplitudes_fit, raw.fwhms_fit, raw.means_fit)
        .with_context(|| format!("in {}", path.display()))?;
    debug!(
        "Loaded components for {} spectra from {}",
        decomposition.len(),
        path.display()
    );
    Ok(decomposition)
}

/// Write a decomposition in the same layout the decomposer produces.
pub fn save_decomposition(decomposition: &Decomposition, path: &Path) -> Result<()> {
    let mut raw = DecompositionFile::default();
    for comps in &decomposition.components {
        raw.amplitudes_fit.push(comps.iter().map(|c| c.amplitude).collect());
        raw.fwhms_fit.push(comps.iter().map(|c| c.fwhm).collect());
        raw.means_fit.push(comps.iter().map(|c| c.mean).collect());
    }
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &raw).context("writing decomposition JSON")
}

// ---------------------------------------------------------------------------
// CSV export
// ---------------------------------------------------------------------------

/// Write a profile as `axis,intensity` rows.
pub fn write_profile_csv(path: &Path, axis: &[f64], intensity: &[f64]) -> Result<()> {
    write_spectrum_csv(path, axis, intensity, &[])
}

/// Write a spectrum with its Gaussian components evaluated on the same axis:
/// `axis,intensity[,model,component_0,..]`. Components are in the same units
/// as `axis`.
pub fn write_spectrum_csv(
    path: &Path,
    axis: &[f64],
    intensity: &[f64],
    components: &[FittedComponent],
) -> Result<()> {
    if axis.len() != intensity.len() {
        bail!(
            "{}: axis has {} values but intensity has {}",
            path.display(),
            axis.len(),
            intensity.len()
        );
    }

    let mut writer =
        csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;

    let mut header = vec!["axis".to_string(), "intensity".to_string()];
    if !components.is_empty() {
        header.push("model".to_string());
        header.extend((0..components.len()).map(|k| format!("component_{k}")));
    }
    writer.write_record(&header)?;

    for (&x, &y) in axis.iter().zip(intensity) {
        let mut record = vec![x.to_string(), y.to_string()];
        if !components.is_empty() {
            let each: Vec<f64> = components.iter().map(|c| c.evaluate(x)).collect();
            record.push(each.iter().sum::<f64>().to_string());
            record.extend(each.iter().map(|v| v.to_string()));
        }
        writer.write_record(&record)?;
    }
    writer.flush().context("flushing CSV")?;
    Ok(())
}
