// ========================================================================================
//
//                        Batch scoring: many samples, one table
//
// ========================================================================================
//
// Reads a sample-by-site matrix, reconciles its columns against the table's site order,
// and scores every sample in parallel. Every row goes through the same validation as a
// single request; a bad row is reported in the output, it does not abort the run.

use crate::coefficients::CoefficientTable;
use crate::engine;
use crate::types::{AgeEstimate, NUM_CPG_SITES};
use crate::validate;
use itertools::Itertools;
use ndarray::parallel::prelude::*;
use ndarray::{Array2, Axis};
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// The column naming each sample.
pub const SAMPLE_ID_COLUMN: &str = "sample_id";

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("Failed to open '{}': {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to parse the sample matrix: {0}")]
    Csv(#[from] csv::Error),
    #[error("Failed to write results: {0}")]
    Io(#[from] io::Error),
    #[error("The sample matrix has no 'sample_id' column.")]
    MissingSampleIdColumn,
    #[error(
        "The sample matrix is missing {count} of the table's CpG sites (first: {preview})."
    )]
    MissingSites { count: usize, preview: String },
}

/// The scored result for one row of the matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleOutcome {
    pub sample_id: String,
    pub result: Result<AgeEstimate, String>,
}

/// A sample matrix reordered into the table's site order.
#[derive(Debug)]
pub struct SampleMatrix {
    pub sample_ids: Vec<String>,
    /// Shape `[n_samples, NUM_CPG_SITES]`. Unparseable cells hold `NaN`.
    pub betas: Array2<f64>,
}

/// Opens and reads a tab-separated sample matrix from disk.
pub fn read_matrix_file(path: &Path, table: &CoefficientTable) -> Result<SampleMatrix, BatchError> {
    let file = File::open(path).map_err(|source| BatchError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    read_matrix(file, table)
}

/// Reads a tab-separated matrix with one row per sample and one column per site id.
/// Columns may appear in any order; columns the table does not know are ignored.
pub fn read_matrix<R: Read>(reader: R, table: &CoefficientTable) -> Result<SampleMatrix, BatchError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .comment(Some(b'#'))
        .trim(csv::Trim::All)
        .from_reader(reader);

    // --- Stage 1: Reconcile columns against the table's site order ---
    let headers = reader.headers()?.clone();
    let column_of: HashMap<&str, usize> = headers.iter().enumerate().map(|(i, h)| (h, i)).collect();
    let id_col = *column_of
        .get(SAMPLE_ID_COLUMN)
        .ok_or(BatchError::MissingSampleIdColumn)?;

    let mut site_cols = Vec::with_capacity(NUM_CPG_SITES);
    let mut missing = Vec::new();
    for site in table.site_ids() {
        match column_of.get(site.as_str()) {
            Some(&col) => site_cols.push(col),
            None => missing.push(site.as_str()),
        }
    }
    if !missing.is_empty() {
        return Err(BatchError::MissingSites {
            count: missing.len(),
            preview: missing.iter().take(5).join(", "),
        });
    }

    // --- Stage 2: Rows ---
    let mut sample_ids = Vec::new();
    let mut values = Vec::new();
    for record in reader.records() {
        let record = record?;
        sample_ids.push(record.get(id_col).unwrap_or_default().to_string());
        values.extend(site_cols.iter().map(|&col| {
            record
                .get(col)
                .and_then(|cell| lexical_core::parse::<f64>(cell.as_bytes()).ok())
                .unwrap_or(f64::NAN)
        }));
    }

    let betas = Array2::from_shape_vec((sample_ids.len(), site_cols.len()), values)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    log::info!(
        "Read {} samples × {} sites from the sample matrix",
        sample_ids.len(),
        site_cols.len()
    );
    Ok(SampleMatrix { sample_ids, betas })
}

/// Scores every sample in parallel. Output order matches input order.
pub fn score_matrix(matrix: &SampleMatrix, table: &CoefficientTable) -> Vec<SampleOutcome> {
    let results: Vec<Result<AgeEstimate, String>> = matrix
        .betas
        .axis_iter(Axis(0))
        .into_par_iter()
        .map(|row| {
            let vector = validate::validate_betas(row.to_vec()).map_err(|e| e.to_string())?;
            engine::estimate_age(&vector, table).map_err(|e| e.to_string())
        })
        .collect();

    let failed = results.iter().filter(|r| r.is_err()).count();
    if failed > 0 {
        log::warn!("{failed} of {} samples could not be scored", results.len());
    }

    matrix
        .sample_ids
        .iter()
        .cloned()
        .zip(results)
        .map(|(sample_id, result)| SampleOutcome { sample_id, result })
        .collect()
}

/// Writes `sample_id`, `epi_age` and `status` columns. Failed rows get `NA` and the
/// reason in `status`.
pub fn write_outcomes<W: Write>(writer: W, outcomes: &[SampleOutcome]) -> io::Result<()> {
    let mut out = BufWriter::new(writer);
    let mut buffer = ryu::Buffer::new();
    writeln!(out, "{SAMPLE_ID_COLUMN}\tepi_age\tstatus")?;
    for outcome in outcomes {
        match &outcome.result {
            Ok(age) => writeln!(
                out,
                "{}\t{}\tok",
                outcome.sample_id,
                buffer.format(age.years())
            )?,
            Err(reason) => writeln!(out, "{}\tNA\t{}", outcome.sample_id, reason)?,
        }
    }
    out.flush()
}
